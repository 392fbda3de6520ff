// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Hardware wallet host communication core
//!
//! Turns commands into packets for a physical link and reassembles inbound
//! packets into validated responses. Physical drivers implement [Physical]
//! and push received packets to a [Transport] via its [Receiver].
//!
//! ```no_run
//! # async fn example<P: hwlink::Physical>(link: P) -> Result<(), hwlink::Error> {
//! use hwlink::{apdu::{Class, Command, Instruction}, Options, Transport, Version};
//!
//! let t = Transport::new(link, Version::V1, Options::default());
//! // Hand t.receiver() to the physical driver for inbound delivery
//!
//! let cmd = Command::new(Class::General as u8, Instruction::GetVersion as u8, &[]);
//! let version = t.exchange_apdu(&cmd).await?;
//! # Ok(())
//! # }
//! ```

/// Re-export `hwlink-apdu` for consumers
pub use hwlink_apdu::{self as apdu, Version};

mod error;
pub use error::Error;

mod options;
pub use options::Options;

mod physical;
pub use physical::Physical;

pub mod resolver;

mod transport;
pub use transport::{NotifyFn, Receiver, State, Transport};
