// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Wire formats and status codes for hardware wallet communication
//!
//! This crate provides the stateless half of the host protocol: command / response
//! frame encodings for protocol V1, the L1 wrapper used to tunnel V1 commands over
//! protocol V2, V2 packet framing, and the device status taxonomy.
//!
//! V1 frame fields are little-endian with the exception of the response status,
//! which the device reports big-endian.
//!

use num_enum::TryFromPrimitive;
use strum::{Display, EnumIter, EnumString, EnumVariantNames};

pub mod codec;
pub mod packet;
pub mod status;

mod error;
pub use error::Error;

pub use codec::{decode_v1_response, encode_v1, wrap_l1, Command, Response};
pub use status::{DeviceStatus, V1Status, V2Status};

/// Wire protocol version, fixed for the life of a session
#[derive(
    Copy, Clone, PartialEq, Eq, Debug, Display, EnumString, EnumVariantNames, EnumIter,
)]
#[strum(ascii_case_insensitive)]
pub enum Version {
    /// Length-prefixed frames padded to the link packet size
    #[strum(serialize = "v1")]
    V1,
    /// Serial-numbered packets with notification support
    #[strum(serialize = "v2")]
    V2,
}

/// V1 command classes
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display, TryFromPrimitive)]
#[repr(u8)]
pub enum Class {
    /// General device commands
    General = 0x70,
    /// Signing and address commands
    Sign = 0x80,
}

/// Instruction codes used by the communication core
///
/// Per-coin instructions are opaque here, these are the ones the core
/// needs to know about for timeout handling.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display, TryFromPrimitive)]
#[repr(u8)]
pub enum Instruction {
    /// Fetch firmware version (class `0x70`)
    GetVersion = 0x13,

    /// Display an address for user verification (class `0x80`)
    ShowAddress = 0xA4,

    /// Sign a plain message (class `0x80`)
    SignMessage = 0xA6,

    /// Sign a typed / structured message (class `0x80`)
    SignTypedMessage = 0xA7,

    /// Sign a raw message (class `0x80`)
    SignRawMessage = 0xA8,
}

/// Check whether a command blocks on user interaction at the device
///
/// These commands are exempt from request timeouts.
pub fn awaits_user(cla: u8, ins: u8) -> bool {
    if cla != Class::Sign as u8 {
        return false;
    }

    matches!(
        Instruction::try_from(ins),
        Ok(Instruction::ShowAddress
            | Instruction::SignMessage
            | Instruction::SignTypedMessage
            | Instruction::SignRawMessage)
    )
}
