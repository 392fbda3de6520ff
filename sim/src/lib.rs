// Copyright (c) 2022-2023 The MobileCoin Foundation

//! In-process hardware wallet simulator
//!
//! Provides a [SimDevice] implementing [hwlink::Physical], reassembling the
//! commands written to it and responding through the transport's
//! [hwlink::Receiver] according to a configurable [Behaviour].
//! No key derivation or signing is performed, responses are built from the
//! command (or a fixed payload) so exchanges can be checked end to end.

use std::time::Duration;

mod device;
pub use device::SimDevice;

/// Simulated device behaviour for subsequent commands
#[derive(Clone, PartialEq, Debug, strum::Display)]
#[non_exhaustive]
pub enum Behaviour {
    /// Echo the command payload with a success status
    Echo,

    /// Respond with a fixed payload and success status
    Reply(Vec<u8>),

    /// Respond with the provided status and an empty payload
    Status(u16),

    /// Respond with success while echoing a different instruction
    Mismatch,

    /// Accept commands without responding
    Silent,

    /// Echo the command, dropping the response packet at this index
    Withhold(usize),

    /// Fail every write
    WriteError,
}

/// Simulator options
#[derive(Clone, PartialEq, Debug, clap::Args)]
pub struct SimOptions {
    /// Link packet size
    #[clap(long, default_value_t = 64)]
    pub packet_size: usize,

    /// Delay before responses are delivered (milliseconds)
    #[clap(long, default_value_t = 0)]
    pub latency_ms: u64,
}

impl SimOptions {
    /// Create options for the provided packet size
    pub fn new(packet_size: usize) -> Self {
        Self {
            packet_size,
            latency_ms: 0,
        }
    }

    /// Helper to fetch response latency
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }
}

impl Default for SimOptions {
    fn default() -> Self {
        Self::new(64)
    }
}
