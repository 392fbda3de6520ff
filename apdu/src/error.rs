// Copyright (c) 2022-2023 The MobileCoin Foundation

use crate::status::DeviceStatus;

/// Protocol errors raised while encoding, reassembling or validating frames
#[derive(Clone, PartialEq, Eq, Debug, thiserror::Error)]
pub enum Error {
    /// Frame is shorter than its declared length or structurally invalid
    #[error("Malformed response")]
    MalformedResponse,

    /// No buffered V2 packet for an expected serial
    #[error("Missing packet for serial 0x{serial:02x}")]
    MissingPacket { serial: u8 },

    /// Echoed class / instruction differs from the command sent
    #[error("Command mismatch (sent: {expected:02x?}, echoed: {actual:02x?})")]
    CommandMismatch {
        expected: (u8, u8),
        actual: (u8, u8),
    },

    /// Status code is not a known value
    #[error("Unknown status code 0x{0:04x}")]
    UnknownStatus(u16),

    /// Device reported a known non-success status
    #[error("Device error: {0}")]
    DeviceStatus(DeviceStatus),

    /// Command payload does not fit the 16-bit length field
    #[error("Payload length {0} exceeds maximum")]
    PayloadTooLong(usize),

    /// Link packet size unusable for the selected protocol
    #[error("Invalid packet size {0}")]
    InvalidPacketSize(usize),

    /// Buffer too short to encode / decode into
    #[error("Invalid buffer length")]
    InvalidLength,
}

impl From<encdec::Error> for Error {
    fn from(_: encdec::Error) -> Self {
        Error::InvalidLength
    }
}
