// Copyright (c) 2022-2023 The MobileCoin Foundation

use hwlink_apdu::DeviceStatus;

/// Transport error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Exchange started while another is outstanding
    #[error("Exchange already in progress")]
    Busy,

    /// Request timeout
    #[error("Timeout waiting for device response")]
    Timeout,

    /// Physical link failure
    #[error("Transport error: {0}")]
    Transport(anyhow::Error),

    /// Exchange ended without a result
    #[error("Exchange closed without response")]
    Closed,

    /// Framing or validation failure, or a device status error
    #[error(transparent)]
    Protocol(#[from] hwlink_apdu::Error),
}

impl Error {
    /// Fetch the device status where the device reported an error
    pub fn status(&self) -> Option<DeviceStatus> {
        match self {
            Error::Protocol(hwlink_apdu::Error::DeviceStatus(s)) => Some(*s),
            _ => None,
        }
    }
}
