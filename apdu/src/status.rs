// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Device status codes
//!
//! Protocol V1 reports a 16-bit status word at the end of each response frame,
//! protocol V2 native responses lead with a single status ordinal.

use num_enum::TryFromPrimitive;
use strum::{Display, EnumIter};

use crate::Error;

/// V1 status words
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display, EnumIter, TryFromPrimitive)]
#[repr(u16)]
pub enum V1Status {
    Success = 0x9000,
    UserCancel = 0x9001,
    DataError = 0x5001,
    ClassError = 0x5002,
    InstructionError = 0x5003,
}

impl V1Status {
    /// Parse a raw status word, rejecting unknown codes
    pub fn parse(code: u16) -> Result<Self, Error> {
        Self::try_from(code).map_err(|_| Error::UnknownStatus(code))
    }

    /// Convert a status into a result, non-success codes become [`Error::DeviceStatus`]
    pub fn into_result(self) -> Result<(), Error> {
        match self {
            Self::Success => Ok(()),
            s => Err(Error::DeviceStatus(DeviceStatus::V1(s))),
        }
    }
}

/// V2 status ordinals
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display, EnumIter, TryFromPrimitive)]
#[repr(u8)]
pub enum V2Status {
    Ok = 0x00,
    NoLeadingPacket = 0x01,
    CommandOverlay = 0x02,
    InvalidCommand = 0x03,
    IncorrectParameterSize = 0x04,
    InvalidParameterValue = 0x05,
    NotFound = 0x06,
    AlreadyExists = 0x07,
    IoError = 0x08,
    NotSupported = 0x09,
}

impl V2Status {
    /// Parse a raw status ordinal, rejecting unknown codes
    pub fn parse(code: u8) -> Result<Self, Error> {
        Self::try_from(code).map_err(|_| Error::UnknownStatus(code as u16))
    }

    /// Convert a status into a result, non-ok codes become [`Error::DeviceStatus`]
    pub fn into_result(self) -> Result<(), Error> {
        match self {
            Self::Ok => Ok(()),
            s => Err(Error::DeviceStatus(DeviceStatus::V2(s))),
        }
    }
}

/// Known non-success status reported by a device
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum DeviceStatus {
    V1(V1Status),
    V2(V2Status),
}

impl DeviceStatus {
    /// Numeric status code as reported on the wire
    pub fn code(&self) -> u16 {
        match self {
            DeviceStatus::V1(s) => *s as u16,
            DeviceStatus::V2(s) => *s as u16,
        }
    }

    /// Status name for display
    pub fn name(&self) -> String {
        match self {
            DeviceStatus::V1(s) => s.to_string(),
            DeviceStatus::V2(s) => s.to_string(),
        }
    }
}

impl core::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DeviceStatus::V1(s) => write!(f, "{} (0x{:04x})", s, *s as u16),
            DeviceStatus::V2(s) => write!(f, "{} ({})", s, *s as u8),
        }
    }
}
