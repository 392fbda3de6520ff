// Copyright (c) 2022-2023 The MobileCoin Foundation

//! V1 command / response frames and the L1 tunnel wrapper
//!
//! ## Command encoding
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     CLASS     |  INSTRUCTION  |      P1       |      P2       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |          LENGTH (LE)          /          PAYLOAD...           /
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           RESERVED            |   DELAY / RETRY (4 bytes)...  /
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! ## Response encoding
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |          LENGTH (LE)          /          PAYLOAD...           /
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |          STATUS (BE)          |  ECHO CLASS   |   ECHO INS    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use encdec::{Decode, Encode};

use crate::Error;

/// Command header length (class, instruction, p1, p2, length)
pub const COMMAND_HEADER_LEN: usize = 6;

/// Command trailer length (reserved + delay / retry)
pub const COMMAND_TRAILER_LEN: usize = 6;

/// Minimum encoded command length (empty payload)
pub const MIN_COMMAND_LEN: usize = COMMAND_HEADER_LEN + COMMAND_TRAILER_LEN;

/// Response header length (length field)
pub const RESPONSE_HEADER_LEN: usize = 2;

/// Response trailer length (status + echoed class / instruction)
pub const RESPONSE_TRAILER_LEN: usize = 4;

/// L1 header used to tunnel V1 commands over protocol V2
pub const L1_HEADER: [u8; 4] = [0xF8, 0x02, 0x00, 0x00];

/// V1 command envelope
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Command<'a> {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub payload: &'a [u8],
}

impl<'a> Command<'a> {
    /// Create a new command with zeroed parameters
    pub fn new(cla: u8, ins: u8, payload: &'a [u8]) -> Self {
        Self {
            cla,
            ins,
            p1: 0,
            p2: 0,
            payload,
        }
    }

    /// Set command parameters
    pub fn with_params(mut self, p1: u8, p2: u8) -> Self {
        self.p1 = p1;
        self.p2 = p2;
        self
    }

    /// Encode the command into a new buffer
    pub fn to_vec(&self) -> Result<Vec<u8>, Error> {
        let mut buff = vec![0u8; self.encode_len()?];
        let n = self.encode(&mut buff)?;
        buff.truncate(n);
        Ok(buff)
    }
}

impl<'a> Encode for Command<'a> {
    type Error = Error;

    fn encode_len(&self) -> Result<usize, Error> {
        if self.payload.len() > u16::MAX as usize {
            return Err(Error::PayloadTooLong(self.payload.len()));
        }

        Ok(MIN_COMMAND_LEN + self.payload.len())
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Error> {
        let n = self.encode_len()?;
        if buff.len() < n {
            return Err(Error::InvalidLength);
        }

        buff[0] = self.cla;
        buff[1] = self.ins;
        buff[2] = self.p1;
        buff[3] = self.p2;
        LittleEndian::write_u16(&mut buff[4..], self.payload.len() as u16);

        let mut index = COMMAND_HEADER_LEN;
        buff[index..][..self.payload.len()].copy_from_slice(self.payload);
        index += self.payload.len();

        // Reserved and delay / retry fields are never interpreted by the host
        buff[index..][..COMMAND_TRAILER_LEN].fill(0);
        index += COMMAND_TRAILER_LEN;

        Ok(index)
    }
}

impl<'a> Decode<'a> for Command<'a> {
    type Output = Self;
    type Error = Error;

    fn decode(buff: &'a [u8]) -> Result<(Self, usize), Error> {
        if buff.len() < MIN_COMMAND_LEN {
            return Err(Error::InvalidLength);
        }

        let len = LittleEndian::read_u16(&buff[4..]) as usize;
        if buff.len() < MIN_COMMAND_LEN + len {
            return Err(Error::InvalidLength);
        }

        let c = Self {
            cla: buff[0],
            ins: buff[1],
            p1: buff[2],
            p2: buff[3],
            payload: &buff[COMMAND_HEADER_LEN..][..len],
        };

        Ok((c, MIN_COMMAND_LEN + len))
    }
}

/// V1 response envelope
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Response<'a> {
    /// Response payload
    pub payload: &'a [u8],

    /// Raw status word
    pub status: u16,

    /// Class and instruction echoed by the device
    pub echo: (u8, u8),
}

impl<'a> Response<'a> {
    /// Encode the response into a new buffer
    pub fn to_vec(&self) -> Result<Vec<u8>, Error> {
        let mut buff = vec![0u8; self.encode_len()?];
        let n = self.encode(&mut buff)?;
        buff.truncate(n);
        Ok(buff)
    }
}

impl<'a> Encode for Response<'a> {
    type Error = Error;

    fn encode_len(&self) -> Result<usize, Error> {
        if self.payload.len() > u16::MAX as usize {
            return Err(Error::PayloadTooLong(self.payload.len()));
        }

        Ok(RESPONSE_HEADER_LEN + self.payload.len() + RESPONSE_TRAILER_LEN)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Error> {
        let n = self.encode_len()?;
        if buff.len() < n {
            return Err(Error::InvalidLength);
        }

        LittleEndian::write_u16(&mut buff[0..], self.payload.len() as u16);

        let mut index = RESPONSE_HEADER_LEN;
        buff[index..][..self.payload.len()].copy_from_slice(self.payload);
        index += self.payload.len();

        BigEndian::write_u16(&mut buff[index..], self.status);
        buff[index + 2] = self.echo.0;
        buff[index + 3] = self.echo.1;
        index += RESPONSE_TRAILER_LEN;

        Ok(index)
    }
}

impl<'a> Decode<'a> for Response<'a> {
    type Output = Self;
    type Error = Error;

    fn decode(buff: &'a [u8]) -> Result<(Self, usize), Error> {
        let n = frame_len(buff).ok_or(Error::MalformedResponse)?;
        if buff.len() < n {
            return Err(Error::MalformedResponse);
        }

        let len = n - RESPONSE_HEADER_LEN - RESPONSE_TRAILER_LEN;
        let trailer = &buff[RESPONSE_HEADER_LEN + len..];

        let r = Self {
            payload: &buff[RESPONSE_HEADER_LEN..][..len],
            status: BigEndian::read_u16(trailer),
            echo: (trailer[2], trailer[3]),
        };

        Ok((r, n))
    }
}

/// Encode a V1 command frame
pub fn encode_v1(cla: u8, ins: u8, p1: u8, p2: u8, payload: &[u8]) -> Result<Vec<u8>, Error> {
    Command {
        cla,
        ins,
        p1,
        p2,
        payload,
    }
    .to_vec()
}

/// Decode a V1 response frame
pub fn decode_v1_response(buff: &[u8]) -> Result<Response<'_>, Error> {
    Response::decode(buff).map(|(r, _)| r)
}

/// Compute the full length of a V1 response frame from its header,
/// returns `None` if the length field has not yet been received
pub fn frame_len(buff: &[u8]) -> Option<usize> {
    if buff.len() < RESPONSE_HEADER_LEN {
        return None;
    }

    let len = LittleEndian::read_u16(buff) as usize;
    Some(RESPONSE_HEADER_LEN + len + RESPONSE_TRAILER_LEN)
}

/// Prefix a V1 command with the L1 header for transmission over protocol V2
pub fn wrap_l1(buff: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(L1_HEADER.len() + buff.len());
    v.extend_from_slice(&L1_HEADER);
    v.extend_from_slice(buff);
    v
}

/// Check whether a buffer is already an L1 (V2-native) message
pub fn is_l1(buff: &[u8]) -> bool {
    buff.first() == Some(&L1_HEADER[0])
}

/// Fetch the V1 command tunneled inside an L1 message, if any
pub fn untunnel(buff: &[u8]) -> Option<Command<'_>> {
    let inner = buff.strip_prefix(&L1_HEADER[..])?;

    match Command::decode(inner) {
        Ok((c, n)) if n == inner.len() => Some(c),
        _ => None,
    }
}
