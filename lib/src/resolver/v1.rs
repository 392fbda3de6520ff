// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Protocol V1 resolvers

use encdec::Decode;
use log::{debug, warn};

use hwlink_apdu::{codec, Class, Command, Error, Response, V1Status};

use super::{Resolved, Resolver};

/// Accumulates inbound packets until a complete V1 response frame is available
#[derive(Clone, Debug, Default)]
pub struct FrameResolver {
    buff: Vec<u8>,
}

impl FrameResolver {
    /// Append a packet, returning the complete frame (without link padding)
    /// once the declared length and trailer have been received
    pub fn push(&mut self, packet: &[u8]) -> Option<Vec<u8>> {
        self.buff.extend_from_slice(packet);

        match codec::frame_len(&self.buff) {
            Some(n) if self.buff.len() >= n => {
                let mut frame = std::mem::take(&mut self.buff);
                frame.truncate(n);
                Some(frame)
            }
            _ => None,
        }
    }

    pub fn reset(&mut self) {
        self.buff.clear();
    }

    pub fn buffered(&self) -> usize {
        self.buff.len()
    }
}

/// Matches complete V1 frames against the command that was sent
///
/// Matching is only active for well-formed commands of a known class,
/// anything else (such as raw firmware update framing) passes through
/// unchecked.
#[derive(Clone, Debug, Default)]
pub struct CommandMatcher {
    active: Option<(u8, u8)>,
}

impl CommandMatcher {
    /// Infer the active class / instruction from the sent bytes
    pub fn set_sent(&mut self, sent: &[u8]) {
        self.active = match Command::decode(sent) {
            Ok((c, n)) if n == sent.len() && Class::try_from(c.cla).is_ok() => {
                Some((c.cla, c.ins))
            }
            _ => None,
        };

        if self.active.is_none() {
            debug!("Command matching disabled for {} byte command", sent.len());
        }
    }

    /// Active class / instruction, if matching is enabled
    pub fn active(&self) -> Option<(u8, u8)> {
        self.active
    }

    /// Validate a complete frame against the active command
    pub fn check(&self, frame: &[u8]) -> Result<(), Error> {
        let expected = match self.active {
            Some(v) => v,
            None => return Ok(()),
        };

        let (r, _) = Response::decode(frame)?;
        let status = V1Status::parse(r.status)?;

        // Devices may report errors without echoing the command
        if status == V1Status::Success && r.echo != expected {
            warn!(
                "Response echo {:02x?} does not match command {:02x?}",
                r.echo, expected
            );
            return Err(Error::CommandMismatch {
                expected,
                actual: r.echo,
            });
        }

        status.into_result()
    }

    pub fn reset(&mut self) {
        self.active = None;
    }
}

/// V1 chain stage, frame accumulation with command matching
#[derive(Clone, Debug, Default)]
pub struct CommandResolver {
    frame: FrameResolver,
    matcher: CommandMatcher,
}

impl Resolver for CommandResolver {
    fn set_sent(&mut self, sent: &[u8]) {
        self.frame.reset();
        self.matcher.set_sent(sent);
    }

    fn resolve(&mut self, packet: &[u8]) -> Result<Resolved, Error> {
        let frame = match self.frame.push(packet) {
            Some(f) => f,
            None => return Ok(Resolved::Pending),
        };

        self.matcher.check(&frame)?;

        Ok(Resolved::Complete(frame))
    }

    fn reset(&mut self) {
        self.frame.reset();
        self.matcher.reset();
    }

    fn buffered(&self) -> usize {
        self.frame.buffered()
    }
}
