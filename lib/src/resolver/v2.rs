// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Protocol V2 resolvers

use log::{debug, warn};

use hwlink_apdu::{
    codec::{self, L1_HEADER},
    packet::{self, HEAD_PREFIX, SERIAL_END, SERIAL_START},
    Error, V2Status,
};

use super::{CommandMatcher, Resolved, Resolver};

/// Buffers V2 packets until a message is complete, then reassembles it
#[derive(Clone, Debug, Default)]
pub struct PacketResolver {
    packets: Vec<Vec<u8>>,
}

impl PacketResolver {
    /// Check whether a multi-packet message is being collected
    pub fn in_progress(&self) -> bool {
        !self.packets.is_empty()
    }

    /// Process an inbound packet
    ///
    /// Framing inconsistencies forward the packet rather than failing,
    /// missing continuation packets are reported as errors.
    pub fn push(&mut self, packet: &[u8]) -> Result<Resolved, Error> {
        let head = match packet.first() {
            Some(h) => *h,
            None => return Ok(Resolved::Forward),
        };

        if head >= HEAD_PREFIX {
            let marker = head - HEAD_PREFIX;

            // Leading packet of a multi-packet message
            if marker >= SERIAL_START {
                if marker != SERIAL_START {
                    return Ok(Resolved::Forward);
                }

                if self.in_progress() {
                    warn!(
                        "Discarding incomplete message ({} packets)",
                        self.packets.len()
                    );
                }

                self.packets = vec![packet.to_vec()];
                return Ok(Resolved::Pending);
            }
        } else if !self.in_progress() {
            // Continuations are only meaningful within a message
            return Ok(Resolved::Forward);
        } else if (SERIAL_START..=SERIAL_END).contains(&head) {
            self.packets.push(packet.to_vec());
            return Ok(Resolved::Pending);
        }

        // Single or terminal packet, attempt reassembly
        self.packets.push(packet.to_vec());
        let packets = std::mem::take(&mut self.packets);

        match packet::unpack(&packets) {
            Ok(m) => Ok(Resolved::Complete(m)),
            Err(e @ Error::MissingPacket { .. }) => Err(e),
            Err(e) => {
                debug!("Unpack failed: {}, forwarding", e);
                Ok(Resolved::Forward)
            }
        }
    }

    pub fn reset(&mut self) {
        self.packets.clear();
    }

    pub fn buffered(&self) -> usize {
        self.packets.iter().map(|p| p.len()).sum()
    }

    /// Data carried by the leading packet of the message in progress
    pub fn leading(&self) -> Option<&[u8]> {
        self.packets.first().and_then(|p| p.get(1..))
    }
}

/// V2 chain stage, packet reassembly with validation of the reassembled message
///
/// V1 commands tunneled in an L1 wrapper are matched against the response
/// using [CommandMatcher], other commands are checked for a leading
/// [V2Status].
///
/// Continuation packets (headers below [HEAD_PREFIX]) are always claimed
/// while a message is in progress. Prefixed packets that look like
/// notifications are forwarded unless they complete the message in
/// progress: for tunneled responses the packet count must match the terminal
/// size implied by the declared V1 frame length, native responses carry no
/// length so any prefixed terminal while in progress completes the message.
#[derive(Clone, Debug, Default)]
pub struct ApduResolver {
    packets: PacketResolver,
    matcher: CommandMatcher,
    tunneled: bool,
}

impl ApduResolver {
    /// Check whether the sent command was a tunneled V1 command
    pub fn tunneled(&self) -> bool {
        self.tunneled
    }

    /// Data bytes expected in the terminal packet of a tunneled message,
    /// from the declared frame length and the leading packet size
    fn terminal_count(&self) -> Option<usize> {
        if !self.tunneled {
            return None;
        }

        let leading = self.packets.leading()?;
        let frame = leading.get(L1_HEADER.len()..)?;
        let total = L1_HEADER.len() + codec::frame_len(frame)?;

        if leading.is_empty() || total <= leading.len() {
            return None;
        }

        Some((total - 1) % leading.len() + 1)
    }

    /// Check whether a prefixed packet terminates the message in progress
    fn completes(&self, packet: &[u8]) -> bool {
        if !self.packets.in_progress() {
            return false;
        }

        let count = match packet.first() {
            Some(h) => *h & !HEAD_PREFIX,
            None => return false,
        };
        if count >= SERIAL_START {
            return false;
        }

        match self.terminal_count() {
            Some(n) => n == count as usize,
            None => true,
        }
    }

    fn check(&self, m: &[u8]) -> Result<(), Error> {
        if self.tunneled {
            let frame = m.get(L1_HEADER.len()..).ok_or(Error::MalformedResponse)?;
            codec::decode_v1_response(frame)?;
            return self.matcher.check(frame);
        }

        match m.first() {
            Some(s) => V2Status::parse(*s)?.into_result(),
            None => Err(Error::MalformedResponse),
        }
    }
}

impl Resolver for ApduResolver {
    fn set_sent(&mut self, sent: &[u8]) {
        self.packets.reset();

        match sent.strip_prefix(&L1_HEADER[..]) {
            Some(inner) if codec::untunnel(sent).is_some() => {
                self.tunneled = true;
                self.matcher.set_sent(inner);
            }
            _ => {
                self.tunneled = false;
                self.matcher.reset();
            }
        }
    }

    fn resolve(&mut self, packet: &[u8]) -> Result<Resolved, Error> {
        let leading = matches!(packet.first(), Some(h) if *h >= HEAD_PREFIX);

        if leading && packet::is_notification(packet) && !self.completes(packet) {
            return Ok(Resolved::Forward);
        }

        // Tunneled responses lead with the L1 sub-header
        if self.tunneled
            && leading
            && !self.packets.in_progress()
            && packet.get(1..3) != Some(&L1_HEADER[..2])
        {
            return Ok(Resolved::Forward);
        }

        match self.packets.push(packet)? {
            Resolved::Complete(m) => {
                self.check(&m)?;
                Ok(Resolved::Complete(m))
            }
            r => Ok(r),
        }
    }

    fn reset(&mut self) {
        self.packets.reset();
        self.matcher.reset();
        self.tunneled = false;
    }

    fn buffered(&self) -> usize {
        self.packets.buffered()
    }
}

/// V2 chain stage, claims unsolicited device notifications
///
/// Runs after [ApduResolver] so only packets no message claims are
/// considered.
#[derive(Clone, Debug, Default)]
pub struct NotifyResolver;

impl Resolver for NotifyResolver {
    fn set_sent(&mut self, _sent: &[u8]) {}

    fn resolve(&mut self, packet: &[u8]) -> Result<Resolved, Error> {
        if !packet::is_notification(packet) {
            return Ok(Resolved::Forward);
        }

        // Malformed notifications are dropped rather than failing the exchange
        match packet::unpack_notification(packet) {
            Ok(n) => Ok(Resolved::Notification(n)),
            Err(e) => {
                warn!("Dropping notification {}: {}", hex::encode(packet), e);
                Ok(Resolved::Dropped)
            }
        }
    }

    fn reset(&mut self) {}
}
