// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Resolver chain for reassembling inbound packets into responses
//!
//! Each [Resolver] stage handles one layer of framing, either claiming an
//! inbound packet or forwarding it to the next stage. Chains are built once
//! per session for the negotiated [Version]:
//!
//! - V1: [CommandResolver] (frame accumulation with command matching)
//! - V2: [ApduResolver] (packet reassembly with tunneled command matching)
//!   followed by [NotifyResolver], so continuation packets of a message in
//!   progress are claimed before the notification check
//!
//! Any error resets the whole chain so partial state never leaks into the
//! next exchange.

use log::{debug, trace};

use hwlink_apdu::{Error, Version};

mod v1;
pub use v1::{CommandMatcher, CommandResolver, FrameResolver};

mod v2;
pub use v2::{ApduResolver, NotifyResolver, PacketResolver};

/// Outcome of passing a packet to a resolver
#[derive(Clone, PartialEq, Debug)]
pub enum Resolved {
    /// More packets required to complete the frame
    Pending,

    /// Frame complete and validated
    Complete(Vec<u8>),

    /// Unsolicited device notification
    Notification(Vec<u8>),

    /// Packet consumed without result
    Dropped,

    /// Packet not handled by this stage
    Forward,
}

/// A single resolver stage
pub trait Resolver: Send {
    /// Record the bytes sent for the current exchange
    fn set_sent(&mut self, sent: &[u8]);

    /// Process an inbound packet
    fn resolve(&mut self, packet: &[u8]) -> Result<Resolved, Error>;

    /// Clear buffered packets and the sent snapshot
    fn reset(&mut self);

    /// Number of bytes currently buffered
    fn buffered(&self) -> usize {
        0
    }
}

/// Ordered list of resolver stages for a protocol version
pub struct ResolverChain {
    version: Version,
    stages: Vec<Box<dyn Resolver>>,
}

impl ResolverChain {
    /// Build the resolver chain for a protocol version
    pub fn new(version: Version) -> Self {
        let stages: Vec<Box<dyn Resolver>> = match version {
            Version::V1 => vec![Box::new(CommandResolver::default())],
            Version::V2 => vec![
                Box::new(ApduResolver::default()),
                Box::new(NotifyResolver),
            ],
        };

        Self { version, stages }
    }

    /// Protocol version for this chain
    pub fn version(&self) -> Version {
        self.version
    }

    /// Record outgoing bytes for matching against the response
    pub fn set_sent(&mut self, sent: &[u8]) {
        for s in self.stages.iter_mut() {
            s.set_sent(sent);
        }
    }

    /// Pass an inbound packet through the chain
    ///
    /// Packets no stage claims are malformed, errors reset every stage.
    pub fn resolve(&mut self, packet: &[u8]) -> Result<Resolved, Error> {
        trace!("rx: {}", hex::encode(packet));

        let mut r = Err(Error::MalformedResponse);
        for s in self.stages.iter_mut() {
            match s.resolve(packet) {
                Ok(Resolved::Forward) => continue,
                v => {
                    r = v;
                    break;
                }
            }
        }

        if let Err(e) = &r {
            debug!("Resolve failed: {}, resetting chain", e);
            self.reset_all();
        }

        r
    }

    /// Reset every stage in the chain
    pub fn reset_all(&mut self) {
        for s in self.stages.iter_mut() {
            s.reset();
        }
    }

    /// Total bytes buffered across the chain
    pub fn buffered(&self) -> usize {
        self.stages.iter().map(|s| s.buffered()).sum()
    }
}

#[cfg(test)]
mod test {
    use hwlink_apdu::{codec, packet, Response};

    use super::*;

    #[test]
    fn v1_chain_resets_on_error() {
        let mut c = ResolverChain::new(Version::V1);

        let sent = codec::encode_v1(0x70, 0x13, 0, 0, &[]).unwrap();
        c.set_sent(&sent);

        let r = Response {
            payload: b"1.87",
            status: 0x1234,
            echo: (0x70, 0x13),
        }
        .to_vec()
        .unwrap();

        assert_eq!(c.resolve(&r[..4]), Ok(Resolved::Pending));
        assert_eq!(c.buffered(), 4);

        assert_eq!(c.resolve(&r[4..]), Err(Error::UnknownStatus(0x1234)));
        assert_eq!(c.buffered(), 0);
    }

    fn tunneled_exchange(c: &mut ResolverChain, payload: &[u8]) -> Vec<u8> {
        c.set_sent(&codec::wrap_l1(
            &codec::encode_v1(0x70, 0x13, 0, 0, &[]).unwrap(),
        ));

        let r = Response {
            payload,
            status: 0x9000,
            echo: (0x70, 0x13),
        };
        codec::wrap_l1(&r.to_vec().unwrap())
    }

    #[test]
    fn v2_chain_notification_mid_message() {
        let mut c = ResolverChain::new(Version::V2);
        let m = tunneled_exchange(&mut c, &[0x5a; 40]);

        let packets = packet::pack(&m, 20).unwrap();
        assert_eq!(packets.len(), 3);

        assert_eq!(c.resolve(&packets[0]), Ok(Resolved::Pending));
        assert_eq!(c.resolve(&packets[1]), Ok(Resolved::Pending));

        // Notifications do not disturb the in-flight message
        let n = [0x82, 0xfd, 0x01];
        assert_eq!(
            c.resolve(&n),
            Ok(Resolved::Notification(vec![0xfd, 0x01]))
        );

        assert_eq!(c.resolve(&packets[2]), Ok(Resolved::Complete(m)));
        assert_eq!(c.buffered(), 0);
    }

    #[test]
    fn v2_chain_notification_bytes_in_message() {
        // Notification type bytes leading the continuation and terminal data
        let mut p = [0x5a; 40];
        p[13] = 0xff;
        p[32] = 0xfe;

        let mut c = ResolverChain::new(Version::V2);
        let m = tunneled_exchange(&mut c, &p);

        let packets = packet::pack(&m, 20).unwrap();
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[1][..2], [0x71, 0xff]);
        assert_eq!(packets[2][..2], [0x8c, 0xfe]);

        assert_eq!(c.resolve(&packets[0]), Ok(Resolved::Pending));
        assert_eq!(c.resolve(&packets[1]), Ok(Resolved::Pending));
        assert_eq!(c.resolve(&packets[2]), Ok(Resolved::Complete(m.clone())));

        // Terminal without the head prefix
        let _ = tunneled_exchange(&mut c, &p);
        let mut terminal = packets[2].clone();
        terminal[0] &= !packet::HEAD_PREFIX;

        assert_eq!(c.resolve(&packets[0]), Ok(Resolved::Pending));
        assert_eq!(c.resolve(&packets[1]), Ok(Resolved::Pending));
        assert_eq!(c.resolve(&terminal), Ok(Resolved::Complete(m)));
        assert_eq!(c.buffered(), 0);
    }

    #[test]
    fn v2_chain_native_terminal() {
        let mut c = ResolverChain::new(Version::V2);
        c.set_sent(&[0xf8, 0x01, 0x00, 0x00]);

        // Native messages carry no length, prefixed packets in progress terminate
        let mut m = vec![0x00; 41];
        m[38] = 0xfc;
        let packets = packet::pack(&m, 20).unwrap();
        assert_eq!(packets[2][..2], [0x83, 0xfc]);

        assert_eq!(c.resolve(&packets[0]), Ok(Resolved::Pending));
        assert_eq!(c.resolve(&packets[1]), Ok(Resolved::Pending));
        assert_eq!(c.resolve(&packets[2]), Ok(Resolved::Complete(m)));
    }

    #[test]
    fn v2_chain_rejects_stray_continuation() {
        let mut c = ResolverChain::new(Version::V2);
        c.set_sent(&[0xf8, 0x01, 0x00, 0x00]);

        assert_eq!(c.resolve(&[0x72, 0x00, 0x01]), Err(Error::MalformedResponse));
        assert_eq!(c.buffered(), 0);
    }

    #[test]
    fn v2_chain_missing_packet() {
        let mut c = ResolverChain::new(Version::V2);
        c.set_sent(&[0xf8, 0x01, 0x00, 0x00]);

        let m = vec![0x00; 19 * 4];
        let packets = packet::pack(&m, 20).unwrap();
        assert_eq!(packets.len(), 4);

        assert_eq!(c.resolve(&packets[0]), Ok(Resolved::Pending));
        assert_eq!(c.resolve(&packets[2]), Ok(Resolved::Pending));
        assert_eq!(
            c.resolve(&packets[3]),
            Err(Error::MissingPacket { serial: 0x71 })
        );
        assert_eq!(c.buffered(), 0);
    }
}
