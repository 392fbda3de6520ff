// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Transport exchange state machine
//!
//! A [Transport] allows a single exchange in flight at a time, moving through
//! [State::Idle] -> [State::Sending] -> [State::AwaitingResponse] and back to
//! idle once the exchange completes, fails or times out. Inbound packets are
//! pushed by the physical driver through a [Receiver], which drives the
//! [ResolverChain] and completes the pending exchange or dispatches
//! notifications.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use encdec::Decode;
use log::{debug, trace, warn};
use strum::Display;
use tokio::sync::oneshot;

use hwlink_apdu::{
    awaits_user,
    codec::{self, L1_HEADER},
    packet, Command, V1Status, Version,
};

use crate::{
    resolver::{Resolved, ResolverChain},
    Error, Options, Physical,
};

/// Exchange state
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display)]
pub enum State {
    /// No exchange in flight
    Idle,
    /// Writing command packets
    Sending,
    /// Waiting for the device to respond
    AwaitingResponse,
}

/// Notification handler
pub type NotifyFn = Arc<dyn Fn(&[u8]) + Send + Sync>;

type Pending = oneshot::Sender<Result<Vec<u8>, hwlink_apdu::Error>>;

/// Per-transport session state, shared with the [Receiver]
struct Session {
    chain: ResolverChain,
    state: State,
    pending: Option<Pending>,
    on_notify: Option<NotifyFn>,
}

impl Session {
    /// Deliver a result to the pending exchange
    fn complete(&mut self, r: Result<Vec<u8>, hwlink_apdu::Error>) {
        self.chain.reset_all();

        match self.pending.take() {
            Some(tx) => {
                if tx.send(r).is_err() {
                    debug!("Exchange dropped before completion");
                }
            }
            None => warn!("Discarding response with no pending exchange: {:02x?}", r),
        }
    }

    /// Return to idle, clearing any partial frame state
    fn finish(&mut self) {
        self.chain.reset_all();
        self.pending = None;
        self.state = State::Idle;
    }
}

fn lock(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Returns the session to idle when an exchange ends, including on
/// cancellation of the exchange future
struct SessionGuard<'a>(&'a Mutex<Session>);

impl<'a> Drop for SessionGuard<'a> {
    fn drop(&mut self) {
        lock(self.0).finish();
    }
}

/// Inbound packet handle for physical drivers
#[derive(Clone)]
pub struct Receiver {
    session: Arc<Mutex<Session>>,
}

impl Receiver {
    /// Deliver an inbound packet
    ///
    /// Must be called once per packet in arrival order, and must not be
    /// re-entered from a notification handler.
    pub fn receive_data(&self, packet: &[u8]) {
        let (handler, notification) = {
            let mut s = lock(&self.session);

            match s.chain.resolve(packet) {
                Ok(Resolved::Complete(r)) => {
                    debug!("Response complete ({} bytes)", r.len());
                    s.complete(Ok(r));
                    return;
                }
                Ok(Resolved::Notification(n)) => match s.on_notify.clone() {
                    Some(h) => (h, n),
                    None => {
                        debug!("Unhandled notification: {}", hex::encode(&n));
                        return;
                    }
                },
                Ok(_) => return,
                Err(e) => {
                    warn!("Response failed: {}", e);
                    s.complete(Err(e));
                    return;
                }
            }
        };

        // Handlers run outside the session lock
        handler(&notification);
    }
}

/// Transport for exchanging commands with a device over a [Physical] link
pub struct Transport<P: Physical> {
    physical: P,
    version: Version,
    opts: Options,
    session: Arc<Mutex<Session>>,
}

impl<P: Physical> Transport<P> {
    /// Create a transport for a negotiated protocol version
    pub fn new(physical: P, version: Version, opts: Options) -> Self {
        debug!(
            "Creating {} transport (packet size: {}, {:?})",
            version,
            physical.packet_size(),
            opts
        );

        let session = Session {
            chain: ResolverChain::new(version),
            state: State::Idle,
            pending: None,
            on_notify: None,
        };

        Self {
            physical,
            version,
            opts,
            session: Arc::new(Mutex::new(session)),
        }
    }

    /// Protocol version for this transport
    pub fn version(&self) -> Version {
        self.version
    }

    /// Fetch a handle for delivering inbound packets
    pub fn receiver(&self) -> Receiver {
        Receiver {
            session: self.session.clone(),
        }
    }

    /// Deliver an inbound packet, see [Receiver::receive_data]
    pub fn receive_data(&self, packet: &[u8]) {
        self.receiver().receive_data(packet)
    }

    /// Register a handler for unsolicited device notifications
    pub fn on_notification<F: Fn(&[u8]) + Send + Sync + 'static>(&self, f: F) {
        lock(&self.session).on_notify = Some(Arc::new(f));
    }

    /// Current exchange state
    pub fn state(&self) -> State {
        lock(&self.session).state
    }

    /// Bytes held by the resolver chain
    pub fn buffered(&self) -> usize {
        lock(&self.session).chain.buffered()
    }

    /// Exchange a command with the device, returning the raw response
    ///
    /// Under V2, V1 commands are wrapped for tunneling when `auto_tunnel` is
    /// set and the tunnel prefix is removed from the response.
    pub async fn exchange(&self, command: &[u8]) -> Result<Vec<u8>, Error> {
        let data = match self.version {
            Version::V2 if self.opts.auto_tunnel && !codec::is_l1(command) => {
                codec::wrap_l1(command)
            }
            _ => command.to_vec(),
        };

        // Class / instruction of the V1 command being sent, if any
        let apdu = match self.version {
            Version::V1 => Command::decode(&data).ok().map(|(c, _)| (c.cla, c.ins)),
            Version::V2 => codec::untunnel(&data).map(|c| (c.cla, c.ins)),
        };
        let user = apdu.map_or(false, |(cla, ins)| awaits_user(cla, ins));
        let tunneled = self.version == Version::V2 && apdu.map_or(false, |(cla, _)| cla != 0);

        let packets = self.packetize(&data)?;

        let (tx, rx) = oneshot::channel();
        {
            let mut s = lock(&self.session);
            if s.state != State::Idle {
                return Err(Error::Busy);
            }

            s.chain.reset_all();
            s.chain.set_sent(&data);
            s.pending = Some(tx);
            s.state = State::Sending;
        }

        let _guard = SessionGuard(&self.session);

        debug!(
            "Sending {} bytes in {} packets (command: {:02x?})",
            data.len(),
            packets.len(),
            apdu
        );

        for p in &packets {
            trace!("tx: {}", hex::encode(p));
            self.physical.write(p).await.map_err(Error::Transport)?;
        }

        {
            let mut s = lock(&self.session);
            if s.pending.is_some() {
                s.state = State::AwaitingResponse;
            }
        }

        let r = match user {
            true => {
                debug!("Awaiting user interaction");
                rx.await
            }
            false => match tokio::time::timeout(self.opts.request_timeout(), rx).await {
                Ok(r) => r,
                Err(_) => {
                    warn!("Timeout after {:?}", self.opts.request_timeout());
                    return Err(Error::Timeout);
                }
            },
        };

        let mut resp = r.map_err(|_| Error::Closed)??;

        if tunneled && resp.len() >= L1_HEADER.len() {
            resp.drain(..L1_HEADER.len());
        }

        Ok(resp)
    }

    /// Exchange a V1 command, returning the response payload
    pub async fn exchange_apdu(&self, cmd: &Command<'_>) -> Result<Vec<u8>, Error> {
        let mut data = cmd.to_vec()?;
        if self.version == Version::V2 {
            data = codec::wrap_l1(&data);
        }

        let resp = self.exchange(&data).await?;

        let r = codec::decode_v1_response(&resp)?;
        V1Status::parse(r.status)?.into_result()?;

        Ok(r.payload.to_vec())
    }

    /// Split outgoing bytes into link packets
    fn packetize(&self, data: &[u8]) -> Result<Vec<Vec<u8>>, Error> {
        let packet_size = self.physical.packet_size();

        let packets = match self.version {
            Version::V1 => {
                if packet_size == 0 {
                    return Err(hwlink_apdu::Error::InvalidPacketSize(packet_size).into());
                }

                // V1 pads the final packet to the full packet size
                let mut packets: Vec<Vec<u8>> = data
                    .chunks(packet_size)
                    .map(|c| {
                        let mut p = c.to_vec();
                        p.resize(packet_size, 0);
                        p
                    })
                    .collect();

                if packets.is_empty() {
                    packets.push(vec![0u8; packet_size]);
                }

                packets
            }
            Version::V2 => packet::pack(data, packet_size)?,
        };

        Ok(packets)
    }
}

#[cfg(test)]
mod test {
    use async_trait::async_trait;

    use super::*;

    struct Null(usize);

    #[async_trait]
    impl Physical for Null {
        fn packet_size(&self) -> usize {
            self.0
        }

        async fn write(&self, _packet: &[u8]) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn v1_packets_padded() {
        let t = Transport::new(Null(64), Version::V1, Options::default());

        let c = codec::encode_v1(0x80, 0x01, 0, 0, &[0x11; 100]).unwrap();
        let packets = t.packetize(&c).unwrap();

        assert_eq!(packets.len(), 2);
        assert!(packets.iter().all(|p| p.len() == 64));
        assert_eq!(&packets[0][..], &c[..64]);
        assert_eq!(&packets[1][..c.len() - 64], &c[64..]);
        assert!(packets[1][c.len() - 64..].iter().all(|b| *b == 0));
    }

    #[test]
    fn v2_packets_unpadded() {
        let t = Transport::new(Null(20), Version::V2, Options::default());

        let c = codec::wrap_l1(&codec::encode_v1(0x80, 0x01, 0, 0, &[0x11; 30]).unwrap());
        let packets = t.packetize(&c).unwrap();

        assert_eq!(packets.len(), 3);
        assert_eq!(packets[2].len(), 1 + c.len() - 38);
        assert_eq!(packet::unpack(&packets).unwrap(), c);
    }

    #[test]
    fn invalid_packet_size() {
        let t = Transport::new(Null(0x100), Version::V2, Options::default());

        assert!(matches!(
            t.packetize(&[0x00]),
            Err(Error::Protocol(hwlink_apdu::Error::InvalidPacketSize(0x100)))
        ));
    }

    #[test]
    fn notification_handler() {
        let t = Transport::new(Null(64), Version::V2, Options::default());

        let received = Arc::new(Mutex::new(vec![]));
        let r = received.clone();
        t.on_notification(move |n| r.lock().unwrap().push(n.to_vec()));

        t.receive_data(&[0x82, 0xfc, 0x07]);

        assert_eq!(*received.lock().unwrap(), vec![vec![0xfc, 0x07]]);
        assert_eq!(t.state(), State::Idle);
    }
}
