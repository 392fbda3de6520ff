// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Simulated device

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::anyhow;
use async_trait::async_trait;
use encdec::Decode;
use log::{debug, trace};

use hwlink::{Physical, Receiver, Version};
use hwlink_apdu::{
    codec::{self, L1_HEADER},
    packet::{self, HEAD_PREFIX, SERIAL_START},
    Command, Response, V1Status, V2Status,
};

use crate::{Behaviour, SimOptions};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Simulated device, responding to commands written via [Physical]
pub struct SimDevice {
    version: Version,
    opts: SimOptions,
    behaviour: Mutex<Behaviour>,
    /// Packets of the command currently being received
    inbound: Mutex<Vec<Vec<u8>>>,
    /// Every packet written to the device
    written: Mutex<Vec<Vec<u8>>>,
    receiver: Mutex<Option<Receiver>>,
}

impl SimDevice {
    /// Create a new simulated device, echoing commands by default
    pub fn new(version: Version, opts: SimOptions) -> Arc<Self> {
        Arc::new(Self {
            version,
            opts,
            behaviour: Mutex::new(Behaviour::Echo),
            inbound: Mutex::new(vec![]),
            written: Mutex::new(vec![]),
            receiver: Mutex::new(None),
        })
    }

    /// Attach the transport receiver for response delivery
    pub fn attach(&self, receiver: Receiver) {
        *lock(&self.receiver) = Some(receiver);
    }

    /// Set behaviour for subsequent commands
    pub fn set_behaviour(&self, behaviour: Behaviour) {
        debug!("Sim behaviour: {}", behaviour);
        *lock(&self.behaviour) = behaviour;
    }

    /// Fetch packets written to the device
    pub fn written(&self) -> Vec<Vec<u8>> {
        lock(&self.written).clone()
    }

    /// Deliver raw packets to the attached transport
    pub fn deliver(&self, packets: &[Vec<u8>]) -> anyhow::Result<()> {
        let receiver = self.receiver()?;
        for p in packets {
            receiver.receive_data(p);
        }
        Ok(())
    }

    /// Send an unsolicited notification
    ///
    /// The body must lead with a notification type at or above
    /// [packet::NOTIFY_THRESHOLD] and fit in a single packet.
    pub fn notify(&self, body: &[u8]) -> anyhow::Result<()> {
        if body.len() >= self.opts.packet_size || body.len() >= SERIAL_START as usize {
            return Err(anyhow!("Notification too long ({} bytes)", body.len()));
        }

        let mut p = vec![HEAD_PREFIX | body.len() as u8];
        p.extend_from_slice(body);

        debug!("Sim notify: {}", hex::encode(body));

        self.deliver(&[p])
    }

    fn receiver(&self) -> anyhow::Result<Receiver> {
        lock(&self.receiver)
            .clone()
            .ok_or_else(|| anyhow!("Simulator not attached to a transport"))
    }

    /// Collect a written packet, returning the command once complete
    fn collect(&self, packet: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        let mut inbound = lock(&self.inbound);

        match self.version {
            Version::V1 => {
                inbound.push(packet.to_vec());
                let buff = inbound.concat();

                // Padding following the command is discarded
                match Command::decode(&buff) {
                    Ok((_, n)) => {
                        inbound.clear();
                        Ok(Some(buff[..n].to_vec()))
                    }
                    Err(_) => Ok(None),
                }
            }
            Version::V2 => {
                let head = packet.first().copied().unwrap_or_default();
                if head == HEAD_PREFIX | SERIAL_START {
                    inbound.clear();
                }
                inbound.push(packet.to_vec());

                // Wait for a single or terminal packet
                if head < HEAD_PREFIX || (head & !HEAD_PREFIX) >= SERIAL_START {
                    return Ok(None);
                }

                let packets = std::mem::take(&mut *inbound);
                let m = packet::unpack(&packets)?;
                Ok(Some(m))
            }
        }
    }

    /// Build response packets for a command
    fn respond(&self, command: &[u8], behaviour: &Behaviour) -> anyhow::Result<Vec<Vec<u8>>> {
        let (body, tunneled) = match self.version {
            Version::V1 => (command, false),
            Version::V2 => match command.strip_prefix(&L1_HEADER[..]) {
                Some(inner) => (inner, true),
                None => return self.respond_native(command, behaviour),
            },
        };

        let (cmd, _) = Command::decode(body)?;
        debug!(
            "Sim command: {:02x}/{:02x} ({} byte payload)",
            cmd.cla,
            cmd.ins,
            cmd.payload.len()
        );

        let success = V1Status::Success as u16;
        let (payload, status, echo) = match behaviour {
            Behaviour::Reply(p) => (&p[..], success, (cmd.cla, cmd.ins)),
            Behaviour::Status(s) => (&[][..], *s, (cmd.cla, cmd.ins)),
            Behaviour::Mismatch => (cmd.payload, success, (cmd.cla, cmd.ins.wrapping_add(1))),
            _ => (cmd.payload, success, (cmd.cla, cmd.ins)),
        };

        let frame = Response {
            payload,
            status,
            echo,
        }
        .to_vec()?;

        let m = match tunneled {
            true => codec::wrap_l1(&frame),
            false => frame,
        };

        self.packetize(&m, behaviour)
    }

    /// Build response packets for a V2-native command
    fn respond_native(
        &self,
        command: &[u8],
        behaviour: &Behaviour,
    ) -> anyhow::Result<Vec<Vec<u8>>> {
        debug!("Sim native command ({} bytes)", command.len());

        let mut m = vec![V2Status::Ok as u8];
        match behaviour {
            Behaviour::Reply(p) => m.extend_from_slice(p),
            Behaviour::Status(s) => m[0] = *s as u8,
            _ => m.extend_from_slice(command),
        }

        self.packetize(&m, behaviour)
    }

    /// Split a response into link packets
    fn packetize(&self, m: &[u8], behaviour: &Behaviour) -> anyhow::Result<Vec<Vec<u8>>> {
        let packet_size = self.opts.packet_size;

        let mut packets = match self.version {
            Version::V1 => m
                .chunks(packet_size)
                .map(|c| {
                    let mut p = c.to_vec();
                    p.resize(packet_size, 0);
                    p
                })
                .collect(),
            Version::V2 => packet::pack(m, packet_size)?,
        };

        if let Behaviour::Withhold(i) = behaviour {
            if *i < packets.len() {
                debug!("Sim withholding packet {} of {}", i, packets.len());
                packets.remove(*i);
            }
        }

        Ok(packets)
    }
}

#[async_trait]
impl Physical for SimDevice {
    fn packet_size(&self) -> usize {
        self.opts.packet_size
    }

    async fn write(&self, packet: &[u8]) -> anyhow::Result<()> {
        let behaviour = lock(&self.behaviour).clone();
        if behaviour == Behaviour::WriteError {
            return Err(anyhow!("Simulated write failure"));
        }

        trace!("Sim rx: {}", hex::encode(packet));
        lock(&self.written).push(packet.to_vec());

        let command = match self.collect(packet)? {
            Some(c) => c,
            None => return Ok(()),
        };

        if behaviour == Behaviour::Silent {
            debug!("Sim silent, dropping {} byte command", command.len());
            return Ok(());
        }

        let packets = self.respond(&command, &behaviour)?;
        let receiver = self.receiver()?;
        let latency = self.opts.latency();

        // Responses arrive asynchronously, as from a physical driver
        tokio::spawn(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }

            for p in packets {
                trace!("Sim tx: {}", hex::encode(&p));
                receiver.receive_data(&p);
            }
        });

        Ok(())
    }
}
