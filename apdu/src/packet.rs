// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Protocol V2 packet framing
//!
//! Messages are split into packets of at most the link packet size, each led
//! by a single header byte:
//!
//! - `0x80 | n` where `n < 0x70`: a single packet message with `n` valid bytes,
//!   or the terminal packet of a multi-packet message
//! - `0x80 | 0x70`: the first packet of a multi-packet message
//! - `0x70..=0x7f`: a continuation packet carrying its serial number,
//!   serials start at `0x71` and wrap from `0x7f` back to `0x70`
//!
//! A packet whose second byte is `0xfc` or above is an unsolicited device
//! notification and always fits in a single packet.

use std::collections::{BTreeMap, VecDeque};

use crate::Error;

/// Header bit marking the first (or terminal) packet of a message
pub const HEAD_PREFIX: u8 = 0x80;

/// First serial number, markers below this are byte counts
pub const SERIAL_START: u8 = 0x70;

/// Last serial number before wrapping
pub const SERIAL_END: u8 = 0x7f;

/// Notification packets have a second byte at or above this threshold
pub const NOTIFY_THRESHOLD: u8 = 0xfc;

/// Fetch the serial following `s`, wrapping within the serial range
pub fn next_serial(s: u8) -> u8 {
    if s >= SERIAL_END {
        SERIAL_START
    } else {
        s + 1
    }
}

/// Check a link packet size is usable for V2 framing
///
/// Terminal packets encode their byte count below [`SERIAL_START`], which
/// bounds the packet size.
pub fn check_packet_size(packet_size: usize) -> Result<usize, Error> {
    match packet_size {
        2..=0x70 => Ok(packet_size),
        _ => Err(Error::InvalidPacketSize(packet_size)),
    }
}

/// Check whether a packet is an unsolicited device notification
pub fn is_notification(packet: &[u8]) -> bool {
    matches!(packet.get(1), Some(b) if *b >= NOTIFY_THRESHOLD)
}

/// Split a message into V2 packets for the provided link packet size
pub fn pack(data: &[u8], packet_size: usize) -> Result<Vec<Vec<u8>>, Error> {
    let chunk_size = check_packet_size(packet_size)? - 1;

    // Single packet messages carry their length in the header
    if data.len() <= chunk_size {
        let mut p = Vec::with_capacity(data.len() + 1);
        p.push(HEAD_PREFIX | data.len() as u8);
        p.extend_from_slice(data);
        return Ok(vec![p]);
    }

    let chunks: Vec<&[u8]> = data.chunks(chunk_size).collect();
    let last = chunks.len() - 1;
    let mut serial = SERIAL_START;

    let packets = chunks
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let header = match i {
                0 => HEAD_PREFIX | SERIAL_START,
                i if i == last => HEAD_PREFIX | c.len() as u8,
                _ => {
                    serial = next_serial(serial);
                    serial
                }
            };

            let mut p = Vec::with_capacity(c.len() + 1);
            p.push(header);
            p.extend_from_slice(c);
            p
        })
        .collect();

    Ok(packets)
}

/// Reassemble a V2 message from buffered packets
///
/// Packets are expected in arrival order with the first packet leading and the
/// terminal packet last, continuation packets are placed by serial number.
pub fn unpack<P: AsRef<[u8]>>(packets: &[P]) -> Result<Vec<u8>, Error> {
    let (first, rest) = packets.split_first().ok_or(Error::MalformedResponse)?;
    let first = first.as_ref();

    let marker = match first.first() {
        Some(h) if *h >= HEAD_PREFIX => *h - HEAD_PREFIX,
        _ => return Err(Error::MalformedResponse),
    };

    // Single packet message
    let (last, middle) = match rest.split_last() {
        None if marker < SERIAL_START => return valid_bytes(first, marker).map(<[u8]>::to_vec),
        None => return Err(Error::MalformedResponse),
        Some(v) => v,
    };

    if marker != SERIAL_START {
        return Err(Error::MalformedResponse);
    }

    let last = last.as_ref();
    let count = match last.first() {
        Some(h) if (*h & !HEAD_PREFIX) < SERIAL_START => *h & !HEAD_PREFIX,
        _ => return Err(Error::MalformedResponse),
    };

    // Bucket continuation packets by serial, preserving arrival order so
    // wrapped serials resolve to the earliest packet first
    let mut buckets: BTreeMap<u8, VecDeque<&[u8]>> = BTreeMap::new();
    for p in middle {
        match p.as_ref().split_first() {
            Some((s, d)) if (SERIAL_START..=SERIAL_END).contains(s) => {
                buckets.entry(*s).or_default().push_back(d)
            }
            _ => return Err(Error::MalformedResponse),
        }
    }

    let mut data = first[1..].to_vec();

    let mut serial = SERIAL_START;
    for _ in 0..middle.len() {
        serial = next_serial(serial);

        let d = buckets
            .get_mut(&serial)
            .and_then(VecDeque::pop_front)
            .ok_or(Error::MissingPacket { serial })?;

        data.extend_from_slice(d);
    }

    data.extend_from_slice(valid_bytes(last, count)?);

    Ok(data)
}

/// Unpack a notification packet
pub fn unpack_notification(packet: &[u8]) -> Result<Vec<u8>, Error> {
    let marker = match packet.first() {
        Some(h) if (*h & !HEAD_PREFIX) < SERIAL_START => *h & !HEAD_PREFIX,
        _ => return Err(Error::MalformedResponse),
    };

    valid_bytes(packet, marker).map(<[u8]>::to_vec)
}

/// Fetch the `count` valid bytes following a packet header
fn valid_bytes(packet: &[u8], count: u8) -> Result<&[u8], Error> {
    packet
        .get(1..1 + count as usize)
        .ok_or(Error::MalformedResponse)
}
