// Copyright (c) 2022-2023 The MobileCoin Foundation
#![allow(dead_code)]

use std::{
    str::FromStr,
    sync::{Arc, Mutex},
};

use log::LevelFilter;
use rand::{thread_rng, RngCore};
use simplelog::SimpleLogger;

use hwlink::{
    apdu::{Class, Command, Instruction},
    Options, Transport, Version,
};
use hwlink_sim::{Behaviour, SimDevice, SimOptions};

pub type SimTransport = Transport<Arc<SimDevice>>;

/// Setup logging, filtered by the `LOG_LEVEL` environment variable
pub fn setup_logging() {
    let log_level = match std::env::var("LOG_LEVEL").map(|v| LevelFilter::from_str(&v)) {
        Ok(Ok(l)) => l,
        _ => LevelFilter::Debug,
    };

    let _ = SimpleLogger::init(log_level, simplelog::Config::default());
}

/// Setup a simulated device and attached transport
pub fn setup(
    version: Version,
    sim_opts: SimOptions,
    behaviour: Behaviour,
    opts: Options,
) -> (Arc<SimDevice>, SimTransport) {
    setup_logging();

    let d = SimDevice::new(version, sim_opts);
    d.set_behaviour(behaviour);

    let t = Transport::new(d.clone(), version, opts);
    d.attach(t.receiver());

    (d, t)
}

/// Setup with default options for the provided packet size
pub fn setup_default(
    version: Version,
    packet_size: usize,
    behaviour: Behaviour,
) -> (Arc<SimDevice>, SimTransport) {
    setup(
        version,
        SimOptions::new(packet_size),
        behaviour,
        Options::default(),
    )
}

/// Options with a shortened request timeout
pub fn short_timeout(ms: u64) -> Options {
    Options {
        request_timeout_ms: ms,
        ..Default::default()
    }
}

/// Encoded get-version command
pub fn get_version() -> Vec<u8> {
    Command::new(Class::General as u8, Instruction::GetVersion as u8, &[])
        .to_vec()
        .unwrap()
}

/// Random payload
pub fn payload(n: usize) -> Vec<u8> {
    let mut p = vec![0u8; n];
    thread_rng().fill_bytes(&mut p);
    p
}

/// Record notifications delivered to a transport
pub fn collect_notifications(t: &SimTransport) -> Arc<Mutex<Vec<Vec<u8>>>> {
    let received = Arc::new(Mutex::new(vec![]));

    let r = received.clone();
    t.on_notification(move |n| r.lock().unwrap().push(n.to_vec()));

    received
}
