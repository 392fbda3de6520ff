// Copyright (c) 2022-2023 The MobileCoin Foundation

use clap::Parser;
use log::{debug, info, LevelFilter};

use hwlink::{
    apdu::{Class, Command, Instruction},
    Options, Transport, Version,
};
use hwlink_sim::*;

/// Hardware wallet link simulator
///
/// Runs a get-version exchange against an in-process simulated device,
/// exercising packetisation and response resolution for the selected
/// protocol version.
#[derive(Clone, Debug, PartialEq, Parser)]
pub struct Args {
    /// Protocol version
    #[clap(long, default_value = "v1")]
    version: Version,

    /// Firmware version reported by the simulated device
    #[clap(long, default_value = "1.87")]
    firmware: String,

    /// Emit a device notification before the exchange (V2 only)
    #[clap(long)]
    notify: bool,

    #[clap(flatten)]
    sim_opts: SimOptions,

    #[clap(flatten)]
    transport_opts: Options,

    /// Log level
    #[clap(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: LevelFilter,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Setup logging
    let log_cfg = simplelog::ConfigBuilder::new().build();
    let _ = simplelog::SimpleLogger::init(args.log_level, log_cfg);

    info!(
        "Launching {} simulator (packet size: {})",
        args.version, args.sim_opts.packet_size
    );

    // Connect simulator and transport
    let device = SimDevice::new(args.version, args.sim_opts.clone());
    device.set_behaviour(Behaviour::Reply(args.firmware.as_bytes().to_vec()));

    let t = Transport::new(device.clone(), args.version, args.transport_opts.clone());
    device.attach(t.receiver());

    t.on_notification(|n| info!("Notification: {}", hex::encode(n)));

    if args.notify {
        match args.version {
            Version::V2 => device.notify(&[0xfc, 0x01])?,
            Version::V1 => debug!("Notifications unsupported under V1"),
        }
    }

    // Request firmware version
    let cmd = Command::new(Class::General as u8, Instruction::GetVersion as u8, &[]);
    let v = t.exchange_apdu(&cmd).await?;

    info!("Firmware version: {}", String::from_utf8_lossy(&v));
    debug!("{} packets written", device.written().len());

    Ok(())
}
