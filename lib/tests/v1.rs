// Copyright (c) 2022-2023 The MobileCoin Foundation

use std::{sync::Arc, time::Duration};

use hwlink::{
    apdu::{self, decode_v1_response, Class, Command, DeviceStatus, Instruction, V1Status},
    Error, State, Version,
};
use hwlink_sim::{Behaviour, SimOptions};

mod helpers;
use helpers::*;

#[tokio::test]
async fn get_version() -> anyhow::Result<()> {
    let (d, t) = setup_default(Version::V1, 64, Behaviour::Reply(b"1.87".to_vec()));

    let r = t.exchange(&helpers::get_version()).await?;
    assert_eq!(r, &[0x04, 0x00, b'1', b'.', b'8', b'7', 0x90, 0x00, 0x70, 0x13]);

    let r = decode_v1_response(&r)?;
    assert_eq!(r.payload, b"1.87");
    assert_eq!(r.status, V1Status::Success as u16);

    // Single padded command packet
    let written = d.written();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].len(), 64);
    assert_eq!(&written[0][..12], &helpers::get_version()[..]);

    assert_eq!(t.state(), State::Idle);
    assert_eq!(t.buffered(), 0);

    Ok(())
}

#[tokio::test]
async fn exchange_payloads() -> anyhow::Result<()> {
    let (_d, t) = setup_default(Version::V1, 64, Behaviour::Echo);

    // Single and multi-packet commands / responses
    for n in [0, 1, 51, 52, 58, 59, 64, 100, 300] {
        let p = payload(n);
        let cmd = Command::new(Class::Sign as u8, 0x10, &p);

        let r = t.exchange_apdu(&cmd).await?;
        assert_eq!(r, p, "payload mismatch ({n} bytes)");
        assert_eq!(t.buffered(), 0);
    }

    Ok(())
}

#[tokio::test]
async fn multi_packet_command() -> anyhow::Result<()> {
    let (d, t) = setup_default(Version::V1, 64, Behaviour::Echo);

    let p = payload(100);
    let cmd = Command::new(Class::Sign as u8, 0x10, &p).to_vec()?;

    let r = t.exchange(&cmd).await?;
    assert_eq!(decode_v1_response(&r)?.payload, &p[..]);

    let written = d.written();
    assert_eq!(written.len(), 2);
    assert_eq!(written.concat()[..cmd.len()], cmd[..]);

    Ok(())
}

#[tokio::test]
async fn status_error() -> anyhow::Result<()> {
    let (_d, t) = setup_default(Version::V1, 64, Behaviour::Status(0x5003));

    let e = t.exchange(&helpers::get_version()).await.unwrap_err();
    assert_eq!(
        e.status(),
        Some(DeviceStatus::V1(V1Status::InstructionError))
    );

    assert_eq!(t.state(), State::Idle);
    assert_eq!(t.buffered(), 0);

    Ok(())
}

#[tokio::test]
async fn unknown_status() -> anyhow::Result<()> {
    let (_d, t) = setup_default(Version::V1, 64, Behaviour::Status(0x6d00));

    let e = t.exchange(&helpers::get_version()).await.unwrap_err();
    assert!(matches!(
        e,
        Error::Protocol(apdu::Error::UnknownStatus(0x6d00))
    ));

    Ok(())
}

#[tokio::test]
async fn command_mismatch() -> anyhow::Result<()> {
    let (_d, t) = setup_default(Version::V1, 64, Behaviour::Mismatch);

    let e = t.exchange(&helpers::get_version()).await.unwrap_err();
    assert!(matches!(
        e,
        Error::Protocol(apdu::Error::CommandMismatch {
            expected: (0x70, 0x13),
            actual: (0x70, 0x14),
        })
    ));

    Ok(())
}

#[tokio::test]
async fn unmatched_commands_pass() -> anyhow::Result<()> {
    let (_d, t) = setup_default(Version::V1, 64, Behaviour::Mismatch);

    // Unknown classes are not matched against the response
    let cmd = Command::new(0x42, 0x01, &[0x01, 0x02]).to_vec()?;
    let r = t.exchange(&cmd).await?;

    assert_eq!(decode_v1_response(&r)?.echo, (0x42, 0x02));

    Ok(())
}

#[tokio::test]
async fn timeout() -> anyhow::Result<()> {
    let (d, t) = setup(
        Version::V1,
        SimOptions::new(64),
        Behaviour::Silent,
        short_timeout(50),
    );

    let e = t.exchange(&helpers::get_version()).await.unwrap_err();
    assert!(matches!(e, Error::Timeout));

    assert_eq!(t.state(), State::Idle);
    assert_eq!(t.buffered(), 0);

    // Transport is usable following a timeout
    d.set_behaviour(Behaviour::Reply(b"1.87".to_vec()));
    let cmd = Command::new(Class::General as u8, Instruction::GetVersion as u8, &[]);
    assert_eq!(t.exchange_apdu(&cmd).await?, b"1.87");

    Ok(())
}

#[tokio::test]
async fn busy() -> anyhow::Result<()> {
    let (d, t) = setup(
        Version::V1,
        SimOptions::new(64),
        Behaviour::Silent,
        short_timeout(200),
    );
    let t = Arc::new(t);

    let t1 = t.clone();
    let pending = tokio::spawn(async move { t1.exchange(&helpers::get_version()).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(t.state(), State::AwaitingResponse);

    // Second exchange is rejected without writing
    let e = t.exchange(&helpers::get_version()).await.unwrap_err();
    assert!(matches!(e, Error::Busy));
    assert_eq!(d.written().len(), 1);

    assert!(matches!(pending.await?, Err(Error::Timeout)));
    assert_eq!(t.state(), State::Idle);

    Ok(())
}

#[tokio::test]
async fn write_error() -> anyhow::Result<()> {
    let (d, t) = setup_default(Version::V1, 64, Behaviour::WriteError);

    let e = t.exchange(&helpers::get_version()).await.unwrap_err();
    assert!(matches!(e, Error::Transport(_)));

    assert!(d.written().is_empty());
    assert_eq!(t.state(), State::Idle);

    Ok(())
}

#[tokio::test]
async fn cancelled_exchange() -> anyhow::Result<()> {
    let (_d, t) = setup(
        Version::V1,
        SimOptions::new(64),
        Behaviour::Silent,
        short_timeout(1000),
    );

    // Dropping the exchange future returns the transport to idle
    let r = tokio::time::timeout(Duration::from_millis(20), t.exchange(&helpers::get_version())).await;
    assert!(r.is_err());
    assert_eq!(t.state(), State::Idle);

    Ok(())
}

#[tokio::test]
async fn user_commands_exempt_from_timeout() -> anyhow::Result<()> {
    let sim_opts = SimOptions {
        packet_size: 64,
        latency_ms: 100,
    };

    // Commands awaiting user interaction outlast the request timeout
    let (_d, t) = setup(
        Version::V1,
        sim_opts.clone(),
        Behaviour::Echo,
        short_timeout(30),
    );
    let cmd = Command::new(Class::Sign as u8, Instruction::SignMessage as u8, b"hello");
    assert_eq!(t.exchange_apdu(&cmd).await?, b"hello");

    // Others time out
    let (_d, t) = setup(Version::V1, sim_opts, Behaviour::Echo, short_timeout(30));
    let e = t.exchange(&helpers::get_version()).await.unwrap_err();
    assert!(matches!(e, Error::Timeout));

    Ok(())
}
