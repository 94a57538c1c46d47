//! Switches an Android device into accessory mode and echoes data back to it.
//!
//! Usage: `host [VID:PID]`, where the ids are given in hexadecimal.
//! Without ids only devices that already are in accessory mode are opened.

use bytes::Bytes;
use rand::prelude::*;
use rand_xoshiro::Xoshiro128StarStar;
use std::{env, time::Duration};
use tokio::time::sleep;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use aoa::{
    host::{channel, RusbTransport},
    Accessory, AccessoryIdentity, AudioMode,
};

const SEED: u64 = 12523;
const TEST_PACKETS: usize = 100;
const TEST_PACKET_MAX_SIZE: usize = 16_384;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn init_log() {
    tracing_subscriber::registry().with(fmt::layer()).with(EnvFilter::from_default_env()).init();
    tracing_log::LogTracer::init().unwrap();
}

fn parse_ids(arg: &str) -> Option<(u16, u16)> {
    let (vid, pid) = arg.split_once(':')?;
    Some((u16::from_str_radix(vid, 16).ok()?, u16::from_str_radix(pid, 16).ok()?))
}

#[tokio::main]
async fn main() {
    init_log();

    let mut transport = RusbTransport::new(rusb::GlobalContext::default());
    if let Some(arg) = env::args().nth(1) {
        let (vid, pid) = parse_ids(&arg).expect("expected VID:PID in hexadecimal");
        transport = transport.with_device(vid, pid);
    }

    let identity = AccessoryIdentity::new(
        "Example Inc.",
        "Echo",
        "Echoes everything it receives",
        "1.0",
        "https://example.com/echo",
        "0001",
    )
    .with_audio_mode(AudioMode::None);
    let mut accessory = Accessory::new(transport, identity);

    println!("Waiting for accessory...");
    while !accessory.poll() {
        if let Some(err) = accessory.last_error() {
            eprintln!("Not connected: {err}");
        }
        sleep(POLL_INTERVAL).await;
    }
    accessory.clear_first_time();
    println!("Connected using AOA protocol {:?}", accessory.protocol_version());

    let (tx, mut rx) = channel(&accessory).await.expect("cannot open channel");
    let mut rng = Xoshiro128StarStar::seed_from_u64(SEED);

    for n in 0..TEST_PACKETS {
        let len = rng.random_range(1..=TEST_PACKET_MAX_SIZE);
        let mut data = vec![0; len];
        rng.fill_bytes(&mut data);

        tx.send(Bytes::from(data.clone())).await.expect("send failed");
        let mut echo = Vec::new();
        while echo.len() < len {
            let part = rx.recv().await.expect("receive failed");
            echo.extend_from_slice(&part);
        }
        assert_eq!(echo, data, "echo mismatch");
        println!("Packet {n}: {len} bytes echoed");
    }

    println!("Disconnecting...");
    drop(tx);
    drop(rx);

    while accessory.poll() {
        sleep(POLL_INTERVAL).await;
    }
    println!("Disconnected");
}
