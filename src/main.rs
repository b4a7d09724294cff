use std::net::{Ipv4Addr, SocketAddrV4};

use anyhow::{bail, Context, Result};
use clap::Parser;

use pktblast::packet::build_udp;
use pktblast::platform::{now_micros, pin_to_cpu};
use pktblast::{BackendKind, Config, Dest, Driver};

/// Command line options.
#[derive(Parser, Debug)]
#[clap(author, version, about = "UDP batch blaster over the best available send path")]
struct Args {
    /// Destination address, e.g. 127.0.0.1:9000.
    #[clap(short, long)]
    dest: SocketAddrV4,

    /// Source address stamped on raw L3 frames.
    #[clap(long, default_value = "127.0.0.1")]
    source: Ipv4Addr,

    /// Total number of packets to send.
    #[clap(short, long, default_value_t = 100_000)]
    count: u64,

    /// Packets per batch.
    #[clap(short, long, default_value_t = 64)]
    batch: usize,

    /// Payload bytes per packet.
    #[clap(short, long, default_value_t = 64)]
    size: usize,

    /// Force a specific backend instead of auto-selection.
    #[clap(long, value_parser = clap::value_parser!(BackendKind))]
    backend: Option<BackendKind>,

    /// Pin the sender to this CPU.
    #[clap(long)]
    cpu: Option<usize>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    if let Some(cpu) = args.cpu {
        if let Err(e) = pin_to_cpu(cpu) {
            eprintln!("could not pin to cpu {cpu}: {e}");
        }
    }

    if args.batch == 0 {
        bail!("batch size must be at least 1");
    }

    let mut driver = Driver::open(Config {
        force_backend: args.backend,
        ..Config::default()
    })
    .context("opening driver")?;
    println!("backend: {}", driver.kind());

    // socket paths take bare payloads; the raw path wants full L3 frames
    let payload = vec![0xA5u8; args.size];
    let frames: Vec<Vec<u8>> = match driver.kind() {
        BackendKind::RawSocket => (0..args.batch)
            .map(|_| {
                build_udp(
                    args.source,
                    *args.dest.ip(),
                    54321,
                    args.dest.port(),
                    &payload,
                )
            })
            .collect::<pktblast::Result<_>>()?,
        BackendKind::AfXdp | BackendKind::Dpdk => {
            bail!("the demo drives socket paths; frame paths need L2 framing")
        }
        _ => (0..args.batch).map(|_| payload.clone()).collect(),
    };
    let batch: Vec<&[u8]> = frames.iter().map(|f| f.as_slice()).collect();
    let dest = match driver.kind() {
        BackendKind::RawSocket => Dest::InPacket,
        _ => Dest::Single(args.dest),
    };

    let start = now_micros();
    let mut sent = 0u64;
    while sent < args.count {
        let want = ((args.count - sent) as usize).min(batch.len());
        sent += driver.send_batch(&batch[..want], dest)? as u64;
    }
    let elapsed_us = now_micros().saturating_sub(start).max(1);

    let stats = driver.stats();
    let pps = stats.packets_sent as f64 / (elapsed_us as f64 / 1e6);
    let mbps = (stats.bytes_sent * 8) as f64 / elapsed_us as f64;
    println!(
        "sent {} pkts / {} bytes in {:.3}s ({:.0} pps, {:.1} Mbit/s), {} errors",
        stats.packets_sent,
        stats.bytes_sent,
        elapsed_us as f64 / 1e6,
        pps,
        mbps,
        stats.errors,
    );

    driver.close();
    Ok(())
}
