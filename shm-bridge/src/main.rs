//! Entry point for `shm-bridge`.
//!
//! Parses CLI arguments and dispatches into one of the subcommands.  All
//! actual work is delegated to library modules; `main.rs` owns only process
//! setup (logging, signal handling, argument parsing).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use shm_bridge::config::{self, BridgeConfig};
use shm_bridge::framing;
use shm_bridge::{Bridge, Packet, Protocol, RingReader, Segment};

/// Bridge framed TCP packets into a shared-memory ring buffer.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Args)]
struct SegmentArgs {
    /// Shared segment to map (created by the host).
    #[arg(short, long, default_value_os_t = config::default_segment_path())]
    segment: PathBuf,
    /// Data-region size the segment was created with, in bytes.
    #[arg(short, long, default_value_t = config::DEFAULT_CAPACITY)]
    capacity: usize,
}

#[derive(Subcommand)]
enum Mode {
    /// Accept clients and forward their packets into the ring.
    Serve {
        /// Local address to bind.
        #[arg(short, long, default_value = "0.0.0.0:10088")]
        bind: SocketAddr,
        #[command(flatten)]
        segment: SegmentArgs,
        /// Largest payload a packet may declare.
        #[arg(long, default_value_t = 64 * 1024)]
        max_payload: usize,
        /// Maximum simultaneous clients.
        #[arg(long, default_value_t = 10)]
        max_connections: usize,
        /// Readiness wait timeout in milliseconds.
        #[arg(long, default_value_t = 1000)]
        poll_timeout_ms: u64,
    },
    /// Send one remote-call packet to a running bridge.
    Send {
        /// Bridge address.
        #[arg(short, long, default_value = "127.0.0.1:10088")]
        server: SocketAddr,
        /// Function name (at most 32 bytes).
        function: String,
        /// Payload, sent as UTF-8 bytes.
        #[arg(default_value = "")]
        payload: String,
        /// Server id header field.
        #[arg(long, default_value_t = 0)]
        server_id: u16,
        /// Sub-protocol header field.
        #[arg(long, default_value_t = 0)]
        sub_protocol: u16,
    },
    /// Create an empty segment file (normally the host's job).
    Init {
        #[command(flatten)]
        segment: SegmentArgs,
    },
    /// Print the ring cursors without consuming anything.
    Inspect {
        #[command(flatten)]
        segment: SegmentArgs,
    },
    /// Consume everything pending and list the packets found.
    Drain {
        #[command(flatten)]
        segment: SegmentArgs,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Serve {
            bind,
            segment,
            max_payload,
            max_connections,
            poll_timeout_ms,
        } => {
            let config = BridgeConfig {
                listen: bind,
                segment_path: segment.segment,
                capacity: segment.capacity,
                max_payload,
                max_connections,
                poll_timeout: Duration::from_millis(poll_timeout_ms),
                ..BridgeConfig::default()
            };
            serve(config).await
        }
        Mode::Send {
            server,
            function,
            payload,
            server_id,
            sub_protocol,
        } => {
            let packet = Packet::new(
                Protocol::RemoteCall,
                server_id,
                sub_protocol,
                &function,
                payload.as_bytes(),
            )?;
            let mut stream = TcpStream::connect(server)
                .await
                .with_context(|| format!("connecting to {server}"))?;
            stream.write_all(packet.as_bytes()).await?;
            stream.shutdown().await?;
            log::info!("sent {}() with {} payload bytes to {server}", function, payload.len());
            Ok(())
        }
        Mode::Init { segment } => {
            Segment::create(&segment.segment, segment.capacity)?;
            log::info!(
                "created {} with a {} byte ring",
                segment.segment.display(),
                segment.capacity
            );
            Ok(())
        }
        Mode::Inspect { segment } => {
            let reader = RingReader::new(Segment::open(&segment.segment, segment.capacity)?);
            println!("{}", reader.cursors()?);
            Ok(())
        }
        Mode::Drain { segment } => {
            let mut reader = RingReader::new(Segment::open(&segment.segment, segment.capacity)?);
            let bytes = reader.read_available()?;
            let (packets, trailing) = framing::split_packets(&bytes, segment.capacity)?;
            for packet in &packets {
                let h = packet.header();
                println!(
                    "{} server={} sub={} {}() payload={} bytes",
                    h.protocol,
                    h.server,
                    h.sub_protocol,
                    h.function_name(),
                    h.payload_len
                );
            }
            if trailing > 0 {
                bail!("{trailing} trailing bytes do not form a packet");
            }
            Ok(())
        }
    }
}

async fn serve(config: BridgeConfig) -> Result<()> {
    let bridge = Bridge::bind(config)
        .await
        .context("failed to start bridge")?;

    let stop = bridge.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::info!("interrupt received, shutting down");
                stop.trigger();
            }
            Err(e) => log::error!("cannot listen for interrupts: {e}"),
        }
    });

    let stats = bridge.run().await;
    log::debug!("final counters: {stats:?}");
    Ok(())
}
