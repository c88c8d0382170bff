//! The bridge context and its event loop.
//!
//! # Architecture
//!
//! ```text
//!   clients ──TCP──▶ TcpListener ──accept──▶ ConnectionSet
//!                                                │ try_read (non-blocking)
//!                                                ▼
//!                                           FrameReader ──Packet──▶ RingWriter ──▶ shared segment
//!                                                                                   (host drains)
//! ```
//!
//! One [`Bridge`] owns everything the loop touches: listener, connections,
//! ring writer, configuration and counters.  There are no globals; dropping
//! the bridge closes every socket and unmaps the segment.
//!
//! # One turn of the loop
//!
//! 1. Stop if shutdown was requested.
//! 2. Wait, at most `poll_timeout`, for the listener, any connection, or the
//!    shutdown token.
//! 3. Accept a pending client, if any.
//! 4. Drain every active connection (bounded by `reads_per_turn`) and push
//!    each complete packet into the ring.
//! 5. Remove closed connections, sleep `idle_sleep`.
//!
//! Everything runs on one task.  The only concurrency is the host process
//! reading the ring on the other side.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};

use crate::config::{BridgeConfig, ConfigError};
use crate::connection::{Connection, ConnectionSet, Receive};
use crate::packet::Packet;
use crate::ring::{RingError, RingWriter};
use crate::segment::{Segment, SegmentError};
use crate::shutdown::{self, Shutdown, ShutdownHandle};
use crate::state::ConnectionState;

// ---------------------------------------------------------------------------
// Errors and counters
// ---------------------------------------------------------------------------

/// Setup failures.  Once [`Bridge::run`] starts nothing is fatal.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Segment(#[from] SegmentError),
    #[error("segment data region is {segment} bytes but the configuration says {configured}")]
    CapacityMismatch { segment: usize, configured: usize },
    #[error("failed to listen on {addr}: {source}")]
    Listen { addr: SocketAddr, source: io::Error },
}

/// Running totals, returned by [`Bridge::run`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BridgeStats {
    pub accepted: u64,
    /// Closed on accept because the connection limit was reached.
    pub refused: u64,
    /// Removed after EOF, a socket error, or a framing error.
    pub disconnected: u64,
    /// Still open when shutdown closed them.
    pub closed_at_shutdown: u64,
    pub framing_errors: u64,
    pub packets_written: u64,
    pub bytes_written: u64,
    /// Rejected because the ring lacked space.
    pub packets_dropped: u64,
    /// Unexpected ring failures (corrupt cursors, failed flush).
    pub ring_errors: u64,
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

pub struct Bridge {
    config: BridgeConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
    connections: ConnectionSet,
    ring: RingWriter,
    shutdown: Shutdown,
    trigger: ShutdownHandle,
    stats: BridgeStats,
    scratch: Vec<u8>,
}

impl Bridge {
    /// Bind the listener and map the segment named by `config.segment_path`.
    pub async fn bind(config: BridgeConfig) -> Result<Self, BridgeError> {
        config.validate()?;
        let listener = listen(config.listen).await?;
        let segment = Segment::open(&config.segment_path, config.capacity)?;
        Self::assemble(config, listener, segment)
    }

    /// Bind the listener around an already mapped segment.
    pub async fn with_segment(config: BridgeConfig, segment: Segment) -> Result<Self, BridgeError> {
        config.validate()?;
        if segment.capacity() != config.capacity {
            return Err(BridgeError::CapacityMismatch {
                segment: segment.capacity(),
                configured: config.capacity,
            });
        }
        let listener = listen(config.listen).await?;
        Self::assemble(config, listener, segment)
    }

    fn assemble(
        config: BridgeConfig,
        listener: TcpListener,
        segment: Segment,
    ) -> Result<Self, BridgeError> {
        let local_addr = listener.local_addr().map_err(|source| BridgeError::Listen {
            addr: config.listen,
            source,
        })?;
        let (trigger, shutdown) = shutdown::channel();
        log::info!(
            "[bridge] listening on {local_addr}, ring capacity {} bytes",
            segment.capacity()
        );
        Ok(Self {
            connections: ConnectionSet::new(config.max_connections),
            ring: RingWriter::new(segment),
            scratch: vec![0u8; config.recv_buffer],
            stats: BridgeStats::default(),
            config,
            listener,
            local_addr,
            shutdown,
            trigger,
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// A handle that stops [`Bridge::run`] from any thread or task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.trigger.clone()
    }

    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Drive the loop until shutdown, then tear everything down.
    ///
    /// Partially received packets are discarded on shutdown.
    pub async fn run(mut self) -> BridgeStats {
        while !self.shutdown.is_requested() {
            self.turn().await;
            if self.shutdown.is_requested() {
                break;
            }
            tokio::time::sleep(self.config.idle_sleep).await;
        }

        self.stats.closed_at_shutdown = self.connections.clear() as u64;
        log::info!(
            "[bridge] stopped: {} packets ({} bytes) written, {} dropped, {} connections closed at shutdown",
            self.stats.packets_written,
            self.stats.bytes_written,
            self.stats.packets_dropped,
            self.stats.closed_at_shutdown
        );
        self.stats
    }

    /// One wait-accept-drain-reap cycle.
    pub async fn turn(&mut self) {
        let accepted = tokio::select! {
            biased;
            _ = self.shutdown.requested() => return,
            accepted = self.listener.accept() => Some(accepted),
            _ = self.connections.readable() => None,
            _ = tokio::time::sleep(self.config.poll_timeout) => None,
        };

        if let Some(accepted) = accepted {
            self.on_accept(accepted);
        }

        let Self {
            connections,
            ring,
            stats,
            scratch,
            config,
            ..
        } = self;
        for conn in connections.iter_mut() {
            if conn.state == ConnectionState::Active {
                service(conn, ring, stats, scratch, config.reads_per_turn);
            }
        }

        let removed = self.connections.remove_closed();
        if removed > 0 {
            log::debug!(
                "[bridge] removed {removed} connection(s), {} active",
                self.connections.len()
            );
        }
    }

    fn on_accept(&mut self, accepted: io::Result<(TcpStream, SocketAddr)>) {
        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(e) => {
                log::error!("[bridge] accept failed: {e}");
                return;
            }
        };

        if self.connections.is_full() {
            self.stats.refused += 1;
            log::warn!(
                "[bridge] refusing {peer}: {} connections already open",
                self.connections.len()
            );
            return;
        }

        let id = self.connections.allocate_id();
        let mut conn = Connection::new(id, stream, peer, self.config.max_payload);
        match conn.activate() {
            Ok(()) => {
                self.stats.accepted += 1;
                log::info!("[conn #{id}] connected from {peer}");
                self.connections.insert(conn);
            }
            Err(e) => {
                log::warn!("[conn #{id}] failed to configure socket for {peer}: {e}");
                conn.close();
            }
        }
    }
}

async fn listen(addr: SocketAddr) -> Result<TcpListener, BridgeError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| BridgeError::Listen { addr, source })
}

// ---------------------------------------------------------------------------
// Per-connection work
// ---------------------------------------------------------------------------

/// Receive from one connection until it would block, closes, or the read
/// budget runs out.
fn service(
    conn: &mut Connection,
    ring: &mut RingWriter,
    stats: &mut BridgeStats,
    scratch: &mut [u8],
    reads: usize,
) {
    for _ in 0..reads {
        match conn.try_receive(scratch) {
            Receive::Bytes(n) => {
                log::trace!("[conn #{}] received {n} bytes", conn.id);
                if !forward_packets(conn, ring, stats) {
                    return;
                }
            }
            Receive::WouldBlock => return,
            Receive::Eof => {
                log::info!("[conn #{}] {} disconnected", conn.id, conn.peer);
                if conn.buffered() > 0 {
                    log::debug!(
                        "[conn #{}] discarding {} bytes of an incomplete packet",
                        conn.id,
                        conn.buffered()
                    );
                }
                conn.close();
                stats.disconnected += 1;
                return;
            }
            Receive::Failed(e) => {
                log::warn!("[conn #{}] receive from {} failed: {e}", conn.id, conn.peer);
                conn.close();
                stats.disconnected += 1;
                return;
            }
        }
    }
}

/// Push every complete packet into the ring.  Returns `false` if a framing
/// error closed the connection.
fn forward_packets(conn: &mut Connection, ring: &mut RingWriter, stats: &mut BridgeStats) -> bool {
    loop {
        match conn.next_packet() {
            Ok(Some(packet)) => write_packet(ring, stats, conn.id, &packet),
            Ok(None) => return true,
            Err(e) => {
                log::warn!(
                    "[conn #{}] framing error from {}: {e}; dropping connection",
                    conn.id,
                    conn.peer
                );
                stats.framing_errors += 1;
                stats.disconnected += 1;
                conn.close();
                return false;
            }
        }
    }
}

fn write_packet(ring: &mut RingWriter, stats: &mut BridgeStats, conn_id: u64, packet: &Packet) {
    let header = packet.header();
    match ring.write(packet.as_bytes()) {
        Ok(()) => {
            stats.packets_written += 1;
            stats.bytes_written += packet.len() as u64;
            log::debug!(
                "[conn #{conn_id}] {} server={} sub={} {}(): {} payload bytes -> ring",
                header.protocol,
                header.server,
                header.sub_protocol,
                header.function_name(),
                header.payload_len
            );
        }
        Err(RingError::Full { needed, writable }) => {
            stats.packets_dropped += 1;
            log::warn!(
                "[ring] dropped {needed} byte packet {}() from conn #{conn_id}: at most {writable} bytes writable",
                header.function_name()
            );
        }
        Err(RingError::Flush(e)) => {
            // The tail is already published; the host will see the packet.
            stats.packets_written += 1;
            stats.bytes_written += packet.len() as u64;
            stats.ring_errors += 1;
            log::error!("[ring] flush failed after write: {e}");
        }
        Err(e) => {
            stats.packets_dropped += 1;
            stats.ring_errors += 1;
            log::error!("[ring] write failed, packet dropped: {e}");
        }
    }
}
