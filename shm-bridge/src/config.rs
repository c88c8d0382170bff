//! Bridge configuration.
//!
//! Every knob has a default matching the host's expectations (port, ring
//! size); the binary overrides them from command-line flags.  The ring
//! capacity in particular must equal what the host used to create the
//! segment, so it is never hard-coded anywhere else.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::packet::HEADER_LEN;

/// TCP port clients connect to.
pub const DEFAULT_PORT: u16 = 10088;

/// Data-region size the host creates the segment with.
pub const DEFAULT_CAPACITY: usize = 200 * 1024;

/// Name of the host's inbound segment.
pub const DEFAULT_SEGMENT_NAME: &str = "1002_r";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("ring capacity must be in 2..=u32::MAX, got {0}")]
    Capacity(usize),
    #[error("a {packet} byte packet (max payload {max_payload}) can never fit a {capacity} byte ring")]
    PayloadExceedsRing {
        max_payload: usize,
        packet: usize,
        capacity: usize,
    },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Runtime parameters for one bridge instance.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Address the listener binds.
    pub listen: SocketAddr,
    /// Path of the shared segment to open.
    pub segment_path: PathBuf,
    /// Data-region size of the ring, excluding the control block.
    pub capacity: usize,
    /// Largest payload a header may declare before the connection is dropped.
    pub max_payload: usize,
    /// Scratch buffer size for one receive.
    pub recv_buffer: usize,
    /// Upper bound on one readiness wait.
    pub poll_timeout: Duration,
    /// Pause between loop turns.
    pub idle_sleep: Duration,
    /// Receives attempted per connection per turn.
    pub reads_per_turn: usize,
    /// Connections beyond this are closed as soon as they are accepted.
    pub max_connections: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            segment_path: default_segment_path(),
            capacity: DEFAULT_CAPACITY,
            max_payload: 64 * 1024,
            recv_buffer: 4096,
            poll_timeout: Duration::from_secs(1),
            idle_sleep: Duration::from_millis(10),
            reads_per_turn: 8,
            max_connections: 10,
        }
    }
}

impl BridgeConfig {
    /// Check the values against each other before anything is opened.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity < 2 || u32::try_from(self.capacity).is_err() {
            return Err(ConfigError::Capacity(self.capacity));
        }
        // One byte of the ring always stays free.
        let packet = HEADER_LEN.saturating_add(self.max_payload);
        if packet >= self.capacity {
            return Err(ConfigError::PayloadExceedsRing {
                max_payload: self.max_payload,
                packet,
                capacity: self.capacity,
            });
        }
        if self.recv_buffer == 0 {
            return Err(ConfigError::Zero("recv_buffer"));
        }
        if self.reads_per_turn == 0 {
            return Err(ConfigError::Zero("reads_per_turn"));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Zero("max_connections"));
        }
        Ok(())
    }
}

/// `/dev/shm/<name>` where POSIX shared memory lives, else the temp dir.
pub fn default_segment_path() -> PathBuf {
    let shm = PathBuf::from("/dev/shm");
    if shm.is_dir() {
        shm.join(DEFAULT_SEGMENT_NAME)
    } else {
        std::env::temp_dir().join(DEFAULT_SEGMENT_NAME)
    }
}
