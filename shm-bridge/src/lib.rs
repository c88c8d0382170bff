//! `shm-bridge`: forwards framed TCP packets into a shared-memory ring.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐  bytes   ┌─────────────┐  Packet  ┌────────────┐
//!  │  Client  │─────────▶│ FrameReader │─────────▶│ RingWriter │
//!  └──────────┘   TCP    └──────┬──────┘          └─────┬──────┘
//!                               │ one per               │ head/tail + data
//!                        ┌──────▼──────┐          ┌─────▼──────┐
//!                        │ Connection  │          │  Segment   │◀── host drains
//!                        └──────┬──────┘          └────────────┘
//!                               │ owned by
//!                        ┌──────▼──────────────────────────────┐
//!                        │ Bridge (listener + event loop)      │
//!                        └─────────────────────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]      : wire format (header layout, routing ids, encoding)
//! - [`framing`]     : cut complete packets out of a byte stream
//! - [`segment`]     : map the shared segment, bounds-checked copies
//! - [`ring`]        : producer/consumer cursor arithmetic over the segment
//! - [`state`]       : connection lifecycle states
//! - [`connection`]  : one client stream and the set that owns them
//! - [`shutdown`]    : cooperative stop token
//! - [`config`]      : runtime parameters and their validation
//! - [`bridge`]      : context object and single-threaded event loop
//!
//! Delivery is best effort: a packet that does not fit the ring is dropped
//! and the client is not told.

pub mod bridge;
pub mod config;
pub mod connection;
pub mod framing;
pub mod packet;
pub mod ring;
pub mod segment;
pub mod shutdown;
pub mod state;

pub use bridge::{Bridge, BridgeError, BridgeStats};
pub use config::BridgeConfig;
pub use packet::{Packet, Protocol};
pub use ring::{RingReader, RingWriter};
pub use segment::Segment;
