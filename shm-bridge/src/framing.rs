//! Inbound byte-stream framing.
//!
//! A TCP stream has no message boundaries, so every connection owns a
//! [`FrameReader`] that accumulates received bytes and cuts complete
//! [`Packet`]s off the front once enough of them have arrived:
//! - Fewer than [`HEADER_LEN`](crate::packet::HEADER_LEN) bytes buffered: incomplete, keep waiting.
//! - Header present but declares more than `max_payload`: [`FrameError`],
//!   the caller drops the connection.  This check runs before the payload
//!   is awaited so a hostile length cannot grow the buffer.
//! - Fewer than `HEADER_LEN + payload_len` bytes buffered: incomplete.
//! - Otherwise one packet is emitted and its bytes are removed, leaving any
//!   pipelined bytes for the next call.
//!
//! The [`FrameReader`] does **not** touch the socket; the event loop reads
//! into it and drains it (same split as the ring writer, which never sees a
//! socket either).

use thiserror::Error;

use crate::packet::{Header, Packet};

/// Framing failures.  All of them are fatal for the connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("declared payload of {declared} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { declared: u32, max: usize },
}

/// Per-connection accumulation buffer.
#[derive(Debug)]
pub struct FrameReader {
    buf: Vec<u8>,
    max_payload: usize,
}

impl FrameReader {
    /// Create an empty reader enforcing `max_payload` on every header.
    pub fn new(max_payload: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_payload,
        }
    }

    /// Append freshly received bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Cut the next complete packet off the front of the buffer.
    ///
    /// Call repeatedly until it returns `Ok(None)` to drain pipelined packets.
    pub fn next_packet(&mut self) -> Result<Option<Packet>, FrameError> {
        let Some(header) = Header::parse(&self.buf) else {
            return Ok(None);
        };

        if header.payload_len as usize > self.max_payload {
            return Err(FrameError::PayloadTooLarge {
                declared: header.payload_len,
                max: self.max_payload,
            });
        }

        let frame_len = header.frame_len();
        if self.buf.len() < frame_len {
            return Ok(None);
        }

        let rest = self.buf.split_off(frame_len);
        let frame = std::mem::replace(&mut self.buf, rest);
        Ok(Some(Packet::from_frame(header, frame)))
    }

    /// Bytes held that do not yet form a complete packet.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Discard anything partially received.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// Split an already-drained ring region into packets.
///
/// Returns the packets in order plus the number of trailing bytes that do
/// not form a complete packet.
pub fn split_packets(bytes: &[u8], max_payload: usize) -> Result<(Vec<Packet>, usize), FrameError> {
    let mut reader = FrameReader::new(max_payload);
    reader.push(bytes);
    let mut packets = Vec::new();
    while let Some(packet) = reader.next_packet()? {
        packets.push(packet);
    }
    Ok((packets, reader.buffered()))
}
