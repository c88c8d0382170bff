//! Single-producer/single-consumer byte ring over a shared [`Segment`].
//!
//! [`RingWriter`] is the producer side used by the bridge.  [`RingReader`]
//! mirrors what the host does on the other end; the bridge never uses it,
//! but tests and the `inspect`/`drain` commands do.
//!
//! # Cursor contract
//!
//! - `head`: first unconsumed byte, written only by the consumer.
//! - `tail`: one past the last written byte, written only by the producer.
//! - `head == tail` means empty, so the producer always leaves one byte
//!   unused: a write is accepted only if `len < free_space`.  Otherwise a
//!   full ring would look exactly like an empty one.
//!
//! The writer loads `head` once per write and decides everything from that
//! snapshot.  The consumer only ever moves `head` forward, which can only add
//! free space, so a stale snapshot under-reports and is safe.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::segment::{Segment, SegmentError};

#[derive(Debug, Error)]
pub enum RingError {
    #[error("ring full: {needed} bytes needed, at most {writable} writable")]
    Full { needed: usize, writable: usize },
    #[error("ring cursors out of range: head={head} tail={tail} capacity={capacity}")]
    CursorOutOfRange { head: u32, tail: u32, capacity: usize },
    #[error("flush after publishing tail failed: {0}")]
    Flush(#[source] io::Error),
    #[error(transparent)]
    Segment(#[from] SegmentError),
}

/// Free bytes between `tail` and `head`, counting `head == tail` as empty.
///
/// ```text
/// tail >= head:  [....head######tail.......]   free = capacity - (tail - head)
/// tail <  head:  [####tail..........head###]   free = head - tail
/// ```
pub fn free_space(head: u32, tail: u32, capacity: usize) -> usize {
    let (head, tail) = (head as usize, tail as usize);
    if tail >= head {
        capacity - (tail - head)
    } else {
        head - tail
    }
}

/// Consistent snapshot of both cursors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursors {
    pub head: u32,
    pub tail: u32,
    pub capacity: usize,
}

impl Cursors {
    fn load(segment: &Segment) -> Result<Self, RingError> {
        let capacity = segment.capacity();
        let head = segment.load_head();
        let tail = segment.load_tail();
        if head as usize >= capacity || tail as usize >= capacity {
            return Err(RingError::CursorOutOfRange {
                head,
                tail,
                capacity,
            });
        }
        Ok(Self {
            head,
            tail,
            capacity,
        })
    }

    pub fn free(&self) -> usize {
        free_space(self.head, self.tail, self.capacity)
    }

    /// Largest write the producer will currently accept.
    pub fn writable(&self) -> usize {
        self.free() - 1
    }

    /// Bytes written but not yet consumed.
    pub fn pending(&self) -> usize {
        self.capacity - self.free()
    }
}

impl fmt::Display for Cursors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "head={} tail={} capacity={} pending={} free={}",
            self.head,
            self.tail,
            self.capacity,
            self.pending(),
            self.free()
        )
    }
}

// ---------------------------------------------------------------------------
// RingWriter
// ---------------------------------------------------------------------------

/// Producer half.  Owns the segment mapping for the bridge's lifetime.
#[derive(Debug)]
pub struct RingWriter {
    segment: Segment,
}

impl RingWriter {
    pub fn new(segment: Segment) -> Self {
        Self { segment }
    }

    pub fn capacity(&self) -> usize {
        self.segment.capacity()
    }

    pub fn cursors(&self) -> Result<Cursors, RingError> {
        Cursors::load(&self.segment)
    }

    /// Append `bytes` as one unit, or reject without touching anything.
    ///
    /// On success the data is copied, `tail` is published with release
    /// ordering, and the mapping is flushed.  A [`RingError::Flush`] means the
    /// tail was already published.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), RingError> {
        if bytes.is_empty() {
            return Ok(());
        }

        let cursors = self.cursors()?;
        let writable = cursors.writable();
        if bytes.len() > writable {
            return Err(RingError::Full {
                needed: bytes.len(),
                writable,
            });
        }

        let capacity = cursors.capacity;
        let tail = cursors.tail as usize;
        let new_tail = if tail + bytes.len() <= capacity {
            self.segment.write_at(tail, bytes)?;
            (tail + bytes.len()) % capacity
        } else {
            let first = capacity - tail;
            self.segment.write_at(tail, &bytes[..first])?;
            self.segment.write_at(0, &bytes[first..])?;
            bytes.len() - first
        };

        // new_tail < capacity <= u32::MAX, checked when the segment was mapped.
        self.segment.store_tail(new_tail as u32);
        self.segment.flush().map_err(RingError::Flush)?;

        log::debug!(
            "[ring] wrote {} bytes, tail {} -> {} (head {})",
            bytes.len(),
            tail,
            new_tail,
            cursors.head
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RingReader
// ---------------------------------------------------------------------------

/// Consumer half, the same role the host plays.
#[derive(Debug)]
pub struct RingReader {
    segment: Segment,
}

impl RingReader {
    pub fn new(segment: Segment) -> Self {
        Self { segment }
    }

    pub fn cursors(&self) -> Result<Cursors, RingError> {
        Cursors::load(&self.segment)
    }

    /// Copy out everything between `head` and `tail` without consuming it.
    pub fn peek(&self) -> Result<Vec<u8>, RingError> {
        let cursors = self.cursors()?;
        self.copy_pending(&cursors)
    }

    /// Copy out everything between `head` and `tail` and advance `head`.
    pub fn read_available(&mut self) -> Result<Vec<u8>, RingError> {
        let cursors = self.cursors()?;
        let out = self.copy_pending(&cursors)?;
        self.segment.store_head(cursors.tail);
        Ok(out)
    }

    /// Advance `head` by `n` bytes (wrapping) without copying anything.
    pub fn consume(&mut self, n: usize) -> Result<(), RingError> {
        let cursors = self.cursors()?;
        let n = n.min(cursors.pending());
        let head = (cursors.head as usize + n) % cursors.capacity;
        self.segment.store_head(head as u32);
        Ok(())
    }

    fn copy_pending(&self, cursors: &Cursors) -> Result<Vec<u8>, RingError> {
        let (head, tail) = (cursors.head as usize, cursors.tail as usize);
        let mut out = vec![0u8; cursors.pending()];
        if tail >= head {
            self.segment.read_at(head, &mut out)?;
        } else {
            let first = cursors.capacity - head;
            self.segment.read_at(head, &mut out[..first])?;
            self.segment.read_at(0, &mut out[first..])?;
        }
        Ok(out)
    }
}
