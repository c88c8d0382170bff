//! Shared-memory segment mapping.
//!
//! The host process creates the segment; this process opens and maps it.
//! Layout of the mapping:
//!
//! ```text
//!  0        4        8                16
//!  +--------+--------+----------------+---------------------------+
//!  |  head  |  tail  |  pad to 16     |  data region (capacity)   |
//!  +--------+--------+----------------+---------------------------+
//!   control block     DATA_OFFSET ─────▶
//! ```
//!
//! `head` and `tail` are host-native `u32` byte offsets into the data region.
//! The consumer owns `head`; the writer owns `tail`.
//!
//! [`Segment`] keeps the mapping and its raw base pointer private.  Callers
//! only see cursor loads/stores and bounds-checked copies into and out of the
//! data region.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use memmap2::{MmapMut, MmapOptions};
use thiserror::Error;

/// Size of the `head`/`tail` control block.
pub const CONTROL_LEN: usize = 8;

/// Start of the data region: the control block rounded up to 16 bytes.
pub const DATA_OFFSET: usize = (CONTROL_LEN + 0xf) & !0xf;

/// Total mapping length for a given data-region capacity.
pub const fn segment_len(capacity: usize) -> usize {
    DATA_OFFSET + capacity
}

#[repr(C)]
struct RingControl {
    head: AtomicU32,
    tail: AtomicU32,
}

const _: () = assert!(std::mem::size_of::<RingControl>() == CONTROL_LEN);

#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("failed to open shared segment {}: {source}", .path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error("failed to map shared segment: {0}")]
    Map(#[source] io::Error),
    #[error("shared segment {} is {len} bytes, {required} required", .path.display())]
    TooSmall {
        path: PathBuf,
        len: u64,
        required: usize,
    },
    #[error("ring capacity {0} must be in 1..=u32::MAX")]
    BadCapacity(usize),
    #[error("copy of {len} bytes at offset {offset} overruns the {capacity} byte data region")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },
}

/// A mapped ring segment.
pub struct Segment {
    map: MmapMut,
    capacity: usize,
}

impl Segment {
    /// Map an existing segment whose data region is `capacity` bytes.
    ///
    /// The backing object may be larger than needed; only the first
    /// `DATA_OFFSET + capacity` bytes are mapped.
    pub fn open(path: &Path, capacity: usize) -> Result<Self, SegmentError> {
        check_capacity(capacity)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| SegmentError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        let len = file
            .metadata()
            .map_err(|source| SegmentError::Open {
                path: path.to_path_buf(),
                source,
            })?
            .len();
        let required = segment_len(capacity);
        if len < required as u64 {
            return Err(SegmentError::TooSmall {
                path: path.to_path_buf(),
                len,
                required,
            });
        }

        // SAFETY: the file is at least `required` bytes.  Concurrent writers of
        // the mapping are the host process, which only touches `head` and bytes
        // outside the region this process writes.
        let map = unsafe {
            MmapOptions::new()
                .len(required)
                .map_mut(&file)
                .map_err(SegmentError::Map)?
        };
        log::debug!("[segment] mapped {} ({required} bytes)", path.display());
        Ok(Self { map, capacity })
    }

    /// Create (or truncate) a segment file with an empty ring.
    ///
    /// Segment creation normally belongs to the host; this exists for local
    /// testing and the `init` command.
    pub fn create(path: &Path, capacity: usize) -> Result<Self, SegmentError> {
        check_capacity(capacity)?;
        let open_err = |source| SegmentError::Open {
            path: path.to_path_buf(),
            source,
        };
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(open_err)?;
        file.set_len(segment_len(capacity) as u64).map_err(open_err)?;
        drop(file);

        let segment = Self::open(path, capacity)?;
        segment.store_head(0);
        segment.store_tail(0);
        Ok(segment)
    }

    /// A process-private segment backed by anonymous memory.
    pub fn anonymous(capacity: usize) -> Result<Self, SegmentError> {
        check_capacity(capacity)?;
        let map = MmapMut::map_anon(segment_len(capacity)).map_err(SegmentError::Map)?;
        Ok(Self { map, capacity })
    }

    /// Data-region size in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn control(&self) -> &RingControl {
        // SAFETY: the mapping is page aligned and at least DATA_OFFSET bytes,
        // RingControl is repr(C) with two u32 atomics at offsets 0 and 4.
        unsafe { &*(self.map.as_ptr() as *const RingControl) }
    }

    pub fn load_head(&self) -> u32 {
        self.control().head.load(Ordering::Acquire)
    }

    pub fn load_tail(&self) -> u32 {
        self.control().tail.load(Ordering::Acquire)
    }

    pub fn store_head(&self, head: u32) {
        self.control().head.store(head, Ordering::Release);
    }

    pub fn store_tail(&self, tail: u32) {
        self.control().tail.store(tail, Ordering::Release);
    }

    /// Copy `bytes` into the data region at `offset`.
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) -> Result<(), SegmentError> {
        self.check_range(offset, bytes.len())?;
        // SAFETY: range checked above; the data region starts at DATA_OFFSET
        // and spans `capacity` bytes inside the mapping.
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.map.as_mut_ptr().add(DATA_OFFSET + offset),
                bytes.len(),
            );
        }
        Ok(())
    }

    /// Copy `out.len()` bytes out of the data region starting at `offset`.
    pub fn read_at(&self, offset: usize, out: &mut [u8]) -> Result<(), SegmentError> {
        self.check_range(offset, out.len())?;
        // SAFETY: as in write_at.
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.map.as_ptr().add(DATA_OFFSET + offset),
                out.as_mut_ptr(),
                out.len(),
            );
        }
        Ok(())
    }

    /// Push the mapping out so the other process (and the backing file) see it.
    pub fn flush(&self) -> io::Result<()> {
        self.map.flush()
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<(), SegmentError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.capacity => Ok(()),
            _ => Err(SegmentError::OutOfBounds {
                offset,
                len,
                capacity: self.capacity,
            }),
        }
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("capacity", &self.capacity)
            .field("head", &self.load_head())
            .field("tail", &self.load_tail())
            .finish()
    }
}

fn check_capacity(capacity: usize) -> Result<(), SegmentError> {
    if capacity == 0 || u32::try_from(capacity).is_err() {
        return Err(SegmentError::BadCapacity(capacity));
    }
    Ok(())
}
