//! Wire-format definitions for remote-call packets.
//!
//! Every message a client sends is a [`Packet`]: a fixed-size [`Header`]
//! followed by an opaque payload whose length the header declares.  This
//! module is responsible for:
//! - Defining the on-wire binary layout (header fields, routing ids).
//! - Parsing a header from the front of a byte slice.
//! - Building a packet for transmission (used by the `send` client).
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are in **host-native** byte order, matching the
//! packed struct the host process reads back out of the ring.  Nothing is
//! padded.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          Total Size                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           Protocol            |           Server Id           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |         Sub-Protocol          |                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+                               +
//! |                  Function Name (32 bytes)                     |
//! +                               +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                               |        Payload Length         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |        Payload Length         |         Payload ...           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 46 bytes.
//! size(4) + protocol(2) + server(2) + sub_protocol(2) + name(32) + payload_len(4)

use std::borrow::Cow;

use thiserror::Error;

/// Width of the fixed function-name field.
pub const FUNCTION_NAME_LEN: usize = 32;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 46;

// Byte offsets of each field within the serialised header.
const OFF_SIZE: usize = 0;
const OFF_PROTOCOL: usize = 4;
const OFF_SERVER: usize = 6;
const OFF_SUB_PROTOCOL: usize = 8;
const OFF_NAME: usize = 10;
const OFF_PAYLOAD_LEN: usize = 42;

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

/// Routing identifier carried in the first header word after the size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Call a named function inside the host (`202`).
    RemoteCall,
    /// Any other routing id; forwarded untouched.
    Unknown(u16),
}

impl Protocol {
    pub const REMOTE_CALL_ID: u16 = 202;

    pub fn from_u16(value: u16) -> Self {
        match value {
            Self::REMOTE_CALL_ID => Protocol::RemoteCall,
            other => Protocol::Unknown(other),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            Protocol::RemoteCall => Self::REMOTE_CALL_ID,
            Protocol::Unknown(v) => v,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::RemoteCall => write!(f, "remote-call"),
            Protocol::Unknown(v) => write!(f, "protocol#{v}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Fixed-size packet header, decoded into host types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Total size declared by the sender.  Informational only; framing relies
    /// on `payload_len`.
    pub total_size: u32,
    pub protocol: Protocol,
    pub server: u16,
    pub sub_protocol: u16,
    /// Raw name field; not guaranteed to be NUL terminated.
    pub function_name: [u8; FUNCTION_NAME_LEN],
    /// Length of the payload that follows the header.
    pub payload_len: u32,
}

impl Header {
    /// Parse a header from the front of `buf`.
    ///
    /// Returns `None` if fewer than [`HEADER_LEN`] bytes are available.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN {
            return None;
        }

        Some(Header {
            total_size: u32::from_ne_bytes(field(buf, OFF_SIZE)),
            protocol: Protocol::from_u16(u16::from_ne_bytes(field(buf, OFF_PROTOCOL))),
            server: u16::from_ne_bytes(field(buf, OFF_SERVER)),
            sub_protocol: u16::from_ne_bytes(field(buf, OFF_SUB_PROTOCOL)),
            function_name: field(buf, OFF_NAME),
            payload_len: u32::from_ne_bytes(field(buf, OFF_PAYLOAD_LEN)),
        })
    }

    /// Serialise into the first [`HEADER_LEN`] bytes of `buf`.
    fn write_to(&self, buf: &mut [u8]) {
        buf[OFF_SIZE..OFF_SIZE + 4].copy_from_slice(&self.total_size.to_ne_bytes());
        buf[OFF_PROTOCOL..OFF_PROTOCOL + 2].copy_from_slice(&self.protocol.to_u16().to_ne_bytes());
        buf[OFF_SERVER..OFF_SERVER + 2].copy_from_slice(&self.server.to_ne_bytes());
        buf[OFF_SUB_PROTOCOL..OFF_SUB_PROTOCOL + 2]
            .copy_from_slice(&self.sub_protocol.to_ne_bytes());
        buf[OFF_NAME..OFF_NAME + FUNCTION_NAME_LEN].copy_from_slice(&self.function_name);
        buf[OFF_PAYLOAD_LEN..OFF_PAYLOAD_LEN + 4].copy_from_slice(&self.payload_len.to_ne_bytes());
    }

    /// Function name up to the first NUL (or the full field), lossily decoded.
    pub fn function_name(&self) -> Cow<'_, str> {
        let end = self
            .function_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(FUNCTION_NAME_LEN);
        String::from_utf8_lossy(&self.function_name[..end])
    }

    /// Header plus declared payload, in bytes.
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.payload_len as usize
    }
}

/// Copy `N` bytes starting at `off` into an array.  Callers check bounds.
fn field<const N: usize>(buf: &[u8], off: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[off..off + N]);
    out
}

// ---------------------------------------------------------------------------
// Packet
// ---------------------------------------------------------------------------

/// A complete packet: decoded header plus the exact bytes received.
///
/// The raw bytes are what goes into the ring; the host parses them itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    header: Header,
    bytes: Vec<u8>,
}

impl Packet {
    /// Build a packet ready for transmission.
    ///
    /// `total_size` and `payload_len` are computed from `payload`.  The name is
    /// NUL padded; a name that fills all [`FUNCTION_NAME_LEN`] bytes is allowed
    /// and carries no terminator.
    pub fn new(
        protocol: Protocol,
        server: u16,
        sub_protocol: u16,
        function_name: &str,
        payload: &[u8],
    ) -> Result<Self, PacketError> {
        let name = function_name.as_bytes();
        if name.len() > FUNCTION_NAME_LEN {
            return Err(PacketError::FunctionNameTooLong(name.len()));
        }
        let total = HEADER_LEN + payload.len();
        let (Ok(total_size), Ok(payload_len)) = (u32::try_from(total), u32::try_from(payload.len()))
        else {
            return Err(PacketError::PayloadTooLarge(payload.len()));
        };

        let mut function_name = [0u8; FUNCTION_NAME_LEN];
        function_name[..name.len()].copy_from_slice(name);

        let header = Header {
            total_size,
            protocol,
            server,
            sub_protocol,
            function_name,
            payload_len,
        };
        let mut bytes = vec![0u8; total];
        header.write_to(&mut bytes);
        bytes[HEADER_LEN..].copy_from_slice(payload);

        Ok(Packet { header, bytes })
    }

    /// Wrap a fully framed byte run.  `bytes.len()` must equal `header.frame_len()`.
    pub(crate) fn from_frame(header: Header, bytes: Vec<u8>) -> Self {
        debug_assert_eq!(bytes.len(), header.frame_len());
        Packet { header, bytes }
    }

    /// Parse exactly one packet from `buf`.
    ///
    /// Returns `None` if `buf` is short or carries trailing bytes.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        let header = Header::parse(buf)?;
        if buf.len() != header.frame_len() {
            return None;
        }
        Some(Packet {
            header,
            bytes: buf.to_vec(),
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The trailing payload view.
    pub fn payload(&self) -> &[u8] {
        &self.bytes[HEADER_LEN..]
    }

    /// Header and payload exactly as they travel on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Errors that can arise when building a packet.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("function name is {0} bytes, the field holds 32")]
    FunctionNameTooLong(usize),
    #[error("payload of {0} bytes does not fit a 32-bit length")]
    PayloadTooLarge(usize),
}
