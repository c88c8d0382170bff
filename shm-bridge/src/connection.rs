//! Accepted client connections and the set that owns them.
//!
//! A [`Connection`] owns one TCP stream, its lifecycle state (see
//! [`crate::state`]) and the [`FrameReader`] holding whatever part of the
//! next packet has arrived so far.  Its responsibilities are:
//! - Applying socket options when it leaves `Connecting`.
//! - Non-blocking receives into the framer, classifying the outcome.
//! - Handing complete packets back to the event loop.
//!
//! [`ConnectionSet`] keeps connections in accept order, enforces the
//! connection limit, and lets the event loop wait until any of them is
//! readable.

use std::future::poll_fn;
use std::io;
use std::net::SocketAddr;
use std::task::Poll;

use tokio::net::TcpStream;

use crate::framing::{FrameError, FrameReader};
use crate::packet::Packet;
use crate::state::ConnectionState;

/// Outcome of one non-blocking receive.
#[derive(Debug)]
pub enum Receive {
    /// `n` bytes were appended to the framer.
    Bytes(usize),
    /// Nothing to read right now.  Not an error.
    WouldBlock,
    /// The peer closed its side.
    Eof,
    /// Unrecoverable socket error.
    Failed(io::Error),
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

pub struct Connection {
    /// Monotonic id, used only in logs.
    pub id: u64,
    pub peer: SocketAddr,
    pub state: ConnectionState,
    stream: TcpStream,
    framer: FrameReader,
}

impl Connection {
    /// Wrap a freshly accepted stream in the `Connecting` state.
    pub fn new(id: u64, stream: TcpStream, peer: SocketAddr, max_payload: usize) -> Self {
        Self {
            id,
            peer,
            state: ConnectionState::Connecting,
            stream,
            framer: FrameReader::new(max_payload),
        }
    }

    /// Configure the socket and move to `Active`.
    ///
    /// Tokio streams are already non-blocking; what is left is disabling
    /// Nagle so small packets from the client are not held back.
    pub fn activate(&mut self) -> io::Result<()> {
        self.stream.set_nodelay(true)?;
        self.state = ConnectionState::Active;
        Ok(())
    }

    /// Move to `Closed` and drop any partial packet.
    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
        self.framer.clear();
    }

    /// Read whatever is available into `scratch` and feed it to the framer.
    pub fn try_receive(&mut self, scratch: &mut [u8]) -> Receive {
        match self.stream.try_read(scratch) {
            Ok(0) => Receive::Eof,
            Ok(n) => {
                self.framer.push(&scratch[..n]);
                Receive::Bytes(n)
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Receive::WouldBlock
            }
            Err(e) => Receive::Failed(e),
        }
    }

    /// Next complete packet buffered for this connection, if any.
    pub fn next_packet(&mut self) -> Result<Option<Packet>, FrameError> {
        self.framer.next_packet()
    }

    /// Bytes of an incomplete packet currently held.
    pub fn buffered(&self) -> usize {
        self.framer.buffered()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state)
            .field("buffered", &self.framer.buffered())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ConnectionSet
// ---------------------------------------------------------------------------

/// Active connections in accept order.
#[derive(Debug)]
pub struct ConnectionSet {
    conns: Vec<Connection>,
    next_id: u64,
    limit: usize,
}

impl ConnectionSet {
    pub fn new(limit: usize) -> Self {
        Self {
            conns: Vec::new(),
            next_id: 1,
            limit,
        }
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.conns.len() >= self.limit
    }

    /// Hand out the id for the next accepted stream.
    pub fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Add a connection that has reached `Active`.
    pub fn insert(&mut self, conn: Connection) {
        debug_assert_eq!(conn.state, ConnectionState::Active);
        self.conns.push(conn);
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.conns.iter_mut()
    }

    /// Drop every `Closed` connection, returning how many went.
    pub fn remove_closed(&mut self) -> usize {
        let before = self.conns.len();
        self.conns.retain(|c| !c.state.is_closed());
        before - self.conns.len()
    }

    /// Close and drop everything (shutdown).
    pub fn clear(&mut self) -> usize {
        let n = self.conns.len();
        for conn in &mut self.conns {
            conn.close();
        }
        self.conns.clear();
        n
    }

    /// Resolve once any active connection reports read readiness.
    ///
    /// Never resolves while the set is empty; callers race it against a
    /// timer and the listener.
    pub async fn readable(&self) {
        poll_fn(|cx| {
            for conn in &self.conns {
                if conn.state == ConnectionState::Active
                    && conn.stream.poll_read_ready(cx).is_ready()
                {
                    return Poll::Ready(());
                }
            }
            Poll::Pending
        })
        .await
    }
}
