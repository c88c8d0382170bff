//! Connection lifecycle states.
//!
//! ```text
//!  accept ──▶ CONNECTING ──configured──▶ ACTIVE ──EOF / error / framing──▶ CLOSED
//!                 │                                                          ▲
//!                 └──────────────── configuration failed ───────────────────┘
//! ```
//!
//! There is no half-closed state: a connection leaves the set in the same
//! loop turn it reaches [`ConnectionState::Closed`].

/// Lifecycle of one accepted client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Accepted; socket options not applied yet.
    #[default]
    Connecting,
    /// Receiving and framing bytes.
    Active,
    /// Terminal.  Removed from the connection set at the end of the turn.
    Closed,
}

impl ConnectionState {
    pub fn is_closed(self) -> bool {
        self == ConnectionState::Closed
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Active => "active",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}
