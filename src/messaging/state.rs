//! Connection state bookkeeping
//!
//! Transitions: `Disconnected → Connected → Draining → Closed`, with
//! `Connected ↔ Disconnected` while the client reconnects. `Closed` and
//! `Exhausted` are terminal; nothing moves a connection out of them.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use super::MessagingError;

/// Lifecycle state of the bus connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Not connected; the client may be reconnecting
    Disconnected = 0,
    /// Connected and accepting requests
    Connected = 1,
    /// Refusing new requests while in-flight ones finish
    Draining = 2,
    /// Released
    Closed = 3,
    /// Closed by the client after the reconnect budget ran out
    Exhausted = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connected,
            2 => Self::Draining,
            3 => Self::Closed,
            4 => Self::Exhausted,
            _ => Self::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Draining => "draining",
            Self::Closed => "closed",
            Self::Exhausted => "max-reconnects-exhausted",
        };
        f.write_str(name)
    }
}

/// Shared, lock-free connection state
#[derive(Debug)]
pub struct ConnectionStatus {
    state: AtomicU8,
}

impl ConnectionStatus {
    /// Start in `Disconnected`
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
        }
    }

    /// Current state
    #[must_use]
    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Apply `next` unless `allowed` rejects the current state.
    /// Returns the previous state on success.
    fn transition(
        &self,
        next: ConnectionState,
        allowed: impl Fn(ConnectionState) -> bool,
    ) -> Option<ConnectionState> {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let current = ConnectionState::from_u8(current);
                allowed(current).then_some(next as u8)
            })
            .ok()
            .map(ConnectionState::from_u8)
    }

    /// (Re)connected. Ignored once draining or closed.
    pub fn mark_connected(&self) -> bool {
        self.transition(ConnectionState::Connected, |s| s == ConnectionState::Disconnected)
            .is_some()
    }

    /// Connection lost. Ignored once draining or closed.
    pub fn mark_disconnected(&self) -> bool {
        self.transition(ConnectionState::Disconnected, |s| s == ConnectionState::Connected)
            .is_some()
    }

    /// Enter `Draining`. Returns `false` if a drain already started or the
    /// connection is closed, in which case the caller must not drain again.
    pub fn begin_drain(&self) -> bool {
        self.transition(ConnectionState::Draining, |s| {
            matches!(s, ConnectionState::Connected | ConnectionState::Disconnected)
        })
        .is_some()
    }

    /// Connection released. Keeps `Exhausted` if already set.
    pub fn mark_closed(&self) {
        let _ = self.transition(ConnectionState::Closed, |s| s != ConnectionState::Exhausted);
    }

    /// Reconnect budget exhausted.
    pub fn mark_exhausted(&self) {
        self.state
            .store(ConnectionState::Exhausted as u8, Ordering::Release);
    }

    /// Reject new requests while draining or closed.
    pub fn ensure_accepting(&self) -> Result<(), MessagingError> {
        match self.get() {
            ConnectionState::Connected | ConnectionState::Disconnected => Ok(()),
            ConnectionState::Draining => Err(MessagingError::Draining),
            ConnectionState::Closed => Err(MessagingError::Closed),
            ConnectionState::Exhausted => Err(MessagingError::MaxReconnects),
        }
    }

    /// Health as seen from the state alone.
    pub fn ensure_healthy(&self) -> Result<(), MessagingError> {
        match self.get() {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Disconnected => Err(MessagingError::NotConnected),
            ConnectionState::Draining => Err(MessagingError::Draining),
            ConnectionState::Closed => Err(MessagingError::Closed),
            ConnectionState::Exhausted => Err(MessagingError::MaxReconnects),
        }
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::new()
    }
}
