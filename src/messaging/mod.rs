//! Message bus client
//!
//! The gateway talks to the decision backend over NATS request/reply. A single
//! connection is shared by every in-flight request; [`NatsBus`] owns it and is
//! the only component allowed to change its state.

mod drain;
mod nats;
mod state;

pub use self::drain::DrainGate;
pub use self::nats::NatsBus;
pub use self::state::{ConnectionState, ConnectionStatus};

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

/// Message bus errors
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// Initial connection failed
    #[error("failed to connect to message bus: {0}")]
    Connect(String),

    /// No connection has been established
    #[error("message bus connection not initialized")]
    NotInitialized,

    /// The connection is down (reconnect in progress)
    #[error("message bus connection is not active")]
    NotConnected,

    /// The connection has been closed
    #[error("message bus connection is closed")]
    Closed,

    /// The connection is draining and refuses new requests
    #[error("message bus connection is draining")]
    Draining,

    /// Reconnect attempts were exhausted; the process should be restarted
    #[error("message bus max-reconnects exhausted; connection closed")]
    MaxReconnects,

    /// No reply arrived within the caller's timeout
    #[error("request on {subject} timed out after {timeout:?}")]
    Timeout {
        /// Subject the request was published on
        subject: String,
        /// Caller-supplied timeout
        timeout: Duration,
    },

    /// Nobody is subscribed to the subject
    #[error("no responders on subject {0}")]
    NoResponders(String),

    /// Any other transport failure
    #[error("message bus transport error: {0}")]
    Transport(String),

    /// The liveness round trip failed
    #[error("message bus connection not responsive: {0}")]
    NotResponsive(String),

    /// In-flight requests did not finish before the drain deadline
    #[error("drain did not complete within {0:?}")]
    DrainTimeout(Duration),
}

/// Request/reply transport to the decision backend.
///
/// Implementations must be safe to share across tasks; concurrent `request`
/// calls go over the same underlying connection.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish `payload` on `subject` and wait up to `timeout` for the reply.
    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, MessagingError>;

    /// Drain and release the connection. Calling it on a closed bus is a no-op.
    async fn close(&self) -> Result<(), MessagingError>;

    /// Check that the connection is up and responsive.
    async fn health_check(&self) -> Result<(), MessagingError>;
}
