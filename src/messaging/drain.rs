//! In-flight request accounting for graceful drains
//!
//! Every request holds a token from [`DrainGate::enter`] for as long as it is
//! in flight. [`DrainGate::shutdown`] flips the connection to `Draining`,
//! waits for outstanding tokens, releases the connection and marks it closed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::task::{TaskTracker, task_tracker::TaskTrackerToken};
use tracing::{debug, error, info};

use super::{ConnectionStatus, MessagingError};

/// Admission and drain control for one connection
#[derive(Debug)]
pub struct DrainGate {
    status: Arc<ConnectionStatus>,
    inflight: TaskTracker,
}

impl DrainGate {
    /// Gate requests on `status`
    #[must_use]
    pub fn new(status: Arc<ConnectionStatus>) -> Self {
        Self {
            status,
            inflight: TaskTracker::new(),
        }
    }

    /// Connection state the gate guards
    #[must_use]
    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    /// Number of requests currently in flight
    #[must_use]
    pub fn inflight(&self) -> usize {
        self.inflight.len()
    }

    /// Admit one request. The returned token must be held until the request
    /// finishes.
    pub fn enter(&self) -> Result<TaskTrackerToken, MessagingError> {
        // Count the request before checking the state so a concurrent drain
        // either sees it or it sees the drain.
        let token = self.inflight.token();
        self.status.ensure_accepting()?;
        Ok(token)
    }

    /// Refuse new requests, wait up to `timeout` for in-flight ones, then run
    /// `release` and mark the connection closed.
    ///
    /// `release` runs even when the wait times out. A second call, or a call
    /// on a closed connection, returns `Ok(())` without running `release`.
    pub async fn shutdown<F>(&self, timeout: Duration, release: F) -> Result<(), MessagingError>
    where
        F: Future<Output = ()>,
    {
        if !self.status.begin_drain() {
            debug!(state = %self.status.get(), "Message bus already closed or draining");
            return Ok(());
        }

        info!(inflight = self.inflight(), "Draining message bus connection");
        self.inflight.close();
        let drained = tokio::time::timeout(timeout, self.inflight.wait())
            .await
            .is_ok();

        release.await;
        self.status.mark_closed();

        if drained {
            info!("Message bus connection closed");
            Ok(())
        } else {
            error!(timeout = ?timeout, "Message bus drain timed out with requests in flight");
            Err(MessagingError::DrainTimeout(timeout))
        }
    }
}
