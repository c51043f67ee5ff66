//! NATS-backed message bus
//!
//! Reconnects are bounded: after `max_reconnects` failed attempts, spaced by a
//! fixed `reconnect_wait`, the client gives up and the connection is marked
//! exhausted. That state is fatal for the process and is only surfaced (error
//! log, failing health check); supervision is expected to restart us.

use std::sync::Arc;
use std::time::Duration;

use async_nats::{
    ClientError, ConnectOptions, Event,
    client::RequestErrorKind,
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use super::{ConnectionStatus, DrainGate, MessageBus, MessagingError};
use crate::config::MessagingConfig;

/// Connection name reported to the NATS server
const CLIENT_NAME: &str = "access-gateway";

/// Upper bound for the health-check round trip
const HEALTH_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Message bus over a single NATS connection
pub struct NatsBus {
    client: RwLock<Option<async_nats::Client>>,
    gate: DrainGate,
    drain_timeout: Duration,
}

impl NatsBus {
    /// Connect to the configured server.
    ///
    /// The first connection attempt is not retried; a server that is down at
    /// startup fails construction.
    pub async fn connect(config: &MessagingConfig) -> Result<Self, MessagingError> {
        info!(nats_url = %config.url, "Connecting to message bus");

        let status = Arc::new(ConnectionStatus::new());
        let events = Arc::clone(&status);
        let reconnect_wait = config.reconnect_wait;

        let client = ConnectOptions::new()
            .name(CLIENT_NAME)
            .max_reconnects(config.max_reconnects)
            .reconnect_delay_callback(move |_attempts| reconnect_wait)
            .event_callback(move |event| {
                let status = Arc::clone(&events);
                async move { observe_event(&status, &event) }
            })
            .connect(config.url.as_str())
            .await
            .map_err(|e| {
                error!(error = %e, nats_url = %config.url, "Failed to connect to message bus");
                MessagingError::Connect(e.to_string())
            })?;

        status.mark_connected();
        info!(nats_url = %config.url, "Connected to message bus");

        Ok(Self {
            client: RwLock::new(Some(client)),
            gate: DrainGate::new(status),
            drain_timeout: config.drain_timeout,
        })
    }

    fn client(&self) -> Result<async_nats::Client, MessagingError> {
        self.client.read().clone().ok_or(MessagingError::Closed)
    }
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, MessagingError> {
        let _inflight = self.gate.enter()?;
        let client = self.client()?;

        let request = async_nats::Request::new()
            .payload(payload)
            .timeout(Some(timeout));

        match client.send_request(subject.to_string(), request).await {
            Ok(message) => Ok(message.payload),
            Err(e) => {
                let err = classify_request_error(e.kind(), subject, timeout, &e.to_string());
                warn!(error = %err, subject = %subject, "Message bus request failed");
                Err(err)
            }
        }
    }

    async fn close(&self) -> Result<(), MessagingError> {
        let release = async {
            let client = self.client.write().take();
            if let Some(client) = client {
                if let Err(e) = client.flush().await {
                    warn!(error = %e, "Failed to flush message bus connection during drain");
                }
            }
        };
        self.gate.shutdown(self.drain_timeout, release).await
    }

    async fn health_check(&self) -> Result<(), MessagingError> {
        self.gate.status().ensure_healthy()?;
        let client = self.client.read().clone().ok_or(MessagingError::NotInitialized)?;

        match tokio::time::timeout(HEALTH_FLUSH_TIMEOUT, client.flush()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(MessagingError::NotResponsive(e.to_string())),
            Err(_) => Err(MessagingError::NotResponsive(format!(
                "flush timed out after {HEALTH_FLUSH_TIMEOUT:?}"
            ))),
        }
    }
}

/// Track connection events reported by the client.
fn observe_event(status: &ConnectionStatus, event: &Event) {
    match event {
        Event::Connected => {
            if status.mark_connected() {
                info!("Message bus reconnected");
            }
        }
        Event::Disconnected => {
            if status.mark_disconnected() {
                warn!("Message bus disconnected, reconnecting");
            }
        }
        Event::ClientError(ClientError::MaxReconnects) => {
            status.mark_exhausted();
            error!("{}", MessagingError::MaxReconnects);
        }
        Event::Closed => status.mark_closed(),
        other => debug!(event = %other, "Message bus event"),
    }
}

/// Map a request failure onto the gateway's error taxonomy.
fn classify_request_error(
    kind: RequestErrorKind,
    subject: &str,
    timeout: Duration,
    detail: &str,
) -> MessagingError {
    match kind {
        RequestErrorKind::TimedOut => MessagingError::Timeout {
            subject: subject.to_string(),
            timeout,
        },
        RequestErrorKind::NoResponders => MessagingError::NoResponders(subject.to_string()),
        RequestErrorKind::Other => MessagingError::Transport(detail.to_string()),
    }
}
