//! Shared test doubles for the gateway integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use access_gateway::auth::{AuthError, Claims, TokenValidator};
use access_gateway::messaging::{MessageBus, MessagingError};

/// In-process message bus with a canned reply
pub struct StubBus {
    reply: Result<Bytes, fn(&str) -> MessagingError>,
    request_delay: Duration,
    close_delay: Duration,
    healthy: AtomicBool,
    calls: AtomicUsize,
    closes: AtomicUsize,
    sent: Mutex<Vec<(String, String)>>,
}

impl StubBus {
    /// Reply with `reply` to every request
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Ok(Bytes::copy_from_slice(reply.as_bytes())),
            request_delay: Duration::ZERO,
            close_delay: Duration::ZERO,
            healthy: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Fail every request with "no responders"
    pub fn without_responders() -> Self {
        Self {
            reply: Err(|subject| MessagingError::NoResponders(subject.to_string())),
            ..Self::replying("")
        }
    }

    /// Delay each reply
    #[must_use]
    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    /// Delay `close`
    #[must_use]
    pub fn with_close_delay(mut self, delay: Duration) -> Self {
        self.close_delay = delay;
        self
    }

    /// Report unhealthy from `health_check`
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Number of `request` calls
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of `close` calls
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// `(subject, payload)` of every request, in order
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl MessageBus for StubBus {
    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        _timeout: Duration,
    ) -> Result<Bytes, MessagingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().push((
            subject.to_string(),
            String::from_utf8_lossy(&payload).into_owned(),
        ));
        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }
        match &self.reply {
            Ok(reply) => Ok(reply.clone()),
            Err(make) => Err(make(subject)),
        }
    }

    async fn close(&self) -> Result<(), MessagingError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if !self.close_delay.is_zero() {
            tokio::time::sleep(self.close_delay).await;
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), MessagingError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MessagingError::NotConnected)
        }
    }
}

/// Validator that treats the token itself as the principal.
///
/// `"expired"` fails validation and `"anonymous"` carries an empty principal.
pub struct StubValidator {
    calls: AtomicUsize,
}

impl StubValidator {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `validate_token` calls
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenValidator for StubValidator {
    async fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match token {
            "expired" => Err(AuthError::Jwt(
                jsonwebtoken::errors::ErrorKind::ExpiredSignature.into(),
            )),
            "anonymous" => Ok(Claims {
                principal: String::new(),
                email: None,
            }),
            principal => Ok(Claims {
                principal: principal.to_string(),
                email: Some(format!("{principal}@example.org")),
            }),
        }
    }

    async fn health_check(&self) -> Result<(), AuthError> {
        Ok(())
    }
}

/// A bus and validator pair, kept for assertions after wiring
pub fn stubs(reply: &str) -> (Arc<StubValidator>, Arc<StubBus>) {
    (Arc::new(StubValidator::new()), Arc::new(StubBus::replying(reply)))
}
