//! Access check service
//!
//! [`AccessService`] bundles the authentication gate, the access-check
//! pipeline and the health probes. It holds no per-request state; claims are
//! produced by [`AccessService::authenticate`] and handed back to
//! [`AccessService::check_access`] explicitly.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::auth::{Claims, TokenValidator, strip_bearer};
use crate::config::MessagingConfig;
use crate::messaging::MessageBus;
use crate::{Error, Result};

/// The only API version accepted by `check_access`
pub const API_VERSION: &str = "1";

/// Body returned by the health probes
pub const HEALTHY: &str = "OK";

/// A batch of access checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRequest {
    /// API version from the `v` query parameter
    pub version: String,
    /// Opaque `resource:id:action` tokens
    pub requests: Vec<String>,
}

/// Backend decisions, in the order the backend sent them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// One entry per non-empty reply line
    pub results: Vec<String>,
}

/// Authentication, access checks and health reporting
#[derive(Clone)]
pub struct AccessService {
    validator: Option<Arc<dyn TokenValidator>>,
    bus: Option<Arc<dyn MessageBus>>,
    subject: String,
    request_timeout: Duration,
    log_payloads: bool,
}

impl AccessService {
    /// Wire the service to its two dependencies.
    #[must_use]
    pub fn new(validator: Arc<dyn TokenValidator>, bus: Arc<dyn MessageBus>) -> Self {
        Self::unwired().with_validator(validator).with_bus(bus)
    }

    /// A service with no dependencies. It reports not-ready and rejects
    /// every check until both are supplied.
    #[must_use]
    pub fn unwired() -> Self {
        let defaults = MessagingConfig::default();
        Self {
            validator: None,
            bus: None,
            subject: defaults.subject,
            request_timeout: defaults.request_timeout,
            log_payloads: false,
        }
    }

    /// Set the token validator
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn TokenValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Set the message bus
    #[must_use]
    pub fn with_bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Override the subject checks are published on
    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Override the per-request reply timeout
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Log request elements and reply lines at debug level. Meant for
    /// debug deployments only; payloads name principals and resources.
    #[must_use]
    pub fn with_payload_logging(mut self, enabled: bool) -> Self {
        self.log_payloads = enabled;
        self
    }

    /// Whether payloads are logged
    #[must_use]
    pub fn logs_payloads(&self) -> bool {
        self.log_payloads
    }

    /// Authentication gate: validate an `Authorization` header value.
    pub async fn authenticate(&self, authorization: Option<&str>) -> Result<Claims> {
        let Some(validator) = &self.validator else {
            error!("Token validator not initialized");
            return Err(Error::Internal("auth validator not initialized".to_string()));
        };

        let token = authorization.map(strip_bearer).unwrap_or_default();
        if token.is_empty() {
            return Err(Error::Unauthorized("missing bearer token".to_string()));
        }

        match validator.validate_token(token).await {
            Ok(claims) => {
                debug!(principal = %claims.principal, "Token validated");
                Ok(claims)
            }
            Err(e) => {
                warn!(error = %e, "Token validation failed");
                Err(Error::Unauthorized(e.to_string()))
            }
        }
    }

    /// Run one batch of checks for an authenticated caller.
    pub async fn check_access(
        &self,
        claims: Option<&Claims>,
        request: &CheckRequest,
    ) -> Result<CheckResult> {
        let Some(claims) = claims else {
            error!("Access check without authentication context");
            return Err(Error::Unauthorized("invalid authentication context".to_string()));
        };

        if request.version != API_VERSION {
            warn!(version = %request.version, "Unsupported API version");
            return Err(Error::BadRequest(format!(
                "unsupported API version: {}",
                request.version
            )));
        }

        if self.log_payloads {
            debug!(principal = %claims.principal, requests = ?request.requests, "Access check request payload");
        }

        if request.requests.is_empty() {
            debug!("Empty requests array");
            return Ok(CheckResult::default());
        }

        let results = self
            .run_check(&claims.principal, &request.requests)
            .await
            .inspect_err(|e| {
                error!(error = %e, principal = %claims.principal, "Access check failed");
            })?;

        if self.log_payloads {
            debug!(principal = %claims.principal, results = ?results.results, "Access check response payload");
        }
        info!(
            principal = %claims.principal,
            requests_count = request.requests.len(),
            results_count = results.results.len(),
            "Access check completed"
        );
        Ok(results)
    }

    /// Build the message, query the backend, parse the reply. The first
    /// failure ends the call; no partial results are returned.
    async fn run_check(&self, principal: &str, requests: &[String]) -> Result<CheckResult> {
        if principal.is_empty() {
            return Err(Error::BadRequest("principal is required".to_string()));
        }

        let message = access_wire::build_message(principal, requests);
        if message.is_empty() {
            debug!("No non-empty request elements, skipping backend");
            return Ok(CheckResult::default());
        }

        let Some(bus) = &self.bus else {
            return Err(Error::BadRequest(
                "message bus request failed: message bus not initialized".to_string(),
            ));
        };

        let reply = bus
            .request(&self.subject, Bytes::from(message), self.request_timeout)
            .await
            .map_err(|e| {
                error!(error = %e, subject = %self.subject, "Message bus request failed");
                Error::BadRequest(format!("message bus request failed: {e}"))
            })?;

        let results = access_wire::parse_reply(&reply).map_err(|e| {
            match &e {
                access_wire::WireError::UnexpectedResponse { preview } => {
                    error!(response_preview = %preview, "Unexpected response from access check service");
                }
            }
            Error::BadRequest(e.to_string())
        })?;

        Ok(CheckResult { results })
    }

    /// Readiness: both dependencies present and healthy.
    pub async fn readyz(&self) -> Result<&'static str> {
        let mut issues = Vec::new();

        match &self.bus {
            None => issues.push("message bus not initialized".to_string()),
            Some(bus) => {
                if let Err(e) = bus.health_check().await {
                    issues.push(format!("message bus unhealthy: {e}"));
                }
            }
        }

        match &self.validator {
            None => issues.push("auth validator not initialized".to_string()),
            Some(validator) => {
                if let Err(e) = validator.health_check().await {
                    issues.push(format!("auth validator unhealthy: {e}"));
                }
            }
        }

        if issues.is_empty() {
            debug!("Readiness check passed");
            Ok(HEALTHY)
        } else {
            error!(issues = ?issues, "Readiness check failed");
            Err(Error::NotReady(format!(
                "service dependencies unhealthy: [{}]",
                issues.join(", ")
            )))
        }
    }

    /// Liveness: always healthy while the process runs.
    #[must_use]
    pub fn livez(&self) -> &'static str {
        HEALTHY
    }
}
