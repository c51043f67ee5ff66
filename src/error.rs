//! Error types for the access gateway

use std::io;

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::auth::AuthError;
use crate::messaging::MessagingError;

/// Result type alias for the access gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Access gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller could not be authenticated
    #[error("{0}")]
    Unauthorized(String),

    /// Request rejected: bad version, malformed payload or backend failure
    #[error("{0}")]
    BadRequest(String),

    /// One or more dependencies are unhealthy
    #[error("{0}")]
    NotReady(String),

    /// Token validator setup error
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// Message bus error outside of a request
    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status for this error
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code carried in the error body
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => error_codes::UNAUTHORIZED,
            Self::BadRequest(_) => error_codes::BAD_REQUEST,
            Self::NotReady(_) => error_codes::NOT_READY,
            _ => error_codes::INTERNAL,
        }
    }

    /// Whether the caller should wait and retry rather than give up.
    ///
    /// Only readiness failures are transient; orchestration re-probes instead
    /// of restarting.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::NotReady(_))
    }
}

/// Error codes used in [`ErrorBody::code`]
pub mod error_codes {
    /// Authentication failed
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    /// Request rejected
    pub const BAD_REQUEST: &str = "BAD_REQUEST";
    /// Dependencies unhealthy
    pub const NOT_READY: &str = "NOT_READY";
    /// Unexpected server-side failure
    pub const INTERNAL: &str = "INTERNAL";
}

/// Structured error body returned to HTTP clients
#[derive(Debug, Clone, Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    /// Human-readable message
    pub message: String,
    /// Machine-readable code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Set when the condition is transient
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub temporary: bool,
}

impl From<&Error> for ErrorBody {
    fn from(err: &Error) -> Self {
        let message = match err {
            // Internal details stay in the logs.
            Error::Config(_) | Error::Auth(_) | Error::Messaging(_) | Error::Io(_) | Error::Internal(_) => {
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        Self {
            message,
            code: Some(err.code().to_string()),
            temporary: err.is_temporary(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody::from(&self);

        if status == StatusCode::UNAUTHORIZED {
            (status, [(header::WWW_AUTHENTICATE, "Bearer")], Json(body)).into_response()
        } else {
            (status, Json(body)).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(Error::Unauthorized("x".into()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(Error::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::NotReady("x".into()).status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(Error::Internal("x".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn only_not_ready_is_temporary() {
        assert!(Error::NotReady("deps".into()).is_temporary());
        assert!(!Error::BadRequest("nope".into()).is_temporary());
        assert!(!Error::Unauthorized("nope".into()).is_temporary());
    }

    #[test]
    fn error_body_hides_internal_details() {
        let body = ErrorBody::from(&Error::Internal("db password wrong".into()));
        assert_eq!(body.message, "internal server error");
        assert_eq!(body.code.as_deref(), Some("INTERNAL"));
    }

    #[test]
    fn error_body_serializes_without_empty_fields() {
        let body = ErrorBody::from(&Error::BadRequest("unsupported API version: 2".into()));
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"message": "unsupported API version: 2", "code": "BAD_REQUEST"})
        );
    }

    #[test]
    fn not_ready_body_is_marked_temporary() {
        let body = ErrorBody::from(&Error::NotReady("service dependencies unhealthy".into()));
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["temporary"], true);
    }

    #[test]
    fn unauthorized_response_carries_challenge() {
        let response = Error::Unauthorized("bad token".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
    }
}
