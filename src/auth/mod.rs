//! Bearer token verification
//!
//! Tokens are PS256-signed JWTs. Signing keys come from the issuer's JWKS
//! endpoint and are cached per issuer (see [`JwksCache`]). A successful
//! validation yields [`Claims`], which live for exactly one request.

mod jwks;
mod validator;

pub use self::jwks::JwksCache;
pub use self::validator::{JwtValidator, SIGNING_ALGORITHM};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Prefix stripped from the `Authorization` header before validation
pub const BEARER_PREFIX: &str = "Bearer ";

/// Verified identity attached to an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Caller identity; never empty.
    pub principal: String,
    /// Email address, when the issuer provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Error variants for token verification failures.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// JWT decode, signature or standard claim check failed.
    #[error("JWT verification failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// The token header names an algorithm other than the fixed one.
    #[error("JWT algorithm {0:?} not allowed")]
    AlgorithmNotAllowed(jsonwebtoken::Algorithm),

    /// The `kid` in the JWT header is not in the key set, even after refresh.
    #[error("Unknown key ID: {0}")]
    UnknownKeyId(String),

    /// The key set contains no key usable for the fixed algorithm.
    #[error("No usable signing key in key set")]
    NoUsableKey,

    /// The token claims to be issued in the future beyond the skew window.
    #[error("Token issued in the future (iat {iat}, now {now})")]
    IssuedInFuture {
        /// `iat` claim
        iat: u64,
        /// Local clock, seconds since the epoch
        now: u64,
    },

    /// The `principal` claim is missing or empty.
    #[error("principal is required")]
    PrincipalRequired,

    /// No bearer token was presented.
    #[error("missing bearer token")]
    MissingToken,

    /// Network or HTTP error while fetching the key set.
    #[error("JWKS fetch error: {0}")]
    KeyFetch(#[from] reqwest::Error),

    /// The key endpoint could not be reached at all.
    #[error("JWKS endpoint not accessible: {0}")]
    EndpointUnreachable(String),
}

impl AuthError {
    /// `true` when the key endpoint is down or timing out, as opposed to the
    /// endpoint answering with something unexpected.
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        match self {
            Self::KeyFetch(e) => e.is_connect() || e.is_timeout(),
            Self::EndpointUnreachable(_) => true,
            _ => false,
        }
    }
}

/// Token validation capability used by the access service.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Validate a raw token (no `Bearer ` prefix) and extract its claims.
    async fn validate_token(&self, token: &str) -> Result<Claims, AuthError>;

    /// Probe the key-fetch path.
    async fn health_check(&self) -> Result<(), AuthError>;
}

/// Strip an optional `Bearer ` prefix from an `Authorization` header value.
#[must_use]
pub fn strip_bearer(authorization: &str) -> &str {
    authorization
        .strip_prefix(BEARER_PREFIX)
        .unwrap_or(authorization)
        .trim()
}
