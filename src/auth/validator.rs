//! PS256 JWT validation against a cached JWKS
//!
//! # Verification flow
//!
//! 1. Decode the JWT header (no verification) and reject any algorithm other
//!    than [`SIGNING_ALGORITHM`] before touching the key set.
//! 2. Look up the signing key by `kid` in the cached JWKS, refreshing once on
//!    an unknown `kid`.
//! 3. Verify the signature and the `exp`, `nbf`, `iss` and `aud` claims with
//!    the configured clock skew.
//! 4. Reject tokens whose `iat` lies in the future beyond the skew.
//! 5. Require a non-empty `principal` claim.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use jsonwebtoken::{
    Algorithm, DecodingKey, TokenData, Validation,
    jwk::{AlgorithmParameters, JwkSet},
};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{AuthError, Claims, JwksCache, TokenValidator};
use crate::config::AuthConfig;

/// The only accepted signature algorithm.
pub const SIGNING_ALGORITHM: Algorithm = Algorithm::PS256;

/// Claims read from the token body. Standard claims are checked by
/// `jsonwebtoken` from the raw payload.
#[derive(Debug, Deserialize)]
struct TokenClaims {
    #[serde(default)]
    principal: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    iat: Option<u64>,
}

/// JWKS-backed token validator.
pub struct JwtValidator {
    jwks_uri: String,
    issuer: String,
    audience: String,
    leeway: Duration,
    cache: Arc<JwksCache>,
}

impl JwtValidator {
    /// Create a validator from configuration.
    pub fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        let cache = JwksCache::new(
            config.jwks_cache_ttl,
            config.jwks_min_refresh_interval,
            config.fetch_timeout,
        )?;
        Ok(Self::with_cache(config, Arc::new(cache)))
    }

    /// Create a validator sharing an existing key cache.
    #[must_use]
    pub fn with_cache(config: &AuthConfig, cache: Arc<JwksCache>) -> Self {
        debug!(jwks_url = %config.jwks_url, issuer = %config.issuer, "Initializing token validator");
        Self {
            jwks_uri: config.jwks_url.clone(),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            leeway: config.clock_skew,
            cache,
        }
    }

    /// Verify a token and return its claims.
    pub async fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let header = jsonwebtoken::decode_header(token)?;
        if header.alg != SIGNING_ALGORITHM {
            return Err(AuthError::AlgorithmNotAllowed(header.alg));
        }

        let decoding_key = self.find_decoding_key(header.kid.as_deref()).await?;

        let token_data: TokenData<TokenClaims> =
            jsonwebtoken::decode(token, &decoding_key, &self.validation())?;
        let claims = token_data.claims;

        if let Some(iat) = claims.iat {
            let now = unix_now();
            if iat > now.saturating_add(self.leeway.as_secs()) {
                return Err(AuthError::IssuedInFuture { iat, now });
            }
        }

        let principal = claims
            .principal
            .filter(|p| !p.is_empty())
            .ok_or(AuthError::PrincipalRequired)?;

        Ok(Claims {
            principal,
            email: claims.email.filter(|e| !e.is_empty()),
        })
    }

    /// Probe the key endpoint through the cache.
    ///
    /// Only connectivity failures are reported; an endpoint that answers with
    /// something unusable is still reachable.
    pub async fn probe(&self) -> Result<(), AuthError> {
        match self.cache.get_or_fetch(&self.issuer, &self.jwks_uri, false).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_connectivity() => Err(AuthError::EndpointUnreachable(e.to_string())),
            Err(e) => {
                warn!(error = %e, jwks_url = %self.jwks_uri, "JWKS endpoint reachable but key set unusable");
                Ok(())
            }
        }
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.leeway = self.leeway.as_secs();
        validation.validate_nbf = true;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation
    }

    /// Find a decoding key, forcing one (rate-limited) JWKS refresh if `kid`
    /// is unknown.
    async fn find_decoding_key(&self, kid: Option<&str>) -> Result<DecodingKey, AuthError> {
        let jwks = self.cache.get_or_fetch(&self.issuer, &self.jwks_uri, false).await?;
        if let Some(key) = select_key(&jwks, kid) {
            return Ok(key);
        }

        debug!(kid = ?kid, "Key not found in cached JWKS, refreshing");
        let jwks = self.cache.get_or_fetch(&self.issuer, &self.jwks_uri, true).await?;
        select_key(&jwks, kid).ok_or_else(|| match kid {
            Some(kid) => AuthError::UnknownKeyId(kid.to_string()),
            None => AuthError::NoUsableKey,
        })
    }
}

#[async_trait]
impl TokenValidator for JwtValidator {
    async fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify(token).await
    }

    async fn health_check(&self) -> Result<(), AuthError> {
        self.probe().await
    }
}

/// Pick the RSA key matching `kid`, or the first RSA key when the token
/// carries no `kid`.
fn select_key(jwks: &JwkSet, kid: Option<&str>) -> Option<DecodingKey> {
    jwks.keys
        .iter()
        .filter(|jwk| match kid {
            Some(kid) => jwk.common.key_id.as_deref() == Some(kid),
            None => true,
        })
        .find_map(|jwk| match &jwk.algorithm {
            AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
            _ => None,
        })
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}
