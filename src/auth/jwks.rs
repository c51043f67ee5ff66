//! JWKS caching
//!
//! Key sets are cached per issuer and refreshed once the TTL elapses. Callers
//! that see an unknown `kid` may force a refresh to pick up a rotated key
//! without waiting for expiry. Forced refreshes are rate limited per issuer:
//! within `min_refresh_interval` of the last fetch the cached set is served
//! instead, so unknown `kid`s cannot drive traffic to the issuer.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use jsonwebtoken::jwk::JwkSet;
use tracing::debug;

use super::AuthError;

/// Cached JWKS entry.
struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
}

/// JWKS cache, one entry per issuer.
pub struct JwksCache {
    inner: DashMap<String, CachedJwks>,
    http: reqwest::Client,
    ttl: Duration,
    min_refresh_interval: Duration,
}

impl JwksCache {
    /// Create a cache.
    ///
    /// `ttl` bounds how long a key set is trusted, `min_refresh_interval` how
    /// often a forced refresh may hit the endpoint, and `fetch_timeout` a
    /// single fetch.
    pub fn new(
        ttl: Duration,
        min_refresh_interval: Duration,
        fetch_timeout: Duration,
    ) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .connect_timeout(fetch_timeout)
            .build()?;

        Ok(Self {
            inner: DashMap::new(),
            http,
            ttl,
            min_refresh_interval,
        })
    }

    /// Return the cached JWKS for `issuer`, or fetch from `jwks_uri` if stale.
    ///
    /// If `force_refresh` is `true`, the TTL is ignored, but a key set fetched
    /// less than `min_refresh_interval` ago is still served from the cache.
    pub async fn get_or_fetch(
        &self,
        issuer: &str,
        jwks_uri: &str,
        force_refresh: bool,
    ) -> Result<JwkSet, AuthError> {
        if let Some(cached) = self.inner.get(issuer) {
            let age = cached.fetched_at.elapsed();
            let fresh_enough = if force_refresh {
                age < self.min_refresh_interval
            } else {
                age < self.ttl
            };
            if fresh_enough {
                if force_refresh {
                    debug!(issuer = %issuer, age = ?age, "Forced JWKS refresh suppressed");
                }
                return Ok(cached.keys.clone());
            }
        }

        debug!(issuer = %issuer, jwks_uri = %jwks_uri, force_refresh, "Fetching JWKS");
        let jwks: JwkSet = self
            .http
            .get(jwks_uri)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        self.inner.insert(
            issuer.to_string(),
            CachedJwks {
                keys: jwks.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(jwks)
    }
}
