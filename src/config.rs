//! Configuration management
//!
//! Sources, lowest precedence first:
//!
//! 1. built-in defaults
//! 2. YAML file (`--config`)
//! 3. `ACCESS_GATEWAY_*` environment variables (`__` separates sections,
//!    e.g. `ACCESS_GATEWAY_MESSAGING__REQUEST_TIMEOUT=20s`)
//! 4. the flat deployment variables `HOST`, `PORT`, `JWKS_URL`, `ISSUER`,
//!    `AUDIENCE`, `NATS_URL` and `DEBUG`
//! 5. command-line flags (applied by the caller)

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Prefix for structured environment overrides
pub const ENV_PREFIX: &str = "ACCESS_GATEWAY_";

/// Flat deployment variables and the config keys they set
const DEPLOYMENT_ENV: &[(&str, &str)] = &[
    ("HOST", "server.host"),
    ("PORT", "server.port"),
    ("JWKS_URL", "auth.jwks_url"),
    ("ISSUER", "auth.issuer"),
    ("AUDIENCE", "auth.audience"),
    ("NATS_URL", "messaging.url"),
];

/// Lenient boolean switch for debug mode
const DEBUG_ENV: &str = "DEBUG";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Token validation configuration
    pub auth: AuthConfig,
    /// Message bus configuration
    pub messaging: MessagingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Verbose logging
    pub debug: bool,
    /// Budget for each of the concurrent shutdown steps
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            debug: false,
            shutdown_timeout: Duration::from_secs(25),
        }
    }
}

/// Token validation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    /// JWKS endpoint
    pub jwks_url: String,
    /// Expected `iss` claim
    pub issuer: String,
    /// Expected `aud` claim
    pub audience: String,
    /// How long a fetched key set is trusted before refresh
    #[serde(with = "humantime_serde")]
    pub jwks_cache_ttl: Duration,
    /// Minimum spacing between forced key-set refreshes on unknown `kid`s
    #[serde(with = "humantime_serde")]
    pub jwks_min_refresh_interval: Duration,
    /// Allowed clock difference when checking `exp`, `nbf` and `iat`
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,
    /// Timeout for a single key-set fetch
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwks_url: "http://heimdall:4457/.well-known/jwks".to_string(),
            issuer: "heimdall".to_string(),
            audience: "access-check".to_string(),
            jwks_cache_ttl: Duration::from_secs(5 * 60),
            jwks_min_refresh_interval: Duration::from_secs(30),
            clock_skew: Duration::from_secs(5),
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

/// Message bus configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MessagingConfig {
    /// NATS server URL
    pub url: String,
    /// Subject the decision backend listens on
    pub subject: String,
    /// Per-request reply timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Reconnect attempts before the connection is given up (at least 1)
    pub max_reconnects: usize,
    /// Fixed wait between reconnect attempts
    #[serde(with = "humantime_serde")]
    pub reconnect_wait: Duration,
    /// How long a drain waits for in-flight requests
    #[serde(with = "humantime_serde")]
    pub drain_timeout: Duration,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            url: "nats://nats:4222".to_string(),
            subject: "dev.lfx.access_check.request".to_string(),
            request_timeout: Duration::from_secs(15),
            max_reconnects: 60,
            reconnect_wait: Duration::from_secs(2),
            drain_timeout: Duration::from_secs(25),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(
                Env::raw()
                    .only(&DEPLOYMENT_ENV.iter().map(|(var, _)| *var).collect::<Vec<_>>())
                    .map(|var| deployment_key(var.as_str()).into()),
            );

        let mut config = Self::from_figment(&figment)?;
        config.apply_debug_override(env::var(DEBUG_ENV).ok().as_deref());
        config.validate()?;
        Ok(config)
    }

    /// Extract configuration from an already assembled figment
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Apply the `DEBUG` variable. Unset or empty leaves the value alone.
    pub fn apply_debug_override(&mut self, raw: Option<&str>) {
        if let Some(raw) = raw.filter(|r| !r.trim().is_empty()) {
            self.server.debug = parse_bool(raw);
        }
    }

    /// Reject configurations the gateway cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(Error::Config("server.host must not be empty".to_string()));
        }
        Url::parse(&self.auth.jwks_url)
            .map_err(|e| Error::Config(format!("auth.jwks_url is not a valid URL: {e}")))?;
        if self.auth.issuer.is_empty() {
            return Err(Error::Config("auth.issuer must not be empty".to_string()));
        }
        if self.auth.audience.is_empty() {
            return Err(Error::Config("auth.audience must not be empty".to_string()));
        }
        Url::parse(&self.messaging.url)
            .map_err(|e| Error::Config(format!("messaging.url is not a valid URL: {e}")))?;
        if self.messaging.subject.is_empty() {
            return Err(Error::Config("messaging.subject must not be empty".to_string()));
        }
        // The NATS client treats zero as "reconnect forever".
        if self.messaging.max_reconnects == 0 {
            return Err(Error::Config(
                "messaging.max_reconnects must be at least 1".to_string(),
            ));
        }
        // In-flight backend calls must be able to finish inside the shutdown window.
        if self.messaging.request_timeout >= self.server.shutdown_timeout {
            return Err(Error::Config(format!(
                "messaging.request_timeout ({:?}) must be shorter than server.shutdown_timeout ({:?})",
                self.messaging.request_timeout, self.server.shutdown_timeout
            )));
        }
        Ok(())
    }
}

/// Map a flat deployment variable to its nested config key
fn deployment_key(var: &str) -> String {
    DEPLOYMENT_ENV
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(var))
        .map_or_else(|| var.to_ascii_lowercase(), |(_, key)| (*key).to_string())
}

/// Parse a boolean leniently.
///
/// `true`, `1`, `yes`, `y`, `on`, `t` (any case, surrounding whitespace
/// ignored) are true; everything else is false.
#[must_use]
pub fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "y" | "on" | "t"
    )
}
