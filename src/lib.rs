//! Access Gateway Library
//!
//! Authorization gateway that answers bulk access checks over HTTP by asking a
//! decision backend over NATS request/reply.
//!
//! # Features
//!
//! - **Bearer authentication**: PS256 JWTs verified against a cached JWKS
//! - **Wire bridging**: JSON batches in, newline-delimited relation lines out
//! - **Health probes**: `/readyz` checks both dependencies, `/livez` never does
//! - **Correlation ids**: `x-request-id` reused or generated, echoed and logged
//! - **Graceful shutdown**: HTTP drain and bus drain run concurrently

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod messaging;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging.
///
/// `RUST_LOG` takes precedence over `level`. `format` selects `json` output;
/// anything else is human-readable text.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| Error::Config(format!("Invalid log level '{level}': {e}")))?;

    let subscriber = tracing_subscriber::registry().with(filter);

    let result = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };
    result.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
