//! Gateway server
//!
//! Startup wires the token validator and the bus connection into one
//! [`AccessService`]. Shutdown is driven by a [`CancellationToken`]: once it
//! fires, the HTTP listener stops accepting and finishes in-flight requests
//! while the bus drains, each step bounded by the shutdown timeout.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::router::{AppState, create_router};
use super::service::AccessService;
use crate::auth::{JwtValidator, TokenValidator};
use crate::config::Config;
use crate::messaging::{MessageBus, NatsBus};
use crate::{Error, Result};

/// Access gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Access check service
    service: AccessService,
    /// Bus connection, drained on shutdown
    bus: Arc<dyn MessageBus>,
}

impl Gateway {
    /// Create a new gateway, connecting to the message bus.
    pub async fn new(config: Config) -> Result<Self> {
        let validator = Arc::new(JwtValidator::new(&config.auth)?);
        let bus = Arc::new(NatsBus::connect(&config.messaging).await?);
        Ok(Self::with_dependencies(config, validator, bus))
    }

    /// Create a gateway around already constructed dependencies.
    #[must_use]
    pub fn with_dependencies(
        config: Config,
        validator: Arc<dyn TokenValidator>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        let service = AccessService::new(validator, Arc::clone(&bus))
            .with_subject(config.messaging.subject.clone())
            .with_request_timeout(config.messaging.request_timeout)
            .with_payload_logging(config.server.debug);

        Self {
            config,
            service,
            bus,
        }
    }

    /// The wired access service
    #[must_use]
    pub fn service(&self) -> &AccessService {
        &self.service
    }

    /// Run until SIGINT or SIGTERM.
    pub async fn run(self) -> Result<()> {
        let shutdown = CancellationToken::new();
        let signals = tokio::spawn(watch_signals(shutdown.clone()));

        let result = self.run_until(shutdown.clone()).await;

        shutdown.cancel();
        let _ = signals.await;
        result
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run_until(self, shutdown: CancellationToken) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(error = %e, %addr, "Failed to bind listener");
                // Nothing was served, but the bus is already connected.
                if let Err(drain) =
                    drain_bus(self.bus.as_ref(), self.config.server.shutdown_timeout).await
                {
                    error!(error = %drain, "Message bus shutdown failed");
                }
                return Err(e.into());
            }
        };

        info!("============================================================");
        info!("ACCESS GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(
            jwks_url = %self.config.auth.jwks_url,
            issuer = %self.config.auth.issuer,
            audience = %self.config.auth.audience,
            "Token validation"
        );
        info!(
            nats_url = %self.config.messaging.url,
            subject = %self.config.messaging.subject,
            "Message bus"
        );
        info!("  POST http://{}:{}/access-check?v=1", self.config.server.host, self.config.server.port);
        info!("============================================================");

        serve(
            listener,
            self.service,
            self.bus,
            self.config.server.shutdown_timeout,
            shutdown,
        )
        .await
    }
}

/// Serve the gateway on `listener` until `shutdown` is cancelled, then stop
/// the HTTP server and drain the bus concurrently.
///
/// Returns only after both shutdown steps finished or timed out. If the
/// listener fails on its own, the bus is still drained before the error is
/// returned.
pub async fn serve(
    listener: TcpListener,
    service: AccessService,
    bus: Arc<dyn MessageBus>,
    shutdown_timeout: Duration,
    shutdown: CancellationToken,
) -> Result<()> {
    let app = create_router(Arc::new(AppState::new(service)));
    let graceful = shutdown.clone().cancelled_owned();

    let mut server: JoinHandle<io::Result<()>> = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(graceful)
            .await
    });

    let early_exit = tokio::select! {
        () = shutdown.cancelled() => None,
        joined = &mut server => Some(joined),
    };

    if let Some(joined) = early_exit {
        let http = server_outcome(joined);
        if let Err(e) = &http {
            error!(error = %e, "HTTP server stopped unexpectedly");
        }
        let bus_result = drain_bus(bus.as_ref(), shutdown_timeout).await;
        return http.and(bus_result);
    }

    info!(timeout = ?shutdown_timeout, "Shutting down HTTP server and message bus");
    let (http, bus_result) = tokio::join!(
        drain_http(server, shutdown_timeout),
        drain_bus(bus.as_ref(), shutdown_timeout),
    );

    if let Err(e) = &http {
        error!(error = %e, "HTTP server shutdown failed");
    }
    if let Err(e) = &bus_result {
        error!(error = %e, "Message bus shutdown failed");
    }
    if http.is_ok() && bus_result.is_ok() {
        info!("Shutdown complete");
    }
    http.and(bus_result)
}

/// Wait for in-flight requests, aborting the server after `timeout`.
async fn drain_http(mut server: JoinHandle<io::Result<()>>, timeout: Duration) -> Result<()> {
    if let Ok(joined) = tokio::time::timeout(timeout, &mut server).await {
        server_outcome(joined)
    } else {
        server.abort();
        Err(Error::Internal(format!(
            "HTTP server did not stop within {timeout:?}"
        )))
    }
}

/// Close the bus, bounded by `timeout`.
async fn drain_bus(bus: &dyn MessageBus, timeout: Duration) -> Result<()> {
    match tokio::time::timeout(timeout, bus.close()).await {
        Ok(result) => result.map_err(Error::from),
        Err(_) => Err(Error::Internal(format!(
            "message bus did not close within {timeout:?}"
        ))),
    }
}

fn server_outcome(joined: std::result::Result<io::Result<()>, JoinError>) -> Result<()> {
    match joined {
        Ok(result) => result.map_err(Error::from),
        Err(e) => Err(Error::Internal(format!("HTTP server task failed: {e}"))),
    }
}

/// Cancel `shutdown` on SIGINT or SIGTERM. Returns early if `shutdown` is
/// cancelled by someone else.
pub async fn watch_signals(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Shutdown signal received"),
        () = terminate => info!("Termination signal received"),
        () = shutdown.cancelled() => return,
    }

    shutdown.cancel();
}
