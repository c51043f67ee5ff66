//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;

/// Authorization gateway - bulk access checks bridged to a NATS decision backend
#[derive(Parser, Debug)]
#[command(name = "access-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "ACCESS_GATEWAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, visible_alias = "http-port", env = "ACCESS_GATEWAY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "ACCESS_GATEWAY_HOST")]
    pub host: Option<String>,

    /// Enable debug logging
    #[arg(short, long, env = "ACCESS_GATEWAY_DEBUG")]
    pub debug: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "ACCESS_GATEWAY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "ACCESS_GATEWAY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway server (default)
    Serve,

    /// Load and validate the configuration, then print it as YAML
    CheckConfig,
}

impl Cli {
    /// Apply command-line overrides on top of the loaded configuration
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(ref host) = self.host {
            config.server.host.clone_from(host);
        }
        if self.debug {
            config.server.debug = true;
        }
    }

    /// Effective log level: debug mode wins over `--log-level`
    #[must_use]
    pub fn effective_log_level<'a>(&'a self, config: &Config) -> &'a str {
        if config.server.debug {
            "debug"
        } else {
            &self.log_level
        }
    }
}
