//! Configuration management for the Skiff server
//!
//! Sources, lowest precedence first: the YAML config file, `SKIFF_`
//! environment variables (`SKIFF_SYNC__WRITE_NAMESPACE` sets
//! `sync.write_namespace`), then command line flags.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use config::{Config, Environment};
use skiff_common::{DEFAULT_GENERATED_BY, DEFAULT_WRITE_NAMESPACE};
use skiff_mesh::{InvalidConfigPolicy, Settings};

use super::constants::*;
use crate::startup::LoggingConfig;

/// Command line arguments for the server
#[derive(Debug, Parser)]
#[command(name = "skiffd", about = "Skiff gateway control plane")]
struct Cli {
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_FILE)]
    config: String,
    /// Serve debug snapshots
    #[arg(long = "dev")]
    dev: bool,
    #[arg(long = "backup-path", env = "SKIFF_BACKUP_PATH")]
    backup_path: Option<String>,
    #[arg(long = "debug-port")]
    debug_port: Option<u16>,
    #[arg(long = "resources")]
    resources: Option<String>,
}

/// Application configuration loaded from config files and environment
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    pub fn new() -> anyhow::Result<Self> {
        Self::from_cli(Cli::parse())
    }

    fn from_cli(args: Cli) -> anyhow::Result<Self> {
        let mut builder = Config::builder()
            .add_source(config::File::with_name(&args.config).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if args.dev {
            builder = builder.set_override(DEBUG_ENABLED, true)?;
        }
        if let Some(v) = args.backup_path {
            builder = builder.set_override(CACHE_BACKUP_PATH, v)?;
        }
        if let Some(v) = args.debug_port {
            builder = builder.set_override(DEBUG_PORT, i64::from(v))?;
        }
        if let Some(v) = args.resources {
            builder = builder.set_override(RESOURCES_PATH, v)?;
        }

        let config = builder
            .build()
            .with_context(|| format!("Failed to build configuration from {}", args.config))?;
        Ok(Configuration { config })
    }

    // ========================================================================
    // Sync Configuration
    // ========================================================================

    pub fn write_namespace(&self) -> String {
        self.config
            .get_string(SYNC_WRITE_NAMESPACE)
            .unwrap_or(DEFAULT_WRITE_NAMESPACE.to_string())
    }

    pub fn generated_by(&self) -> String {
        self.config
            .get_string(SYNC_GENERATED_BY)
            .unwrap_or(DEFAULT_GENERATED_BY.to_string())
    }

    pub fn persist_proxy_spec(&self) -> bool {
        self.config
            .get_bool(SYNC_PERSIST_PROXY_SPEC)
            .unwrap_or(false)
    }

    /// Absent unless the `sync.invalid_config_policy` table is configured
    pub fn invalid_config_policy(&self) -> Option<InvalidConfigPolicy> {
        self.config.get(SYNC_INVALID_CONFIG_POLICY).ok()
    }

    pub fn to_settings(&self) -> Settings {
        Settings {
            write_namespace: self.write_namespace(),
            generated_by: self.generated_by(),
            persist_proxy_spec: self.persist_proxy_spec(),
            invalid_config_policy: self.invalid_config_policy(),
        }
    }

    // ========================================================================
    // Resource Source Configuration
    // ========================================================================

    pub fn resources_path(&self) -> Option<PathBuf> {
        self.config
            .get_string(RESOURCES_PATH)
            .ok()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }

    pub fn resources_poll_interval(&self) -> Duration {
        let ms = self
            .config
            .get_int(RESOURCES_POLL_INTERVAL_MS)
            .map(|v| v.max(100) as u64)
            .unwrap_or(DEFAULT_RESOURCES_POLL_INTERVAL_MS);
        Duration::from_millis(ms)
    }

    // ========================================================================
    // Snapshot Cache Configuration
    // ========================================================================

    pub fn backup_path(&self) -> Option<PathBuf> {
        self.config
            .get_string(CACHE_BACKUP_PATH)
            .ok()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }

    // ========================================================================
    // Debug Server Configuration
    // ========================================================================

    pub fn debug_enabled(&self) -> bool {
        self.config.get_bool(DEBUG_ENABLED).unwrap_or(false)
    }

    pub fn debug_address(&self) -> String {
        self.config
            .get_string(DEBUG_ADDRESS)
            .unwrap_or("127.0.0.1".to_string())
    }

    pub fn debug_port(&self) -> u16 {
        self.config
            .get_int(DEBUG_PORT)
            .unwrap_or(DEFAULT_DEBUG_PORT.into()) as u16
    }

    // ========================================================================
    // Metrics Configuration
    // ========================================================================

    pub fn metrics_enabled(&self) -> bool {
        self.config.get_bool(METRICS_ENABLED).unwrap_or(true)
    }

    pub fn metrics_listen_addr(&self) -> anyhow::Result<SocketAddr> {
        let address = self
            .config
            .get_string(METRICS_ADDRESS)
            .unwrap_or("0.0.0.0".to_string());
        let port = self
            .config
            .get_int(METRICS_PORT)
            .unwrap_or(DEFAULT_METRICS_PORT.into()) as u16;
        format!("{}:{}", address, port)
            .parse()
            .with_context(|| format!("Invalid metrics listen address {}:{}", address, port))
    }

    // ========================================================================
    // Logging Configuration
    // ========================================================================

    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig::from_config(
            self.config.get_string(LOGS_PATH).ok(),
            self.config.get_bool(LOGS_CONSOLE).unwrap_or(true),
            self.config.get_bool(LOGS_FILE).unwrap_or(true),
            &self
                .config
                .get_string(LOGS_LEVEL)
                .unwrap_or("info".to_string()),
        )
    }

    pub fn shutdown_timeout(&self) -> Duration {
        let ms = self
            .config
            .get_int(SHUTDOWN_TIMEOUT_MS)
            .map(|v| v.max(0) as u64)
            .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_MS);
        Duration::from_millis(ms)
    }
}
