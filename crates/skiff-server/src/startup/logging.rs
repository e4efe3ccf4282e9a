//! Console and rolling file logging
//!
//! Every event goes to the console and to `skiff.log`. Control-plane events
//! are additionally split by tracing target:
//!
//! | File       | Targets                                   |
//! |------------|-------------------------------------------|
//! | skiff.log  | everything                                |
//! | mesh.log   | `skiff_mesh`                              |
//! | sync.log   | `skiff_mesh::sync`, `skiff_mesh::reconciler` |
//!
//! Files live in `~/skiff/logs` unless `SKIFF_LOG_DIR` or `logs.path` says otherwise.

use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// (file name, target prefixes) of each component log
const COMPONENT_LOGS: &[(&str, &[&str])] = &[
    ("mesh.log", &["skiff_mesh"]),
    ("sync.log", &["skiff_mesh::sync", "skiff_mesh::reconciler"]),
];

const ROOT_LOG: &str = "skiff.log";

fn default_log_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join("skiff")
        .join("logs")
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_dir: PathBuf,
    pub console_output: bool,
    pub file_logging: bool,
    pub level: Level,
    pub rotation: Rotation,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            console_output: true,
            file_logging: true,
            level: Level::INFO,
            rotation: Rotation::DAILY,
        }
    }
}

impl LoggingConfig {
    /// Build from `logs.*` settings; `SKIFF_LOG_DIR` takes precedence over `log_dir`
    pub fn from_config(
        log_dir: Option<String>,
        console_output: bool,
        file_logging: bool,
        level: &str,
    ) -> Self {
        let log_dir = std::env::var("SKIFF_LOG_DIR")
            .ok()
            .or(log_dir)
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_log_dir);

        Self {
            log_dir,
            console_output,
            file_logging,
            level: level.parse().unwrap_or(Level::INFO),
            rotation: Rotation::DAILY,
        }
    }

    /// `RUST_LOG` when set, the configured level otherwise
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.level.to_string()))
    }
}

/// Flushes buffered file output when dropped; hold it for the life of the process.
pub struct LoggingGuard {
    _guards: Vec<WorkerGuard>,
}

fn rolling_writer(
    dir: &Path,
    rotation: &Rotation,
    file_name: &str,
    guards: &mut Vec<WorkerGuard>,
) -> NonBlocking {
    let appender = RollingFileAppender::new(rotation.clone(), dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    guards.push(guard);
    writer
}

fn component_filter(targets: &[&str], level: LevelFilter) -> Targets {
    targets
        .iter()
        .fold(Targets::new(), |filter, target| filter.with_target(*target, level))
}

/// Install the global subscriber
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<LoggingGuard> {
    let mut guards = Vec::new();
    let mut layers: Vec<BoxedLayer> = Vec::new();

    if config.console_output {
        layers.push(
            fmt::layer()
                .with_target(true)
                .with_thread_names(true)
                .with_filter(config.env_filter())
                .boxed(),
        );
    }

    if config.file_logging {
        std::fs::create_dir_all(&config.log_dir)?;

        let root = rolling_writer(&config.log_dir, &config.rotation, ROOT_LOG, &mut guards);
        layers.push(
            fmt::layer()
                .with_writer(root)
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_filter(config.env_filter())
                .boxed(),
        );

        for (file_name, targets) in COMPONENT_LOGS {
            let writer = rolling_writer(&config.log_dir, &config.rotation, file_name, &mut guards);
            layers.push(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true)
                    .with_filter(component_filter(targets, config.level.into()))
                    .boxed(),
            );
        }
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    if config.file_logging {
        tracing::info!(
            log_dir = %config.log_dir.display(),
            files = COMPONENT_LOGS.len() + 1,
            "File logging initialized"
        );
    }

    Ok(LoggingGuard { _guards: guards })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert!(config.console_output && config.file_logging);
        assert_eq!(config.level, Level::INFO);
        assert!(config.log_dir.ends_with("skiff/logs"));
    }

    #[test]
    fn test_from_config_level() {
        let config = LoggingConfig::from_config(None, false, true, "debug");
        assert!(!config.console_output);
        assert_eq!(config.level, Level::DEBUG);

        let config = LoggingConfig::from_config(None, true, true, "loud");
        assert_eq!(config.level, Level::INFO);
    }

    #[test]
    fn test_component_filters_route_by_target() {
        for (file_name, targets) in COMPONENT_LOGS {
            assert!(file_name.ends_with(".log"));
            let filter = component_filter(targets, LevelFilter::INFO);
            for target in *targets {
                assert!(filter.would_enable(target, &Level::INFO));
                assert!(!filter.would_enable(target, &Level::DEBUG));
            }
            assert!(!filter.would_enable("actix_web", &Level::ERROR));
        }
    }
}
