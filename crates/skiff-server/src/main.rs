//! Main entry point for the Skiff gateway control plane.
//!
//! Loads declarative resources from a file source, runs the translator
//! syncer and serves the snapshot cache over the debug server.

use std::sync::Arc;

use skiff_mesh::{InMemoryStatusReporter, SnapshotCache, TranslatorSyncer};
use skiff_server::{
    Configuration,
    startup::{self, DebugState, FileSource},
};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize configuration and logging
    let configuration = Configuration::new()?;
    let _logging_guard = startup::init_logging(&configuration.logging_config())?;

    if configuration.metrics_enabled() {
        skiff_server::metrics::init_metrics(configuration.metrics_listen_addr()?)?;
    }

    let settings = configuration.to_settings();
    info!(
        write_namespace = %settings.write_namespace,
        generated_by = %settings.generated_by,
        "Starting skiff control plane"
    );

    let cache = match configuration.backup_path() {
        Some(path) => Arc::new(SnapshotCache::from_backup(path)?),
        None => Arc::new(SnapshotCache::new()),
    };
    let reporter = Arc::new(InMemoryStatusReporter::new(settings.generated_by.clone()));
    let syncer = Arc::new(TranslatorSyncer::new(settings, cache, reporter.clone()));

    let shutdown = startup::wait_for_shutdown_signal();
    let mut handles = Vec::new();

    let (tx, rx) = mpsc::channel(16);
    let syncer_shutdown = shutdown.clone();
    handles.push((
        "translator-syncer",
        tokio::spawn(
            syncer
                .clone()
                .run(rx, async move { syncer_shutdown.wait().await }),
        ),
    ));

    match configuration.resources_path() {
        Some(path) => {
            let source = FileSource::new(path);
            handles.push((
                "resource-source",
                tokio::spawn(source.watch(
                    tx,
                    configuration.resources_poll_interval(),
                    shutdown.clone(),
                )),
            ));
        }
        None => {
            warn!("No resource file configured, serving cached snapshots only");
            drop(tx);
        }
    }

    if configuration.debug_enabled() {
        let state = DebugState {
            syncer: syncer.clone(),
            reporter,
        };
        handles.push((
            "debug-server",
            startup::spawn_debug_server(
                state,
                configuration.debug_address(),
                configuration.debug_port(),
                shutdown.clone(),
            )?,
        ));
    }

    shutdown.wait().await;
    startup::join_with_timeout(handles, configuration.shutdown_timeout()).await;
    info!("Skiff control plane stopped");

    Ok(())
}
