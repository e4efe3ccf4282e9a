//! Declarative resource source backed by a YAML file
//!
//! The file holds one [`DeclarativeSnapshot`]. It is polled on an interval
//! and every change in content is handed to the translator syncer.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use skiff_mesh::DeclarativeSnapshot;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::ShutdownSignal;

pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> anyhow::Result<String> {
        tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read resources from {}", self.path.display()))
    }

    fn parse(&self, content: &str) -> anyhow::Result<DeclarativeSnapshot> {
        if content.trim().is_empty() {
            return Ok(DeclarativeSnapshot::default());
        }
        serde_yaml::from_str(content)
            .with_context(|| format!("Failed to parse resources in {}", self.path.display()))
    }

    /// Load the current resources
    pub async fn load(&self) -> anyhow::Result<DeclarativeSnapshot> {
        let content = self.read().await?;
        self.parse(&content)
    }

    /// Send the resources to `tx` now and again whenever the file content changes
    ///
    /// Unreadable or invalid content is logged and skipped; the last good
    /// resources stay in effect.
    pub async fn watch(
        self,
        tx: mpsc::Sender<DeclarativeSnapshot>,
        interval: Duration,
        shutdown: ShutdownSignal,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_content: Option<String> = None;
        info!(path = %self.path.display(), ?interval, "Watching resource file");

        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    info!("Resource file watcher stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let content = match self.read().await {
                        Ok(content) => content,
                        Err(e) => {
                            warn!(error = %format!("{:#}", e), "Skipping resource poll");
                            continue;
                        }
                    };
                    if last_content.as_deref() == Some(content.as_str()) {
                        continue;
                    }

                    match self.parse(&content) {
                        Ok(snapshot) => {
                            debug!(path = %self.path.display(), "Resource file changed");
                            if tx.send(snapshot).await.is_err() {
                                info!("Syncer is gone, resource file watcher stopping");
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(error = %format!("{:#}", e), "Ignoring invalid resource file")
                        }
                    }
                    last_content = Some(content);
                }
            }
        }
    }
}
