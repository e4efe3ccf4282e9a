//! Snapshot Cache
//!
//! Holds the latest [`XdsSnapshot`] per node. Each node owns a watch channel
//! whose value is replaced whole on publish, so readers only ever observe a
//! complete snapshot, and long-poll watchers wake once per published change.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use skiff_common::{Result, SkiffError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::backup::SnapshotBackup;
use crate::snapshot::{TypedResources, XdsSnapshot};
use crate::xds::ResourceType;

/// A snapshot as published to a node
#[derive(Debug, Clone)]
pub struct Published {
    /// Per-node publish counter, strictly increasing
    pub generation: u64,
    pub snapshot: Arc<XdsSnapshot>,
}

type NodeValue = Option<Published>;

/// Snapshot cache for xDS resources, keyed by node ID
pub struct SnapshotCache {
    nodes: DashMap<String, watch::Sender<NodeValue>>,
    backup: Option<SnapshotBackup>,
}

impl SnapshotCache {
    /// Create an in-memory cache
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
            backup: None,
        }
    }

    /// Create a cache persisted to `path`, rehydrated from any existing backup
    pub fn from_backup(path: impl Into<PathBuf>) -> Result<Self> {
        let backup = SnapshotBackup::new(path);
        let restored = backup.load()?;

        let nodes = DashMap::new();
        for (node_id, snapshot) in restored {
            let (tx, _) = watch::channel(Some(Published {
                generation: 1,
                snapshot: Arc::new(snapshot),
            }));
            nodes.insert(node_id, tx);
        }

        info!(
            path = %backup.path().display(),
            nodes = nodes.len(),
            "Snapshot cache rehydrated from backup"
        );
        Ok(Self {
            nodes,
            backup: Some(backup),
        })
    }

    pub fn has_backup(&self) -> bool {
        self.backup.is_some()
    }

    fn sender(&self, node_id: &str) -> watch::Sender<NodeValue> {
        self.nodes
            .entry(node_id.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .clone()
    }

    /// Publish `snapshot` for `node_id`
    ///
    /// Returns `Ok(false)` without waking anyone when the node already holds
    /// an equal snapshot. With a backup configured the new state is persisted
    /// before returning; a persistence error is returned while the in-memory
    /// value stays published.
    pub fn set_snapshot(&self, node_id: &str, snapshot: XdsSnapshot) -> Result<bool> {
        let tx = self.sender(node_id);
        let mut generation = 0;
        let changed = tx.send_if_modified(|current| {
            if current
                .as_ref()
                .is_some_and(|p| p.snapshot.as_ref() == &snapshot)
            {
                return false;
            }
            generation = current.as_ref().map_or(1, |p| p.generation + 1);
            *current = Some(Published {
                generation,
                snapshot: Arc::new(snapshot),
            });
            true
        });

        if !changed {
            debug!(node_id = %node_id, "Snapshot unchanged, skipping publish");
            return Ok(false);
        }

        debug!(
            node_id = %node_id,
            generation,
            watchers = tx.receiver_count(),
            "Published xDS snapshot"
        );
        self.persist()?;
        Ok(true)
    }

    /// Latest snapshot for `node_id`
    pub fn get_snapshot(&self, node_id: &str) -> Result<Arc<XdsSnapshot>> {
        let snapshot = match self.nodes.get(node_id) {
            Some(tx) => {
                let value = tx.borrow();
                value.as_ref().map(|p| p.snapshot.clone())
            }
            None => None,
        };
        snapshot.ok_or_else(|| SkiffError::SnapshotNotFound(node_id.to_string()))
    }

    /// Resources of one discovery type for a node
    pub fn get_resources(&self, node_id: &str, type_url: &str) -> Result<TypedResources> {
        let snapshot = self.get_snapshot(node_id)?;
        snapshot.get_resources(type_url).ok_or_else(|| {
            SkiffError::IllegalArgument(format!("unknown resource type url: {}", type_url))
        })
    }

    /// Remove the node's snapshot, waking its watchers
    pub fn clear_snapshot(&self, node_id: &str) -> Result<()> {
        let cleared = match self.nodes.get(node_id) {
            Some(tx) => tx.send_if_modified(|current| current.take().is_some()),
            None => false,
        };
        if cleared {
            info!(node_id = %node_id, "Cleared xDS snapshot");
            self.persist()?;
        }
        Ok(())
    }

    /// Node IDs holding a snapshot, sorted
    pub fn node_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .nodes
            .iter()
            .filter(|e| e.value().borrow().is_some())
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Every published snapshot keyed by node
    pub fn snapshots(&self) -> BTreeMap<String, Arc<XdsSnapshot>> {
        let mut snapshots = BTreeMap::new();
        for entry in self.nodes.iter() {
            if let Some(published) = entry.value().borrow().as_ref() {
                snapshots.insert(entry.key().clone(), published.snapshot.clone());
            }
        }
        snapshots
    }

    /// Subscribe to changes of a node's snapshot
    ///
    /// The watch only reports publishes made after this call.
    pub fn watch(&self, node_id: &str) -> SnapshotWatch {
        SnapshotWatch {
            node_id: node_id.to_string(),
            rx: self.sender(node_id).subscribe(),
        }
    }

    /// Long-poll for one resource type
    ///
    /// Returns as soon as the node's version for `resource_type` differs from
    /// `known_version`; otherwise waits for a publish that changes it. Returns
    /// `Ok(None)` when `cancel` completes first.
    pub async fn fetch_resources<F>(
        &self,
        node_id: &str,
        resource_type: ResourceType,
        known_version: Option<&str>,
        cancel: F,
    ) -> Result<Option<TypedResources>>
    where
        F: Future<Output = ()>,
    {
        let mut rx = self.sender(node_id).subscribe();
        tokio::pin!(cancel);

        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(published) = current {
                if Some(published.snapshot.version(resource_type)) != known_version {
                    return Ok(Some(published.snapshot.resources(resource_type)));
                }
            }

            tokio::select! {
                changed = rx.changed() => {
                    changed.map_err(|_| closed(node_id))?;
                }
                _ = &mut cancel => {
                    debug!(node_id = %node_id, resource_type = %resource_type, "Fetch cancelled");
                    return Ok(None);
                }
            }
        }
    }

    /// Cache statistics
    pub fn stats(&self) -> CacheStats {
        let snapshots = self.snapshots();
        CacheStats {
            node_count: snapshots.len(),
            resource_count: snapshots.values().map(|s| s.resource_count()).sum(),
            watcher_count: self.nodes.iter().map(|e| e.value().receiver_count()).sum(),
            backup_enabled: self.backup.is_some(),
        }
    }

    fn persist(&self) -> Result<()> {
        let Some(backup) = &self.backup else {
            return Ok(());
        };
        backup
            .save_with(|| {
                self.snapshots()
                    .into_iter()
                    .map(|(node, snapshot)| (node, snapshot.as_ref().clone()))
                    .collect()
            })
            .inspect_err(|e| {
                warn!(error = %e, "Failed to persist snapshot backup");
            })
    }
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}

fn closed(node_id: &str) -> SkiffError {
    SkiffError::Internal(format!("snapshot channel for node {} closed", node_id))
}

/// Cache statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub node_count: usize,
    pub resource_count: usize,
    pub watcher_count: usize,
    pub backup_enabled: bool,
}

/// Result of waiting on a [`SnapshotWatch`]
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// The node's value changed; `None` when its snapshot was cleared
    Changed(Option<Published>),
    Cancelled,
}

/// Receiver side of a node's snapshot channel
pub struct SnapshotWatch {
    node_id: String,
    rx: watch::Receiver<NodeValue>,
}

impl SnapshotWatch {
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Value as last observed, without waiting
    pub fn current(&self) -> Option<Published> {
        self.rx.borrow().clone()
    }

    /// Wait for the next change
    pub async fn changed(&mut self) -> Result<Option<Published>> {
        self.rx.changed().await.map_err(|_| closed(&self.node_id))?;
        Ok(self.rx.borrow_and_update().clone())
    }

    /// Wait for the next change, or until `cancel` completes
    pub async fn changed_or_cancelled<F>(&mut self, cancel: F) -> Result<WatchEvent>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            changed = self.changed() => changed.map(WatchEvent::Changed),
            _ = cancel => Ok(WatchEvent::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xds::types::Cluster;

    fn snapshot(version: &str) -> XdsSnapshot {
        XdsSnapshot::new(version, vec![], vec![Cluster::new_static("static")], vec![], vec![])
    }

    #[test]
    fn test_get_missing_snapshot() {
        let cache = SnapshotCache::new();
        let err = cache.get_snapshot("test").unwrap_err();
        assert_eq!(err.to_string(), "no snapshot found for node test");
    }

    #[test]
    fn test_set_and_replace() {
        let cache = SnapshotCache::new();
        assert!(cache.set_snapshot("node1", snapshot("1")).unwrap());
        assert!(cache.set_snapshot("node1", snapshot("2")).unwrap());
        assert_eq!(*cache.get_snapshot("node1").unwrap(), snapshot("2"));

        assert!(!cache.set_snapshot("node1", snapshot("2")).unwrap());
    }

    #[test]
    fn test_node_ids_sorted_and_clear() {
        let cache = SnapshotCache::new();
        cache.set_snapshot("b", snapshot("1")).unwrap();
        cache.set_snapshot("a", snapshot("1")).unwrap();
        let _watch = cache.watch("c");
        assert_eq!(cache.node_ids(), vec!["a".to_string(), "b".to_string()]);

        cache.clear_snapshot("a").unwrap();
        assert_eq!(cache.node_ids(), vec!["b".to_string()]);
        assert!(cache.get_snapshot("a").is_err());
    }

    #[test]
    fn test_get_resources() {
        let cache = SnapshotCache::new();
        cache.set_snapshot("node1", snapshot("3")).unwrap();

        let clusters = cache
            .get_resources("node1", ResourceType::Cluster.type_url())
            .unwrap();
        assert_eq!(clusters.version, "3");
        assert_eq!(clusters.items.len(), 1);

        assert!(cache.get_resources("node1", "bogus").is_err());
    }

    #[tokio::test]
    async fn test_watch_sees_latest_with_generation() {
        let cache = SnapshotCache::new();
        cache.set_snapshot("node1", snapshot("1")).unwrap();

        let mut watch = cache.watch("node1");
        assert_eq!(watch.current().unwrap().generation, 1);

        cache.set_snapshot("node1", snapshot("2")).unwrap();
        let published = watch.changed().await.unwrap().unwrap();
        assert_eq!(published.generation, 2);
        assert_eq!(*published.snapshot, snapshot("2"));
    }

    #[tokio::test]
    async fn test_watch_cancelled() {
        let cache = SnapshotCache::new();
        let mut watch = cache.watch("node1");

        let event = watch.changed_or_cancelled(async {}).await.unwrap();
        assert!(matches!(event, WatchEvent::Cancelled));
    }

    #[tokio::test]
    async fn test_fetch_returns_immediately_on_new_version() {
        let cache = SnapshotCache::new();
        cache.set_snapshot("node1", snapshot("1")).unwrap();

        let resources = cache
            .fetch_resources("node1", ResourceType::Cluster, None, std::future::pending())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resources.version, "1");
    }

    #[tokio::test]
    async fn test_fetch_honors_cancellation() {
        let cache = SnapshotCache::new();
        cache.set_snapshot("node1", snapshot("1")).unwrap();

        let result = cache
            .fetch_resources(
                "node1",
                ResourceType::Cluster,
                Some("1"),
                tokio::time::sleep(std::time::Duration::from_millis(20)),
            )
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_stats() {
        let cache = SnapshotCache::new();
        cache.set_snapshot("node1", snapshot("1")).unwrap();
        let _watch = cache.watch("node1");

        let stats = cache.stats();
        assert_eq!(stats.node_count, 1);
        assert_eq!(stats.resource_count, 1);
        assert_eq!(stats.watcher_count, 1);
        assert!(!stats.backup_enabled);
    }
}
