//! Skiff control-plane core
//!
//! Turns declarative gateway configuration into per-proxy xDS snapshots and
//! serves them from a long-poll snapshot cache.
//!
//! # Architecture
//!
//! - `api` - declarative resources (gateways, virtual services, upstreams, proxies)
//! - `xds` - xDS resource types and type URLs
//! - `snapshot` - versioned, consistency-checked xDS snapshots
//! - `cache` - per-node snapshot cache with watchers and durable backup
//! - `translator` - gateway to proxy and proxy to xDS translation
//! - `sanitizer` - repair of translated snapshots before publish
//! - `reconciler` - generated proxy writes and cleanup
//! - `report` - per-resource reports and status reporting
//! - `extension` - secondary sync participants
//! - `sync` - the translator syncer driving a full pass
//! - `metrics` - status and sync metrics

pub mod api;
pub mod backup;
pub mod cache;
pub mod extension;
pub mod metrics;
pub mod reconciler;
pub mod report;
pub mod sanitizer;
pub mod snapshot;
pub mod store;
pub mod sync;
pub mod translator;
pub mod xds;

// Re-export commonly used types
pub use api::{DeclarativeSnapshot, InvalidConfigPolicy, Proxy, Settings};
pub use cache::{CacheStats, Published, SnapshotCache, SnapshotWatch, WatchEvent};
pub use extension::{ExtensionRegistry, TranslatorSyncerExtension};
pub use reconciler::{ProxyReconciler, ReconcileSummary, cleanup_unused};
pub use report::{
    InMemoryStatusReporter, Report, ReportKey, ResourceReports, Status, StatusReporter,
    StatusState,
};
pub use sanitizer::{SanitizerChain, XdsSanitizer};
pub use snapshot::{TypedResources, XdsSnapshot};
pub use store::MemoryResourceClient;
pub use sync::{SyncErrors, SyncStage, TranslatorSyncer};
pub use xds::ResourceType;
