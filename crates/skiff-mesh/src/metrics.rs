// Status metrics for the sync pass
// Gauges per resource status plus counters and histograms for passes and publishes

use std::collections::BTreeSet;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use skiff_common::ResourceKind;

use crate::report::{ReportKey, Status, StatusState};

pub const RESOURCE_STATUS_GAUGE: &str = "skiff_resource_config_status";
pub const SYNC_PASSES_COUNTER: &str = "skiff_sync_passes_total";
pub const SYNC_DURATION_HISTOGRAM: &str = "skiff_sync_duration_seconds";
pub const SNAPSHOT_PUBLISH_COUNTER: &str = "skiff_snapshot_publish_total";

/// Initialize metric descriptions
/// Should be called once at application startup
pub fn describe_metrics() {
    describe_gauge!(
        RESOURCE_STATUS_GAUGE,
        "Whether a declarative resource is rejected (1) or accepted (0)"
    );
    describe_counter!(SYNC_PASSES_COUNTER, "Total number of sync passes");
    describe_histogram!(SYNC_DURATION_HISTOGRAM, "Sync pass duration in seconds");
    describe_counter!(
        SNAPSHOT_PUBLISH_COUNTER,
        "Total number of snapshots published to the cache"
    );
}

/// Gauge value for a status
pub fn status_value(status: &Status) -> f64 {
    match status.state {
        StatusState::Rejected => 1.0,
        StatusState::Accepted | StatusState::Warning => 0.0,
    }
}

/// Emits per-resource status metrics for the configured kinds
#[derive(Debug, Clone)]
pub struct StatusMetrics {
    kinds: BTreeSet<ResourceKind>,
}

impl Default for StatusMetrics {
    fn default() -> Self {
        Self::new([
            ResourceKind::Gateway,
            ResourceKind::VirtualService,
            ResourceKind::RouteTable,
            ResourceKind::Upstream,
            ResourceKind::Proxy,
        ])
    }
}

impl StatusMetrics {
    pub fn new(kinds: impl IntoIterator<Item = ResourceKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
        }
    }

    pub fn tracks(&self, kind: ResourceKind) -> bool {
        self.kinds.contains(&kind)
    }

    /// Set the status gauge for one resource
    pub fn set_resource_status(&self, key: &ReportKey, status: &Status) {
        if !self.tracks(key.kind) {
            return;
        }
        gauge!(
            RESOURCE_STATUS_GAUGE,
            "kind" => key.kind.as_str(),
            "namespace" => key.resource.namespace.clone(),
            "name" => key.resource.name.clone()
        )
        .set(status_value(status));
    }

    /// Record a finished sync pass
    pub fn record_sync(&self, duration: Duration, success: bool) {
        let result = if success { "success" } else { "error" };
        counter!(SYNC_PASSES_COUNTER, "result" => result).increment(1);
        histogram!(SYNC_DURATION_HISTOGRAM).record(duration.as_secs_f64());
    }

    /// Record a snapshot publish for a node
    pub fn record_publish(&self, node_id: &str, changed: bool) {
        let outcome = if changed { "changed" } else { "unchanged" };
        counter!(SNAPSHOT_PUBLISH_COUNTER, "node" => node_id.to_string(), "outcome" => outcome)
            .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_common::ResourceRef;

    fn status(state: StatusState) -> Status {
        Status {
            state,
            reason: String::new(),
            reported_by: "skiff-gateway".to_string(),
        }
    }

    #[test]
    fn test_status_value() {
        assert_eq!(status_value(&status(StatusState::Rejected)), 1.0);
        assert_eq!(status_value(&status(StatusState::Warning)), 0.0);
        assert_eq!(status_value(&status(StatusState::Accepted)), 0.0);
    }

    #[test]
    fn test_tracked_kinds() {
        let metrics = StatusMetrics::default();
        assert!(metrics.tracks(ResourceKind::VirtualService));
        assert!(!metrics.tracks(ResourceKind::RouteOption));

        // No recorder installed: calls are no-ops
        let key = ReportKey::new(ResourceKind::Gateway, ResourceRef::new("ns", "gw"));
        metrics.set_resource_status(&key, &status(StatusState::Rejected));
        metrics.record_sync(Duration::from_millis(5), true);
        metrics.record_publish("ns~proxy", false);
    }
}
