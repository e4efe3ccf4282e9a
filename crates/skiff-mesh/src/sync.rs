//! Translator Syncer
//!
//! Drives one sync pass per declarative snapshot:
//!
//! 1. translate gateways into generated proxies, one per proxy name
//! 2. label the proxies and reconcile them against the proxy store
//! 3. translate every proxy into an xDS snapshot
//! 4. sanitize each snapshot against the merged reports
//! 5. publish to the snapshot cache, all or nothing
//! 6. run the extensions in registration order
//! 7. write the merged reports and emit status metrics
//!
//! Stages keep going past individual failures; everything that went wrong is
//! returned as one ordered [`SyncErrors`] list.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use skiff_common::{GENERATED_BY_LABEL, Resource, SkiffError, WriteOptions};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};

use crate::api::{DeclarativeSnapshot, Proxy, Settings};
use crate::cache::SnapshotCache;
use crate::extension::ExtensionRegistry;
use crate::metrics::StatusMetrics;
use crate::reconciler::ProxyReconciler;
use crate::report::{ResourceReports, StatusReporter};
use crate::sanitizer::SanitizerChain;
use crate::snapshot::XdsSnapshot;
use crate::translator::{
    DefaultGatewayTranslator, DefaultXdsTranslator, GatewayTranslator, XdsTranslator, node_key,
    proxy_names,
};

/// Stage of a sync pass an error was raised in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    GatewayTranslation,
    ProxyReconcile,
    XdsTranslation,
    Sanitization,
    Publish,
    Extension,
    ReportMerge,
    ReportWrite,
}

impl SyncStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStage::GatewayTranslation => "gateway-translation",
            SyncStage::ProxyReconcile => "proxy-reconcile",
            SyncStage::XdsTranslation => "xds-translation",
            SyncStage::Sanitization => "sanitization",
            SyncStage::Publish => "publish",
            SyncStage::Extension => "extension",
            SyncStage::ReportMerge => "report-merge",
            SyncStage::ReportWrite => "report-write",
        }
    }
}

impl Display for SyncStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors of one sync pass, in the order they were raised
#[derive(Debug, Default, thiserror::Error)]
#[error("{}", format_errors(.errors))]
pub struct SyncErrors {
    errors: Vec<(SyncStage, SkiffError)>,
}

fn format_errors(errors: &[(SyncStage, SkiffError)]) -> String {
    errors
        .iter()
        .map(|(stage, e)| format!("{}: {}", stage, e))
        .collect::<Vec<_>>()
        .join("; ")
}

impl SyncErrors {
    pub fn push(&mut self, stage: SyncStage, error: SkiffError) {
        warn!(stage = %stage, error = %error, "Sync stage failed");
        self.errors.push((stage, error));
    }

    pub fn first(&self) -> Option<&(SyncStage, SkiffError)> {
        self.errors.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(SyncStage, SkiffError)> {
        self.errors.iter()
    }

    /// Errors raised in one stage
    pub fn in_stage(&self, stage: SyncStage) -> impl Iterator<Item = &SkiffError> {
        self.errors
            .iter()
            .filter(move |(s, _)| *s == stage)
            .map(|(_, e)| e)
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_result(self) -> Result<(), SyncErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

/// Runs sync passes against one snapshot cache
///
/// Passes are serialised; a call to [`TranslatorSyncer::sync`] waits for any
/// pass already in progress.
pub struct TranslatorSyncer {
    settings: Settings,
    cache: Arc<SnapshotCache>,
    reporter: Arc<dyn StatusReporter>,
    gateway_translator: Arc<dyn GatewayTranslator>,
    xds_translator: Arc<dyn XdsTranslator>,
    sanitizers: SanitizerChain,
    reconciler: ProxyReconciler,
    extensions: ExtensionRegistry,
    metrics: StatusMetrics,
    pass_lock: Mutex<()>,
    latest: RwLock<Option<Arc<DeclarativeSnapshot>>>,
}

impl TranslatorSyncer {
    /// Create a syncer with the default translators and sanitizer chain
    pub fn new(
        settings: Settings,
        cache: Arc<SnapshotCache>,
        reporter: Arc<dyn StatusReporter>,
    ) -> Self {
        let sanitizers = SanitizerChain::from_settings(&settings);
        Self {
            settings,
            cache,
            reporter,
            gateway_translator: Arc::new(DefaultGatewayTranslator),
            xds_translator: Arc::new(DefaultXdsTranslator),
            sanitizers,
            reconciler: ProxyReconciler::new(),
            extensions: ExtensionRegistry::new(),
            metrics: StatusMetrics::default(),
            pass_lock: Mutex::new(()),
            latest: RwLock::new(None),
        }
    }

    pub fn with_gateway_translator(mut self, translator: Arc<dyn GatewayTranslator>) -> Self {
        self.gateway_translator = translator;
        self
    }

    pub fn with_xds_translator(mut self, translator: Arc<dyn XdsTranslator>) -> Self {
        self.xds_translator = translator;
        self
    }

    pub fn with_sanitizers(mut self, sanitizers: SanitizerChain) -> Self {
        self.sanitizers = sanitizers;
        self
    }

    pub fn with_reconciler(mut self, reconciler: ProxyReconciler) -> Self {
        self.reconciler = reconciler;
        self
    }

    pub fn with_extensions(mut self, extensions: ExtensionRegistry) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn with_metrics(mut self, metrics: StatusMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn cache(&self) -> &Arc<SnapshotCache> {
        &self.cache
    }

    pub fn reconciler(&self) -> &ProxyReconciler {
        &self.reconciler
    }

    /// Declarative snapshot of the most recent pass, proxies included
    pub fn latest_snapshot(&self) -> Option<Arc<DeclarativeSnapshot>> {
        self.latest.read().clone()
    }

    /// Run one sync pass
    pub async fn sync(&self, snapshot: DeclarativeSnapshot) -> Result<(), SyncErrors> {
        let _pass = self.pass_lock.lock().await;
        let started = Instant::now();
        let mut errors = SyncErrors::default();
        let mut reports = ResourceReports::new();
        let mut snapshot = snapshot;

        info!(
            gateways = snapshot.gateways.len(),
            virtual_services = snapshot.virtual_services.len(),
            upstreams = snapshot.upstreams.len(),
            "Starting sync pass"
        );

        let proxies = self.generate_proxies(&snapshot, &mut reports, &mut errors);
        if let Err(e) = self
            .reconciler
            .reconcile(
                &self.settings.write_namespace,
                &self.settings.generated_by,
                &proxies,
                self.settings.persist_proxy_spec,
            )
            .await
        {
            errors.push(SyncStage::ProxyReconcile, e);
        }
        snapshot.proxies = proxies;

        let published = self.publish_proxies(&snapshot, &mut reports, &mut errors);

        let mut extension_keys = BTreeSet::new();
        let mut extensions_ok = true;
        for extension in self.extensions.iter() {
            let mut extension_reports = ResourceReports::new();
            match extension
                .sync(&snapshot, &self.settings, &self.cache, &mut extension_reports)
                .await
            {
                Ok(node_id) => {
                    debug!(extension = %extension.name(), node_id = %node_id, "Extension synced");
                    extension_keys.insert(node_id);
                }
                Err(e) => {
                    extensions_ok = false;
                    errors.push(
                        SyncStage::Extension,
                        SkiffError::Extension {
                            name: extension.name().to_string(),
                            reason: format!("{:#}", e),
                        },
                    );
                }
            }
            merge_reports(&mut reports, extension_reports, &mut errors);
        }

        if published && extensions_ok {
            self.reset_stale_nodes(&snapshot.proxies, &extension_keys, &mut errors);
        }

        if let Err(e) = self
            .reporter
            .write_reports(&reports, &WriteOptions::overwrite())
            .await
        {
            errors.push(SyncStage::ReportWrite, e);
        }
        for (key, report) in reports.iter() {
            let status = self.reporter.status_from_report(report);
            self.metrics.set_resource_status(key, &status);
        }

        *self.latest.write() = Some(Arc::new(snapshot));

        let elapsed = started.elapsed();
        self.metrics.record_sync(elapsed, errors.is_empty());
        if errors.is_empty() {
            info!(
                elapsed_ms = elapsed.as_millis() as u64,
                resources = reports.len(),
                "Sync pass complete"
            );
        } else {
            error!(
                elapsed_ms = elapsed.as_millis() as u64,
                errors = errors.len(),
                "Sync pass completed with errors"
            );
        }
        errors.into_result()
    }

    /// Translate gateways into labeled proxies, ordered by namespace and name
    fn generate_proxies(
        &self,
        snapshot: &DeclarativeSnapshot,
        reports: &mut ResourceReports,
        errors: &mut SyncErrors,
    ) -> Vec<Proxy> {
        let gateway_snapshot = snapshot.gateway_snapshot();
        let mut proxies = BTreeMap::new();

        for proxy_name in proxy_names(&snapshot.gateways) {
            let (proxy, proxy_reports) = self.gateway_translator.translate(
                &gateway_snapshot,
                &proxy_name,
                &self.settings.write_namespace,
            );
            merge_reports(reports, proxy_reports, errors);

            let Some(mut proxy) = proxy else {
                debug!(proxy = %proxy_name, "Gateway translation produced no proxy");
                continue;
            };
            proxy.metadata.labels.insert(
                GENERATED_BY_LABEL.to_string(),
                self.settings.generated_by.clone(),
            );
            proxies.insert(proxy.resource_ref(), proxy);
        }

        proxies.into_values().collect()
    }

    /// Translate, sanitize and publish every proxy; nothing is published
    /// unless every proxy got through sanitization. Returns whether the
    /// publish happened.
    fn publish_proxies(
        &self,
        snapshot: &DeclarativeSnapshot,
        reports: &mut ResourceReports,
        errors: &mut SyncErrors,
    ) -> bool {
        let mut translated = Vec::new();
        let mut complete = true;
        for proxy in &snapshot.proxies {
            match self.xds_translator.translate(snapshot, proxy) {
                Ok((xds, proxy_reports)) => {
                    merge_reports(reports, proxy_reports, errors);
                    translated.push((node_key(proxy), xds));
                }
                Err(e) => {
                    complete = false;
                    errors.push(SyncStage::XdsTranslation, e);
                }
            }
        }

        let mut staged = Vec::new();
        for (node_id, xds) in translated {
            match self.sanitizers.sanitize(xds, reports) {
                Ok(sanitized) => staged.push((node_id, sanitized)),
                Err(e) => {
                    complete = false;
                    errors.push(SyncStage::Sanitization, e);
                }
            }
        }

        if !complete {
            warn!("Not publishing snapshots: translation or sanitization failed for this pass");
            return false;
        }

        for (node_id, xds) in staged {
            match self.cache.set_snapshot(&node_id, xds) {
                Ok(changed) => self.metrics.record_publish(&node_id, changed),
                Err(e) => errors.push(SyncStage::Publish, e),
            }
        }
        true
    }

    /// Empty the snapshots of nodes no proxy or extension owns any more
    fn reset_stale_nodes(
        &self,
        proxies: &[Proxy],
        extension_keys: &BTreeSet<String>,
        errors: &mut SyncErrors,
    ) {
        let live: BTreeSet<String> = proxies.iter().map(node_key).collect();
        let empty = XdsSnapshot::empty();

        for node_id in self.cache.node_ids() {
            if live.contains(&node_id) || extension_keys.contains(&node_id) {
                continue;
            }
            match self.cache.set_snapshot(&node_id, empty.clone()) {
                Ok(true) => info!(node_id = %node_id, "Reset stale node to empty snapshot"),
                Ok(false) => {}
                Err(e) => errors.push(SyncStage::Publish, e),
            }
        }
    }

    /// Run passes for snapshots received on `rx` until `shutdown` completes
    ///
    /// Snapshots queued while a pass runs are coalesced; only the newest is
    /// synced.
    pub async fn run<F>(self: Arc<Self>, mut rx: mpsc::Receiver<DeclarativeSnapshot>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("Translator syncer started");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Translator syncer shutting down");
                    break;
                }
                received = rx.recv() => {
                    let Some(mut snapshot) = received else {
                        info!("Snapshot channel closed, translator syncer stopping");
                        break;
                    };
                    while let Ok(newer) = rx.try_recv() {
                        snapshot = newer;
                    }
                    // errors are logged per stage; the next change retries the whole pass
                    let _ = self.sync(snapshot).await;
                }
            }
        }
    }
}

fn merge_reports(reports: &mut ResourceReports, other: ResourceReports, errors: &mut SyncErrors) {
    if let Err(e) = reports.merge(other) {
        errors.push(SyncStage::ReportMerge, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_errors_views() {
        let mut errors = SyncErrors::default();
        assert!(errors.first().is_none());

        errors.push(SyncStage::Sanitization, SkiffError::Internal("a".to_string()));
        errors.push(SyncStage::ReportWrite, SkiffError::Store("b".to_string()));

        assert_eq!(errors.len(), 2);
        assert_eq!(errors.first().unwrap().0, SyncStage::Sanitization);
        assert_eq!(errors.in_stage(SyncStage::ReportWrite).count(), 1);
        assert_eq!(
            errors.to_string(),
            "sanitization: internal error: a; report-write: store error: b"
        );
        assert!(errors.into_result().is_err());
    }

    #[test]
    fn test_empty_sync_errors_is_ok() {
        assert!(SyncErrors::default().into_result().is_ok());
    }
}
