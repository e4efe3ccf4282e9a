//! Generated proxy reconciliation
//!
//! Generated proxies are written to a process-local store (and optionally to
//! a durable store). Proxies that carry this controller's `created-by`
//! marker but were not generated by the current pass are deleted; proxies
//! without the marker are never touched.

use std::collections::BTreeSet;
use std::sync::Arc;

use skiff_common::{
    DeleteOptions, GENERATED_BY_LABEL, ListOptions, Resource, ResourceClient, ResourceRef,
    Result, SkiffError, WriteOptions,
};
use tracing::{debug, info, warn};

use crate::api::Proxy;
use crate::store::MemoryResourceClient;

/// Outcome of one reconcile call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub written: usize,
    pub unchanged: usize,
    pub deleted: usize,
}

/// Keeps stored proxies in line with the proxies generated by a pass
pub struct ProxyReconciler {
    memory: Arc<MemoryResourceClient<Proxy>>,
    durable: Option<Arc<dyn ResourceClient<Proxy>>>,
}

impl ProxyReconciler {
    pub fn new() -> Self {
        Self {
            memory: Arc::new(MemoryResourceClient::new()),
            durable: None,
        }
    }

    /// Also reconcile into `store` when proxy persistence is enabled
    pub fn with_durable_store(mut self, store: Arc<dyn ResourceClient<Proxy>>) -> Self {
        self.durable = Some(store);
        self
    }

    /// The process-local proxy store
    pub fn proxy_store(&self) -> Arc<MemoryResourceClient<Proxy>> {
        self.memory.clone()
    }

    /// Write the desired proxies, then delete the stale generated ones
    ///
    /// Every store and proxy is attempted; errors are combined.
    pub async fn reconcile(
        &self,
        namespace: &str,
        marker: &str,
        desired: &[Proxy],
        persist: bool,
    ) -> Result<ReconcileSummary> {
        let mut stores: Vec<&dyn ResourceClient<Proxy>> = Vec::new();
        stores.push(self.memory.as_ref());
        match (&self.durable, persist) {
            (Some(durable), true) => stores.push(durable.as_ref()),
            (None, true) => {
                warn!("Proxy persistence enabled but no durable proxy store configured")
            }
            _ => {}
        }

        let mut summary = ReconcileSummary::default();
        let mut errors = Vec::new();
        for store in stores {
            for proxy in desired {
                match write_if_changed(store, proxy).await {
                    Ok(true) => summary.written += 1,
                    Ok(false) => summary.unchanged += 1,
                    Err(e) => errors.push(e),
                }
            }
            match cleanup_unused(store, namespace, marker, desired).await {
                Ok(deleted) => summary.deleted += deleted,
                Err(e) => errors.push(e),
            }
        }

        debug!(
            namespace,
            written = summary.written,
            unchanged = summary.unchanged,
            deleted = summary.deleted,
            "Reconciled generated proxies"
        );
        SkiffError::from_errors(errors)?;
        Ok(summary)
    }
}

impl Default for ProxyReconciler {
    fn default() -> Self {
        Self::new()
    }
}

async fn write_if_changed(store: &dyn ResourceClient<Proxy>, proxy: &Proxy) -> Result<bool> {
    let meta = proxy.metadata();
    match store.read(&meta.namespace, &meta.name).await {
        Ok(existing) if existing.same_spec(proxy) => return Ok(false),
        Ok(_) => {}
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }
    store.write(proxy.clone(), &WriteOptions::overwrite()).await?;
    Ok(true)
}

/// Delete proxies in `namespace` marked `created-by: <marker>` that are not in `current`
///
/// Every deletion is attempted before the combined error is returned.
/// Returns the number of proxies deleted.
pub async fn cleanup_unused(
    store: &dyn ResourceClient<Proxy>,
    namespace: &str,
    marker: &str,
    current: &[Proxy],
) -> Result<usize> {
    let opts = ListOptions::default().with_selector(GENERATED_BY_LABEL, marker);
    let existing = store.list(namespace, &opts).await?;

    let current: BTreeSet<ResourceRef> = current.iter().map(|p| p.resource_ref()).collect();
    let mut deleted = 0;
    let mut errors = Vec::new();

    for proxy in existing {
        if proxy.metadata.label(GENERATED_BY_LABEL) != Some(marker)
            || current.contains(&proxy.resource_ref())
        {
            continue;
        }
        let meta = &proxy.metadata;
        match store
            .delete(&meta.namespace, &meta.name, &DeleteOptions::default())
            .await
        {
            Ok(()) => {
                info!(proxy = %meta.resource_ref(), "Deleted unused generated proxy");
                deleted += 1;
            }
            Err(e) => {
                warn!(proxy = %meta.resource_ref(), error = %e, "Failed to delete unused proxy");
                errors.push(e);
            }
        }
    }

    SkiffError::from_errors(errors)?;
    Ok(deleted)
}
