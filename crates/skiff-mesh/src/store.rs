//! Process-local resource store

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use skiff_common::{
    DeleteOptions, ListOptions, Resource, ResourceClient, ResourceRef, Result, SkiffError,
    WriteOptions, is_valid_name,
};
use tracing::debug;

/// In-memory [`ResourceClient`] keyed by namespace and name
///
/// Every successful write stamps a new `resource_version`.
pub struct MemoryResourceClient<T: Resource> {
    items: RwLock<BTreeMap<ResourceRef, T>>,
    revision: AtomicU64,
}

impl<T: Resource> MemoryResourceClient<T> {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(BTreeMap::new()),
            revision: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    fn not_found(namespace: &str, name: &str) -> SkiffError {
        SkiffError::NotFound {
            kind: T::KIND,
            resource: ResourceRef::new(namespace, name),
        }
    }
}

impl<T: Resource> Default for MemoryResourceClient<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl<T: Resource> ResourceClient<T> for MemoryResourceClient<T> {
    async fn list(&self, namespace: &str, opts: &ListOptions) -> Result<Vec<T>> {
        Ok(self
            .items
            .read()
            .iter()
            .filter(|(key, item)| {
                key.namespace == namespace && item.metadata().matches_selector(&opts.selector)
            })
            .map(|(_, item)| item.clone())
            .collect())
    }

    async fn read(&self, namespace: &str, name: &str) -> Result<T> {
        self.items
            .read()
            .get(&ResourceRef::new(namespace, name))
            .cloned()
            .ok_or_else(|| Self::not_found(namespace, name))
    }

    async fn write(&self, mut resource: T, opts: &WriteOptions) -> Result<T> {
        let key = resource.resource_ref();
        if !is_valid_name(&key.namespace) || !is_valid_name(&key.name) {
            return Err(SkiffError::IllegalArgument(format!(
                "invalid {} name: {}",
                T::KIND,
                key
            )));
        }

        let mut items = self.items.write();
        if let Some(existing) = items.get(&key) {
            if !opts.overwrite_existing
                && existing.metadata().resource_version != resource.metadata().resource_version
            {
                return Err(SkiffError::Store(format!(
                    "{} {} already exists with resource version {}",
                    T::KIND,
                    key,
                    existing.metadata().resource_version
                )));
            }
        }

        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        resource.metadata_mut().resource_version = revision.to_string();
        items.insert(key.clone(), resource.clone());
        debug!(kind = %T::KIND, resource = %key, revision, "Wrote resource");
        Ok(resource)
    }

    async fn delete(&self, namespace: &str, name: &str, opts: &DeleteOptions) -> Result<()> {
        let removed = self
            .items
            .write()
            .remove(&ResourceRef::new(namespace, name));
        match removed {
            Some(_) => {
                debug!(kind = %T::KIND, namespace, name, "Deleted resource");
                Ok(())
            }
            None if opts.ignore_not_exist => Ok(()),
            None => Err(Self::not_found(namespace, name)),
        }
    }
}
