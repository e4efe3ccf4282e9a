//! Store client traits
//!
//! These traits abstract the declarative-resource store, allowing the
//! control plane to run against an in-memory store, a durable store, or a
//! test double without depending on concrete types.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::resource::Resource;

/// Options for list calls
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Exact-match label selector applied to list results
    pub selector: BTreeMap<String, String>,
}

impl ListOptions {
    pub fn with_selector(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.selector.insert(key.into(), value.into());
        self
    }
}

/// Options for write calls
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Replace an existing resource instead of failing
    pub overwrite_existing: bool,
}

impl WriteOptions {
    pub fn overwrite() -> Self {
        Self {
            overwrite_existing: true,
        }
    }
}

/// Options for delete calls
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOptions {
    /// Treat a missing resource as success
    pub ignore_not_exist: bool,
}

/// Resource store client
///
/// Implementations must be safe to share across tasks.
#[async_trait::async_trait]
pub trait ResourceClient<T: Resource>: Send + Sync {
    /// List resources in a namespace, filtered by the label selector
    async fn list(&self, namespace: &str, opts: &ListOptions) -> Result<Vec<T>>;

    /// Read a single resource
    async fn read(&self, namespace: &str, name: &str) -> Result<T>;

    /// Create or replace a resource, returning the stored value
    async fn write(&self, resource: T, opts: &WriteOptions) -> Result<T>;

    /// Delete a resource
    async fn delete(&self, namespace: &str, name: &str, opts: &DeleteOptions) -> Result<()>;
}
