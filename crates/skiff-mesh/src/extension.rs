//! Translator syncer extensions
//!
//! An extension is a secondary participant in a sync pass. It reads the
//! same declarative snapshot, publishes its own resources under a node id of
//! its choosing, and contributes reports merged with the base translation.

use std::sync::Arc;

use async_trait::async_trait;
use skiff_common::{Result, SkiffError};
use tracing::info;

use crate::api::{DeclarativeSnapshot, Settings};
use crate::cache::SnapshotCache;
use crate::report::ResourceReports;

/// Extension trait for the sync pass
#[async_trait]
pub trait TranslatorSyncerExtension: Send + Sync {
    /// Get the extension name
    fn name(&self) -> &str;

    /// Run the extension's sync, returning the node id it published under
    async fn sync(
        &self,
        snapshot: &DeclarativeSnapshot,
        settings: &Settings,
        cache: &SnapshotCache,
        reports: &mut ResourceReports,
    ) -> anyhow::Result<String>;
}

/// Ordered set of extensions, fixed at startup
#[derive(Clone, Default)]
pub struct ExtensionRegistry {
    extensions: Vec<Arc<dyn TranslatorSyncerExtension>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an extension; names must be unique
    pub fn register(&mut self, extension: Arc<dyn TranslatorSyncerExtension>) -> Result<()> {
        if self.get(extension.name()).is_some() {
            return Err(SkiffError::IllegalArgument(format!(
                "extension '{}' is already registered",
                extension.name()
            )));
        }
        info!("Extension '{}' registered", extension.name());
        self.extensions.push(extension);
        Ok(())
    }

    /// Get extension by name
    pub fn get(&self, name: &str) -> Option<&Arc<dyn TranslatorSyncerExtension>> {
        self.extensions.iter().find(|e| e.name() == name)
    }

    /// Extensions in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn TranslatorSyncerExtension>> {
        self.extensions.iter()
    }

    /// List all extension names
    pub fn names(&self) -> Vec<&str> {
        self.extensions.iter().map(|e| e.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl TranslatorSyncerExtension for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn sync(
            &self,
            _snapshot: &DeclarativeSnapshot,
            _settings: &Settings,
            _cache: &SnapshotCache,
            _reports: &mut ResourceReports,
        ) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn test_registration_order_and_uniqueness() {
        let mut registry = ExtensionRegistry::new();
        registry.register(Arc::new(Named("ratelimit"))).unwrap();
        registry.register(Arc::new(Named("extauth"))).unwrap();

        assert_eq!(registry.names(), vec!["ratelimit", "extauth"]);
        assert!(registry.register(Arc::new(Named("ratelimit"))).is_err());
        assert_eq!(registry.len(), 2);
        assert!(registry.get("extauth").is_some());
    }
}
