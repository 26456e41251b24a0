//! Backend registry
//!
//! Maps backend names to constructors. The registry is built once during
//! process setup and only read afterwards, so it needs no interior locking.

#[cfg(feature = "storage-local")]
use crate::LocalStorage;
#[cfg(feature = "storage-object")]
use crate::ObjectStorage;
use crate::{Storage, StorageBackend, StorageError, StorageResult};
use futures::future::{BoxFuture, FutureExt};
use pixstash_core::StorageSettings;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds a backend from resolved settings.
pub type StorageConstructor = Arc<
    dyn Fn(StorageSettings) -> BoxFuture<'static, StorageResult<Arc<dyn Storage>>> + Send + Sync,
>;

/// Registry of storage backend constructors keyed by name.
#[derive(Clone, Default)]
pub struct StorageRegistry {
    constructors: HashMap<String, StorageConstructor>,
}

impl StorageRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every backend compiled into this build.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        #[cfg(feature = "storage-local")]
        register_local(&mut registry);
        #[cfg(feature = "storage-object")]
        {
            register_s3(&mut registry);
            register_remote_fs(&mut registry);
        }
        registry
    }

    /// Register (or replace) the constructor for `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(StorageSettings) -> BoxFuture<'static, StorageResult<Arc<dyn Storage>>>
            + Send
            + Sync
            + 'static,
    {
        self.constructors.insert(name.into(), Arc::new(constructor));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Registered backend names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build the backend registered under `name`.
    pub async fn create(
        &self,
        name: &str,
        settings: &StorageSettings,
    ) -> StorageResult<Arc<dyn Storage>> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| StorageError::UnsupportedBackend(name.to_string()))?;

        let storage = constructor(settings.clone()).await?;

        tracing::info!(
            backend = %name,
            kind = %storage.backend_type(),
            "Storage backend initialized"
        );

        Ok(storage)
    }
}

#[cfg(feature = "storage-local")]
pub fn register_local(registry: &mut StorageRegistry) {
    registry.register(StorageBackend::Local.as_str(), |settings: StorageSettings| {
        async move {
            let storage = LocalStorage::new(settings.local_path, settings.public_url_prefix).await?;
            Ok::<_, StorageError>(Arc::new(storage) as Arc<dyn Storage>)
        }
        .boxed()
    });
}

#[cfg(feature = "storage-object")]
pub fn register_s3(registry: &mut StorageRegistry) {
    registry.register(StorageBackend::S3.as_str(), |settings: StorageSettings| {
        async move {
            let storage = ObjectStorage::s3(&settings)?;
            Ok::<_, StorageError>(Arc::new(storage) as Arc<dyn Storage>)
        }
        .boxed()
    });
}

#[cfg(feature = "storage-object")]
pub fn register_remote_fs(registry: &mut StorageRegistry) {
    registry.register(StorageBackend::Nfs.as_str(), |settings: StorageSettings| {
        async move {
            let storage = ObjectStorage::remote_fs(&settings).await?;
            Ok::<_, StorageError>(Arc::new(storage) as Arc<dyn Storage>)
        }
        .boxed()
    });
}

/// Create the backend named in `settings` from the built-in registry.
pub async fn create_storage(settings: &StorageSettings) -> StorageResult<Arc<dyn Storage>> {
    StorageRegistry::with_builtin()
        .create(&settings.backend, settings)
        .await
}
