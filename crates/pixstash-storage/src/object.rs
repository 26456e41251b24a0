use crate::keys;
use crate::locks::IdLocks;
use crate::sweep::sweep_expired;
use crate::traits::{ByteStream, InfoUpdate, Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path;
use object_store::Error as ObjectStoreError;
use object_store::{ObjectStore, ObjectStoreExt, PutPayload, Result as ObjectResult};
use pixstash_core::{MediaItem, Orientation, StorageSettings, Variant};
use std::sync::Arc;

/// Storage over any `object_store` backend.
///
/// Serves two configured backends: `s3` (S3-compatible buckets) and `nfs`
/// (a remote filesystem mounted locally). Keys follow the shared layout, so a
/// bucket and a local tree are interchangeable.
#[derive(Clone)]
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    backend: StorageBackend,
    /// Base URL public links are built from.
    public_base: String,
    /// Prefix for `storagePath` locators, e.g. `s3://bucket`.
    locator_root: String,
    locks: Arc<IdLocks>,
}

impl ObjectStorage {
    /// Wrap an already-built store.
    pub fn with_store(
        store: Arc<dyn ObjectStore>,
        backend: StorageBackend,
        public_base: impl Into<String>,
        locator_root: impl Into<String>,
    ) -> Self {
        ObjectStorage {
            store,
            backend,
            public_base: public_base.into(),
            locator_root: locator_root.into(),
            locks: Arc::new(IdLocks::new()),
        }
    }

    /// S3-compatible bucket (AWS, MinIO, R2, Spaces, ...).
    pub fn s3(settings: &StorageSettings) -> StorageResult<Self> {
        let s3 = &settings.s3;
        let bucket = s3
            .bucket
            .clone()
            .ok_or_else(|| StorageError::ConfigError("S3_BUCKET not configured".to_string()))?;

        let mut builder = AmazonS3Builder::new()
            .with_region(s3.region.clone())
            .with_bucket_name(bucket.clone());

        if let Some(ref key) = s3.access_key {
            builder = builder.with_access_key_id(key.clone());
        }
        if let Some(ref secret) = s3.secret_key {
            builder = builder.with_secret_access_key(secret.clone());
        }
        if let Some(ref endpoint) = s3.endpoint {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(allow_http);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        // Custom domain first, then path-style on the endpoint, then AWS virtual-hosted style.
        let public_base = match (&s3.custom_domain, &s3.endpoint) {
            (Some(domain), _) if domain.starts_with("http") => domain.trim_end_matches('/').to_string(),
            (Some(domain), _) => format!("https://{}", domain.trim_end_matches('/')),
            (None, Some(endpoint)) => format!("{}/{}", endpoint.trim_end_matches('/'), bucket),
            (None, None) => format!("https://{}.s3.{}.amazonaws.com", bucket, s3.region),
        };

        Ok(Self::with_store(
            Arc::new(store),
            StorageBackend::S3,
            public_base,
            format!("s3://{}", bucket),
        ))
    }

    /// Remote filesystem mounted at `REMOTE_FS_PATH` (NFS, SSHFS, SMB, ...).
    pub async fn remote_fs(settings: &StorageSettings) -> StorageResult<Self> {
        let root = settings.remote_fs_path.clone().ok_or_else(|| {
            StorageError::ConfigError("REMOTE_FS_PATH not configured".to_string())
        })?;

        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            StorageError::ConfigError(format!("Failed to create storage directory {}: {}", root, e))
        })?;

        let store = LocalFileSystem::new_with_prefix(&root)
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        Ok(Self::with_store(
            Arc::new(store),
            StorageBackend::Nfs,
            settings.public_url_prefix.clone(),
            root.trim_end_matches('/').to_string(),
        ))
    }

    async fn put(&self, key: &str, content: Bytes) -> StorageResult<()> {
        let size = content.len() as u64;
        let location = Path::from(key);
        let start = std::time::Instant::now();

        let result: ObjectResult<_> = self.store.put(&location, PutPayload::from(content)).await;

        result.map_err(|e| {
            tracing::error!(
                error = %e,
                backend = %self.backend,
                key = %key,
                size_bytes = size,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Object storage put failed"
            );
            StorageError::WriteFailed(format!("{}: {}", key, e))
        })?;

        tracing::info!(
            backend = %self.backend,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Object storage put successful"
        );

        Ok(())
    }

    async fn fetch(&self, key: &str) -> StorageResult<object_store::GetResult> {
        let location = Path::from(key);
        let result: ObjectResult<_> = self.store.get(&location).await;
        result.map_err(|e| match e {
            ObjectStoreError::NotFound { .. } => StorageError::NotFound(key.to_string()),
            other => StorageError::ReadFailed(format!("{}: {}", key, other)),
        })
    }

    /// Delete `key`, reporting absence as `NotFound`. Some stores treat a
    /// missing key as a successful delete, so existence is checked first.
    async fn remove(&self, key: &str) -> StorageResult<()> {
        let location = Path::from(key);
        let start = std::time::Instant::now();

        match self.store.head(&location).await {
            Ok(_) => {}
            Err(ObjectStoreError::NotFound { .. }) => {
                return Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => return Err(StorageError::DeleteFailed(format!("{}: {}", key, e))),
        }

        let result: ObjectResult<_> = self.store.delete(&location).await;
        result.map_err(|e| match e {
            ObjectStoreError::NotFound { .. } => StorageError::NotFound(key.to_string()),
            other => {
                tracing::error!(
                    error = %other,
                    backend = %self.backend,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Object storage delete failed"
                );
                StorageError::DeleteFailed(format!("{}: {}", key, other))
            }
        })?;

        tracing::info!(
            backend = %self.backend,
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Object storage delete successful"
        );

        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> StorageResult<Vec<Path>> {
        let prefix = Path::from(prefix);
        let metas: Vec<_> = self
            .store
            .list(Some(&prefix))
            .try_collect()
            .await
            .map_err(|e| StorageError::ReadFailed(format!("list {}: {}", prefix, e)))?;
        Ok(metas.into_iter().map(|meta| meta.location).collect())
    }

    /// Key of the original of `id`: recorded extension first, then the
    /// lexicographically first `{id}.*` under the orientation prefix.
    async fn find_original(
        &self,
        id: &str,
        orientation: Orientation,
        ext_hint: Option<&str>,
    ) -> StorageResult<String> {
        if let Some(ext) = ext_hint {
            let key = keys::variant_key(id, Variant::Original, orientation, ext);
            match self.store.head(&Path::from(key.as_str())).await {
                Ok(_) => return Ok(key),
                Err(ObjectStoreError::NotFound { .. }) => {}
                Err(e) => return Err(StorageError::ReadFailed(format!("{}: {}", key, e))),
            }
        }

        let mut matches: Vec<String> = self
            .list_keys(&keys::variant_dir(Variant::Original, orientation))
            .await?
            .into_iter()
            .filter(|location| {
                location
                    .filename()
                    .is_some_and(|name| keys::is_original_of(name, id))
            })
            .map(|location| location.to_string())
            .collect();
        matches.sort();

        if matches.len() > 1 {
            tracing::warn!(
                id = %id,
                orientation = %orientation,
                candidates = matches.len(),
                chosen = %matches[0],
                "Multiple originals found for item, using the first"
            );
        }

        matches
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::NotFound(format!("original/{}/{}", orientation, id)))
    }

    async fn variant_key(
        &self,
        id: &str,
        variant: Variant,
        orientation: Orientation,
    ) -> StorageResult<String> {
        keys::validate_id(id)?;
        match keys::derived_key(id, variant, orientation) {
            Some(key) => Ok(key),
            None => {
                let hint = self.read_info(id).await.ok().and_then(|i| i.original_extension);
                self.find_original(id, orientation, hint.as_deref()).await
            }
        }
    }

    async fn read_info(&self, id: &str) -> StorageResult<MediaItem> {
        keys::validate_id(id)?;
        let key = keys::metadata_key(id);
        let data = self
            .fetch(&key)
            .await
            .map_err(|e| match e {
                StorageError::NotFound(_) => StorageError::NotFound(format!("metadata for {}", id)),
                other => other,
            })?
            .bytes()
            .await
            .map_err(|e| StorageError::ReadFailed(format!("{}: {}", key, e)))?;

        serde_json::from_slice(&data)
            .map_err(|e| StorageError::Metadata(format!("Failed to parse metadata {}: {}", key, e)))
    }

    async fn write_info(&self, item: &MediaItem) -> StorageResult<()> {
        keys::validate_id(&item.id)?;
        let data = serde_json::to_vec_pretty(item)
            .map_err(|e| StorageError::Metadata(format!("Failed to serialize metadata: {}", e)))?;
        self.put(&keys::metadata_key(&item.id), Bytes::from(data)).await
    }

    async fn remove_derived(&self, item: &MediaItem) {
        for variant in [Variant::WebP, Variant::Avif] {
            let Some(key) = keys::derived_key(&item.id, variant, item.orientation) else {
                continue;
            };
            match self.remove(&key).await {
                Ok(()) => {}
                Err(StorageError::NotFound(_)) => {
                    tracing::debug!(id = %item.id, variant = %variant, "Variant absent, skipping");
                }
                Err(e) => {
                    tracing::warn!(id = %item.id, variant = %variant, error = %e, "Failed to delete variant");
                }
            }
        }
    }

    /// Remove one expired item under its lock. Variant deletes are best-effort;
    /// only a failed metadata delete is an error. `Ok(false)` when the item
    /// vanished or is no longer expired.
    async fn purge_expired(&self, id: &str, now: DateTime<Utc>) -> StorageResult<bool> {
        let _guard = self.locks.lock(id).await;
        let item = match self.read_info(id).await {
            Ok(item) if item.is_expired_at(now) => item,
            Ok(_) => return Ok(false),
            Err(e) => {
                tracing::debug!(id = %id, error = %e, "Expired item vanished before sweep");
                return Ok(false);
            }
        };

        match self
            .find_original(&item.id, item.orientation, item.original_extension.as_deref())
            .await
        {
            Ok(key) => {
                if let Err(e) = self.remove(&key).await {
                    tracing::warn!(id = %item.id, error = %e, "Failed to delete original of expired item");
                }
            }
            Err(e) => {
                tracing::debug!(id = %item.id, error = %e, "Original of expired item not found");
            }
        }
        self.remove_derived(&item).await;

        self.remove(&keys::metadata_key(&item.id)).await?;
        Ok(true)
    }
}

#[async_trait]
impl Storage for ObjectStorage {
    fn backend_type(&self) -> StorageBackend {
        self.backend
    }

    async fn save(
        &self,
        id: Option<&str>,
        content: Bytes,
        original_filename: &str,
        variant: Variant,
        orientation: Orientation,
    ) -> StorageResult<String> {
        let id = match id {
            Some(id) => {
                keys::validate_id(id)?;
                id.to_string()
            }
            None if variant.is_original() => keys::generate_id(),
            None => {
                return Err(StorageError::InvalidKey(format!(
                    "Saving the {} variant requires the id of its original",
                    variant
                )))
            }
        };

        let ext = match variant.derived_format() {
            Some(format) => format.extension().to_string(),
            None => keys::original_extension(original_filename),
        };
        self.put(&keys::variant_key(&id, variant, orientation, &ext), content)
            .await?;

        Ok(id)
    }

    async fn delete(
        &self,
        id: &str,
        variant: Variant,
        orientation: Orientation,
    ) -> StorageResult<()> {
        let key = self.variant_key(id, variant, orientation).await?;
        self.remove(&key).await
    }

    async fn get(
        &self,
        id: &str,
        variant: Variant,
        orientation: Orientation,
    ) -> StorageResult<ByteStream> {
        let key = self.variant_key(id, variant, orientation).await?;
        let start = std::time::Instant::now();
        let result = self.fetch(&key).await?;

        let backend = self.backend;
        let stream = result.into_stream().map(move |res| match res {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                tracing::error!(
                    backend = %backend,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Object storage stream read error"
                );
                Err(StorageError::ReadFailed(e.to_string()))
            }
        });

        Ok(Box::pin(stream))
    }

    fn get_url(&self, id: &str, variant: Variant, orientation: Orientation) -> String {
        keys::public_url(&self.public_base, id, variant, orientation)
    }

    fn locator(&self, variant: Variant, orientation: Orientation) -> String {
        format!("{}/{}", self.locator_root, keys::variant_dir(variant, orientation))
    }

    async fn list(&self) -> StorageResult<Vec<MediaItem>> {
        let mut items = Vec::new();
        for location in self.list_keys(keys::METADATA_DIR).await? {
            let Some(id) = location.filename().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            match self.read_info(id).await {
                Ok(item) => items.push(item),
                Err(e) => {
                    tracing::debug!(key = %location, error = %e, "Skipping unreadable metadata");
                }
            }
        }
        Ok(items)
    }

    async fn get_info(&self, id: &str) -> StorageResult<MediaItem> {
        self.read_info(id).await
    }

    async fn save_info(&self, item: &MediaItem) -> StorageResult<()> {
        keys::validate_id(&item.id)?;
        let _guard = self.locks.lock(&item.id).await;
        self.write_info(item).await
    }

    async fn delete_info(&self, id: &str) -> StorageResult<()> {
        keys::validate_id(id)?;
        let _guard = self.locks.lock(id).await;
        self.remove(&keys::metadata_key(id)).await
    }

    async fn update_info(&self, id: &str, update: InfoUpdate) -> StorageResult<MediaItem> {
        keys::validate_id(id)?;
        let _guard = self.locks.lock(id).await;
        let mut item = self.read_info(id).await?;
        update(&mut item);
        item.id = id.to_string();
        self.write_info(&item).await?;
        Ok(item)
    }

    async fn delete_item(&self, id: &str) -> StorageResult<()> {
        keys::validate_id(id)?;
        let _guard = self.locks.lock(id).await;

        let item = self.read_info(id).await?;
        let original = self
            .find_original(id, item.orientation, item.original_extension.as_deref())
            .await?;
        self.remove(&original).await?;
        self.remove_derived(&item).await;
        self.remove(&keys::metadata_key(id)).await
    }

    #[tracing::instrument(skip(self), fields(backend = %self.backend))]
    async fn clean_expired(&self) -> StorageResult<usize> {
        let now = Utc::now();
        let candidates = self.list().await?;
        Ok(sweep_expired(candidates, now, |item| async move {
            self.purge_expired(&item.id, now).await
        })
        .await)
    }
}
