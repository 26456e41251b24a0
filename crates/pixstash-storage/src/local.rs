use crate::keys;
use crate::locks::IdLocks;
use crate::sweep::sweep_expired;
use crate::traits::{ByteStream, InfoUpdate, Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use pixstash_core::{MediaItem, Orientation, Variant};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Local filesystem storage implementation
///
/// Lays files out exactly as described in the crate docs, so a tree written by
/// one deployment can be served by another.
#[derive(Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
    public_url_prefix: String,
    locks: Arc<IdLocks>,
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    ///
    /// All six variant directories and `metadata/` are created up front.
    ///
    /// # Arguments
    /// * `base_path` - Root directory for file storage (e.g., "static/images")
    /// * `public_url_prefix` - Prefix the tree is served under (e.g., "/static/images")
    pub async fn new(
        base_path: impl Into<PathBuf>,
        public_url_prefix: impl Into<String>,
    ) -> StorageResult<Self> {
        let base_path = base_path.into();

        let mut dirs = vec![base_path.join(keys::METADATA_DIR)];
        for variant in Variant::ALL {
            for orientation in Orientation::ALL {
                dirs.push(base_path.join(keys::variant_dir(variant, orientation)));
            }
        }

        for dir in &dirs {
            fs::create_dir_all(dir).await.map_err(|e| {
                StorageError::ConfigError(format!(
                    "Failed to create storage directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        Ok(LocalStorage {
            base_path,
            public_url_prefix: public_url_prefix.into(),
            locks: Arc::new(IdLocks::new()),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn dir_path(&self, variant: Variant, orientation: Orientation) -> PathBuf {
        self.base_path.join(keys::variant_dir(variant, orientation))
    }

    fn metadata_path(&self, id: &str) -> PathBuf {
        self.base_path.join(keys::metadata_key(id))
    }

    /// Ensure parent directory exists
    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Locate the original of `id`.
    ///
    /// The recorded extension is tried first. Records written without one fall
    /// back to scanning for `{id}.*`; with several candidates the first in
    /// sorted order wins.
    async fn find_original(
        &self,
        id: &str,
        orientation: Orientation,
        ext_hint: Option<&str>,
    ) -> StorageResult<PathBuf> {
        let dir = self.dir_path(Variant::Original, orientation);

        if let Some(ext) = ext_hint {
            let path = dir.join(format!("{}.{}", id, ext));
            if fs::try_exists(&path).await.unwrap_or(false) {
                return Ok(path);
            }
        }

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound(format!("original/{}/{}", orientation, id)))
            }
            Err(e) => {
                return Err(StorageError::ReadFailed(format!(
                    "Failed to read directory {}: {}",
                    dir.display(),
                    e
                )))
            }
        };

        let mut matches = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if keys::is_original_of(name, id) {
                    matches.push(entry.path());
                }
            }
        }
        matches.sort();

        if matches.len() > 1 {
            tracing::warn!(
                id = %id,
                orientation = %orientation,
                candidates = matches.len(),
                chosen = %matches[0].display(),
                "Multiple originals found for item, using the first"
            );
        }

        matches
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::NotFound(format!("original/{}/{}", orientation, id)))
    }

    async fn variant_path(
        &self,
        id: &str,
        variant: Variant,
        orientation: Orientation,
    ) -> StorageResult<PathBuf> {
        keys::validate_id(id)?;
        match keys::derived_file_name(id, variant) {
            Some(name) => Ok(self.dir_path(variant, orientation).join(name)),
            None => {
                let hint = self.read_info(id).await.ok().and_then(|i| i.original_extension);
                self.find_original(id, orientation, hint.as_deref()).await
            }
        }
    }

    async fn remove_file(&self, path: &Path, what: &str) -> StorageResult<()> {
        let start = std::time::Instant::now();

        fs::remove_file(path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StorageError::NotFound(what.to_string())
            } else {
                StorageError::DeleteFailed(format!(
                    "Failed to delete file {}: {}",
                    path.display(),
                    e
                ))
            }
        })?;

        tracing::info!(
            path = %path.display(),
            key = %what,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage delete successful"
        );

        Ok(())
    }

    async fn read_info(&self, id: &str) -> StorageResult<MediaItem> {
        keys::validate_id(id)?;
        let path = self.metadata_path(id);

        let data = fs::read(&path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StorageError::NotFound(format!("metadata for {}", id))
            } else {
                StorageError::ReadFailed(format!(
                    "Failed to read metadata {}: {}",
                    path.display(),
                    e
                ))
            }
        })?;

        serde_json::from_slice(&data).map_err(|e| {
            StorageError::Metadata(format!("Failed to parse metadata {}: {}", path.display(), e))
        })
    }

    /// Write a record through a temp file so readers never see a partial document.
    async fn write_info(&self, item: &MediaItem) -> StorageResult<()> {
        keys::validate_id(&item.id)?;
        let path = self.metadata_path(&item.id);
        self.ensure_parent_dir(&path).await?;

        let data = serde_json::to_vec_pretty(item)
            .map_err(|e| StorageError::Metadata(format!("Failed to serialize metadata: {}", e)))?;

        let tmp_path = path.with_file_name(format!(".{}.json.tmp", item.id));
        fs::write(&tmp_path, &data).await.map_err(|e| {
            StorageError::WriteFailed(format!(
                "Failed to write metadata {}: {}",
                tmp_path.display(),
                e
            ))
        })?;
        fs::rename(&tmp_path, &path).await.map_err(|e| {
            StorageError::WriteFailed(format!(
                "Failed to move metadata into place {}: {}",
                path.display(),
                e
            ))
        })?;

        tracing::debug!(id = %item.id, path = %path.display(), "Metadata written");
        Ok(())
    }

    async fn remove_info(&self, id: &str) -> StorageResult<()> {
        keys::validate_id(id)?;
        let path = self.metadata_path(id);
        self.remove_file(&path, &keys::metadata_key(id)).await
    }

    /// Best-effort removal of the derived variants of one item.
    async fn remove_derived(&self, item: &MediaItem) {
        for variant in [Variant::WebP, Variant::Avif] {
            let Some(name) = keys::derived_file_name(&item.id, variant) else {
                continue;
            };
            let path = self.dir_path(variant, item.orientation).join(name);
            match self.remove_file(&path, variant.as_str()).await {
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
            Ok(path) => {
                if let Err(e) = self.remove_file(&path, "original").await {
                    tracing::warn!(id = %item.id, error = %e, "Failed to delete original of expired item");
                }
            }
            Err(e) => {
                tracing::debug!(id = %item.id, error = %e, "Original of expired item not found");
            }
        }
        self.remove_derived(&item).await;

        self.remove_info(&item.id).await?;
        Ok(true)
    }
}

#[async_trait]
impl Storage for LocalStorage {
    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
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
        let path = self
            .base_path
            .join(keys::variant_key(&id, variant, orientation, &ext));
        let size = content.len();

        self.ensure_parent_dir(&path).await?;

        let start = std::time::Instant::now();

        let mut file = fs::File::create(&path).await.map_err(|e| {
            StorageError::WriteFailed(format!("Failed to create file {}: {}", path.display(), e))
        })?;

        file.write_all(&content).await.map_err(|e| {
            StorageError::WriteFailed(format!("Failed to write file {}: {}", path.display(), e))
        })?;

        file.sync_all().await.map_err(|e| {
            StorageError::WriteFailed(format!("Failed to sync file {}: {}", path.display(), e))
        })?;

        tracing::info!(
            path = %path.display(),
            id = %id,
            variant = %variant,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage save successful"
        );

        Ok(id)
    }

    async fn delete(
        &self,
        id: &str,
        variant: Variant,
        orientation: Orientation,
    ) -> StorageResult<()> {
        let path = self.variant_path(id, variant, orientation).await?;
        self.remove_file(&path, &format!("{}/{}", keys::variant_dir(variant, orientation), id))
            .await
    }

    async fn get(
        &self,
        id: &str,
        variant: Variant,
        orientation: Orientation,
    ) -> StorageResult<ByteStream> {
        let path = self.variant_path(id, variant, orientation).await?;
        let start = std::time::Instant::now();

        let file = fs::File::open(&path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StorageError::NotFound(format!("{}/{}", keys::variant_dir(variant, orientation), id))
            } else {
                StorageError::ReadFailed(format!("Failed to open file {}: {}", path.display(), e))
            }
        })?;

        let reader = tokio_util::io::ReaderStream::new(file);

        let key = id.to_string();
        let path_display = path.display().to_string();
        let stream = reader.map(move |result| {
            result.map_err(|e| {
                tracing::error!(
                    path = %path_display,
                    id = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Local storage read error"
                );
                StorageError::ReadFailed(format!("Failed to read chunk: {}", e))
            })
        });

        Ok(Box::pin(stream))
    }

    fn get_url(&self, id: &str, variant: Variant, orientation: Orientation) -> String {
        keys::public_url(&self.public_url_prefix, id, variant, orientation)
    }

    fn locator(&self, variant: Variant, orientation: Orientation) -> String {
        self.dir_path(variant, orientation).display().to_string()
    }

    async fn list(&self) -> StorageResult<Vec<MediaItem>> {
        let dir = self.base_path.join(keys::METADATA_DIR);
        let mut entries = fs::read_dir(&dir).await.map_err(|e| {
            StorageError::ReadFailed(format!(
                "Failed to read metadata directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let mut items = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            match self.read_info(id).await {
                Ok(item) => items.push(item),
                Err(e) => {
                    tracing::debug!(file = ?name, error = %e, "Skipping unreadable metadata");
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
        self.remove_info(id).await
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
        self.remove_file(&original, &format!("original/{}/{}", item.orientation, id))
            .await?;
        self.remove_derived(&item).await;
        self.remove_info(id).await
    }

    #[tracing::instrument(skip(self), fields(base_path = %self.base_path.display()))]
    async fn clean_expired(&self) -> StorageResult<usize> {
        let now = Utc::now();
        let candidates = self.list().await?;
        Ok(sweep_expired(candidates, now, |item| async move {
            self.purge_expired(&item.id, now).await
        })
        .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pixstash_core::ImageFormat;
    use tempfile::tempdir;

    async fn storage(dir: &Path) -> LocalStorage {
        LocalStorage::new(dir, "/static/images").await.unwrap()
    }

    async fn store_item(storage: &LocalStorage, filename: &str, orientation: Orientation) -> MediaItem {
        let id = storage
            .save(None, Bytes::from_static(b"original"), filename, Variant::Original, orientation)
            .await
            .unwrap();
        let mut item = MediaItem::new(&id, filename, ImageFormat::Jpeg, 10, 10, 8);
        item.orientation = orientation;
        item.original_extension = Some(keys::original_extension(filename));
        storage.save_info(&item).await.unwrap();
        item
    }

    #[tokio::test]
    async fn test_creates_layout_eagerly() {
        let dir = tempdir().unwrap();
        storage(dir.path()).await;

        for sub in [
            "original/landscape",
            "original/portrait",
            "webp/landscape",
            "webp/portrait",
            "avif/landscape",
            "avif/portrait",
            "metadata",
        ] {
            assert!(dir.path().join(sub).is_dir(), "missing {sub}");
        }
    }

    #[tokio::test]
    async fn test_save_get_round_trip() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;
        let data = Bytes::from_static(b"\x89PNG fake image bytes");

        let id = storage
            .save(None, data.clone(), "Holiday.PNG", Variant::Original, Orientation::Portrait)
            .await
            .unwrap();
        assert!(dir
            .path()
            .join(format!("original/portrait/{}.PNG", id))
            .is_file());

        let read = storage
            .get_bytes(&id, Variant::Original, Orientation::Portrait)
            .await
            .unwrap();
        assert_eq!(read, data);

        let webp = Bytes::from_static(b"RIFF....WEBP");
        storage
            .save(Some(&id), webp.clone(), "Holiday.PNG", Variant::WebP, Orientation::Portrait)
            .await
            .unwrap();
        assert!(dir.path().join(format!("webp/portrait/{}.webp", id)).is_file());
        assert_eq!(
            storage.get_bytes(&id, Variant::WebP, Orientation::Portrait).await.unwrap(),
            webp
        );
    }

    #[tokio::test]
    async fn test_derived_save_requires_id() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        let result = storage
            .save(None, Bytes::new(), "a.jpg", Variant::Avif, Orientation::Landscape)
            .await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        let result = storage.get_info("../../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage
            .delete("../x", Variant::WebP, Orientation::Landscape)
            .await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_get_url_is_pure() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        let a = storage.get_url("abc", Variant::WebP, Orientation::Landscape);
        let b = storage.get_url("abc", Variant::WebP, Orientation::Landscape);
        assert_eq!(a, b);
        assert_eq!(a, "/static/images/webp/landscape/abc.webp");
        assert_eq!(
            storage.get_url("abc", Variant::Original, Orientation::Portrait),
            "/static/images/original/portrait/abc"
        );
        assert!(!dir.path().join("webp/landscape/abc.webp").exists());
    }

    #[tokio::test]
    async fn test_info_round_trip_and_missing() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;
        let item = MediaItem::new("abc", "a.jpg", ImageFormat::Jpeg, 4, 3, 100)
            .with_tags(vec!["x".to_string()]);

        storage.save_info(&item).await.unwrap();
        assert_eq!(storage.get_info("abc").await.unwrap(), item);

        storage.delete_info("abc").await.unwrap();
        assert!(storage.get_info("abc").await.unwrap_err().is_not_found());
        assert!(storage.delete_info("abc").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_missing_variant_is_not_found() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        let result = storage.delete("nope", Variant::WebP, Orientation::Landscape).await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));

        let result = storage.delete("nope", Variant::Original, Orientation::Landscape).await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_item_with_only_original() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;
        let item = store_item(&storage, "a.jpg", Orientation::Landscape).await;

        storage.delete_item(&item.id).await.unwrap();

        assert!(storage.get_info(&item.id).await.unwrap_err().is_not_found());
        assert!(!dir
            .path()
            .join(format!("original/landscape/{}.jpg", item.id))
            .exists());
    }

    #[tokio::test]
    async fn test_delete_item_without_metadata() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        let result = storage.delete_item("ghost").await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_original_lookup_without_recorded_extension() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        let original = dir.path().join("original/landscape");
        std::fs::write(original.join("legacy.png"), b"png").unwrap();
        std::fs::write(original.join("legacy.jpg"), b"jpg").unwrap();
        std::fs::write(original.join("legacy2.gif"), b"other").unwrap();

        let read = storage
            .get_bytes("legacy", Variant::Original, Orientation::Landscape)
            .await
            .unwrap();
        assert_eq!(read.as_ref(), b"jpg");
    }

    #[tokio::test]
    async fn test_recorded_extension_wins_over_scan() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        let original = dir.path().join("original/landscape");
        std::fs::write(original.join("abc.jpg"), b"jpg").unwrap();
        std::fs::write(original.join("abc.png"), b"png").unwrap();
        let mut item = MediaItem::new("abc", "abc.png", ImageFormat::Png, 2, 1, 3);
        item.original_extension = Some("png".to_string());
        storage.save_info(&item).await.unwrap();

        let read = storage
            .get_bytes("abc", Variant::Original, Orientation::Landscape)
            .await
            .unwrap();
        assert_eq!(read.as_ref(), b"png");
    }

    #[tokio::test]
    async fn test_list_returns_every_item() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(store_item(&storage, &format!("{i}.jpg"), Orientation::Landscape).await.id);
        }
        std::fs::write(dir.path().join("metadata/broken.json"), b"{not json").unwrap();

        let mut listed: Vec<String> = storage.list().await.unwrap().into_iter().map(|i| i.id).collect();
        listed.sort();
        ids.sort();
        assert_eq!(listed, ids);
    }

    #[tokio::test]
    async fn test_clean_expired() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;
        let now = Utc::now();

        let expired = store_item(&storage, "old.jpg", Orientation::Portrait).await;
        storage
            .save(Some(&expired.id), Bytes::from_static(b"w"), "old.jpg", Variant::WebP, Orientation::Portrait)
            .await
            .unwrap();
        storage
            .update_info(&expired.id, Box::new(move |i: &mut MediaItem| i.set_expiry(Some(now - Duration::hours(1)))))
            .await
            .unwrap();

        let stale_flagless = store_item(&storage, "keep.jpg", Orientation::Landscape).await;
        storage
            .update_info(
                &stale_flagless.id,
                Box::new(move |i: &mut MediaItem| {
                    i.expires_at = now - Duration::days(30);
                    i.has_expiry = false;
                }),
            )
            .await
            .unwrap();

        let future = store_item(&storage, "later.jpg", Orientation::Landscape).await;
        storage
            .update_info(&future.id, Box::new(move |i: &mut MediaItem| i.set_expiry(Some(now + Duration::days(1)))))
            .await
            .unwrap();

        assert_eq!(storage.clean_expired().await.unwrap(), 1);

        assert!(storage.get_info(&expired.id).await.unwrap_err().is_not_found());
        assert!(!dir.path().join(format!("webp/portrait/{}.webp", expired.id)).exists());
        assert!(!dir.path().join(format!("original/portrait/{}.jpg", expired.id)).exists());
        assert!(storage.get_info(&stale_flagless.id).await.is_ok());
        assert!(storage.get_info(&future.id).await.is_ok());

        assert_eq!(storage.clean_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_clean_expired_survives_undeletable_original() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;
        let past = Utc::now() - Duration::hours(1);

        // an original that cannot be removed with remove_file
        let stuck_dir = dir.path().join("original/landscape/stuck.jpg");
        std::fs::create_dir_all(stuck_dir.join("inner")).unwrap();
        let mut stuck = MediaItem::new("stuck", "stuck.jpg", ImageFormat::Jpeg, 1, 1, 1)
            .with_expiry(Some(past));
        stuck.original_extension = Some("jpg".to_string());
        storage.save_info(&stuck).await.unwrap();

        let plain = store_item(&storage, "plain.jpg", Orientation::Landscape).await;
        storage
            .update_info(&plain.id, Box::new(move |i: &mut MediaItem| i.set_expiry(Some(past))))
            .await
            .unwrap();

        assert_eq!(storage.clean_expired().await.unwrap(), 2);
        assert!(storage.get_info("stuck").await.unwrap_err().is_not_found());
        assert!(storage.get_info(&plain.id).await.unwrap_err().is_not_found());
        assert!(stuck_dir.is_dir());
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_not_lost() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(storage(dir.path()).await);
        let item = MediaItem::new("shared", "s.jpg", ImageFormat::Jpeg, 1, 1, 1);
        storage.save_info(&item).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..10 {
            let storage = storage.clone();
            handles.push(tokio::spawn(async move {
                storage
                    .update_info("shared", Box::new(move |item: &mut MediaItem| item.tags.push(format!("t{i}"))))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(storage.get_info("shared").await.unwrap().tags.len(), 10);
    }
}
