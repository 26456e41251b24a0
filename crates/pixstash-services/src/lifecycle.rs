//! Media lifecycle operations: full-item deletion, tag and expiry updates.

use chrono::{DateTime, Utc};
use pixstash_core::MediaItem;
use pixstash_storage::{Storage, StorageResult};
use std::sync::Arc;

/// Trim tags, drop empty ones and duplicates; first occurrence wins.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalized: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.as_ref().trim();
        if !tag.is_empty() && !normalized.iter().any(|t| t == tag) {
            normalized.push(tag.to_string());
        }
    }
    normalized
}

#[derive(Clone)]
pub struct MediaLifecycleService {
    storage: Arc<dyn Storage>,
}

impl MediaLifecycleService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn get(&self, id: &str) -> StorageResult<MediaItem> {
        self.storage.get_info(id).await
    }

    /// Remove the original, its derived variants and the metadata record.
    pub async fn delete(&self, id: &str) -> StorageResult<()> {
        self.storage.delete_item(id).await?;
        tracing::info!(id = %id, "Image deleted");
        Ok(())
    }

    /// Replace the tag set.
    pub async fn set_tags(&self, id: &str, tags: Vec<String>) -> StorageResult<MediaItem> {
        let tags = normalize_tags(tags);
        let item = self
            .storage
            .update_info(id, Box::new(move |item: &mut MediaItem| item.tags = tags))
            .await?;

        tracing::info!(id = %id, tags = ?item.tags, "Tags updated");
        Ok(item)
    }

    /// Set the expiry, or clear it with `None`.
    pub async fn set_expiry(
        &self,
        id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> StorageResult<MediaItem> {
        let item = self
            .storage
            .update_info(
                id,
                Box::new(move |item: &mut MediaItem| item.set_expiry(expires_at)),
            )
            .await?;

        tracing::info!(id = %id, expires_at = ?item.expiry(), "Expiry updated");
        Ok(item)
    }
}
