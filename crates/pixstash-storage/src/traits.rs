//! Storage abstraction trait
//!
//! This module defines the Storage trait that all storage backends must implement.

use crate::StorageBackend;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use pixstash_core::{MediaItem, Orientation, Variant};
use std::pin::Pin;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Unsupported storage backend: {0}")]
    UnsupportedBackend(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Chunked read of one stored variant.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// Mutation applied to a record under its id lock by [`Storage::update_info`].
pub type InfoUpdate = Box<dyn FnOnce(&mut MediaItem) + Send>;

/// Storage abstraction trait
///
/// All backends share one layout (see the crate docs) and identical semantics,
/// so services never branch on the concrete backend.
///
/// Metadata mutation (`save_info`, `delete_info`, `update_info`, `delete_item`
/// and each item of `clean_expired`) is serialized per id. Nothing makes the
/// multi-step upload sequence atomic; callers compensate on failure.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;

    /// Persist one encoded variant and return the item id.
    ///
    /// For the original, `id = None` allocates a fresh id. Derived variants must
    /// name the id of their original; `None` fails with `InvalidKey`. The
    /// original keeps the extension of `original_filename`.
    async fn save(
        &self,
        id: Option<&str>,
        content: Bytes,
        original_filename: &str,
        variant: Variant,
        orientation: Orientation,
    ) -> StorageResult<String>;

    /// Remove one variant. `NotFound` when it does not exist.
    async fn delete(&self, id: &str, variant: Variant, orientation: Orientation)
        -> StorageResult<()>;

    /// Open one variant for reading. `NotFound` when it does not exist.
    async fn get(
        &self,
        id: &str,
        variant: Variant,
        orientation: Orientation,
    ) -> StorageResult<ByteStream>;

    /// Read one variant fully into memory.
    async fn get_bytes(
        &self,
        id: &str,
        variant: Variant,
        orientation: Orientation,
    ) -> StorageResult<Bytes> {
        let mut stream = self.get(id, variant, orientation).await?;
        let mut buffer = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer.freeze())
    }

    /// Public URL of a variant. Pure string formatting; never performs I/O.
    fn get_url(&self, id: &str, variant: Variant, orientation: Orientation) -> String;

    /// Backend locator of a variant directory, recorded as `storagePath`.
    fn locator(&self, variant: Variant, orientation: Orientation) -> String;

    /// Every item whose metadata parses. Order is unspecified.
    async fn list(&self) -> StorageResult<Vec<MediaItem>>;

    /// `NotFound` when no metadata exists for `id`.
    async fn get_info(&self, id: &str) -> StorageResult<MediaItem>;

    /// Upsert keyed by `item.id`.
    async fn save_info(&self, item: &MediaItem) -> StorageResult<()>;

    /// `NotFound` when no metadata exists for `id`.
    async fn delete_info(&self, id: &str) -> StorageResult<()>;

    /// Read, mutate and write back one record atomically with respect to
    /// other metadata operations on the same id.
    async fn update_info(&self, id: &str, update: InfoUpdate) -> StorageResult<MediaItem>;

    /// Delete a whole item: the original must exist, webp and avif are
    /// removed best-effort, then the metadata record.
    async fn delete_item(&self, id: &str) -> StorageResult<()>;

    /// Delete every item whose expiry has passed and return how many were
    /// removed. Per-item failures are logged and skipped.
    async fn clean_expired(&self) -> StorageResult<usize>;
}
