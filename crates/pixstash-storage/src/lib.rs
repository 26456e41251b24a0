//! Pixstash Storage Library
//!
//! This crate provides the `Storage` trait and its backends: the local
//! filesystem, S3-compatible object storage, and a mounted remote filesystem.
//!
//! # Layout
//!
//! Every backend uses the same relative layout, rooted at a directory or bucket:
//!
//! - `original/{landscape|portrait}/{id}.{ext-of-upload}`
//! - `webp/{landscape|portrait}/{id}.webp`
//! - `avif/{landscape|portrait}/{id}.avif`
//! - `metadata/{id}.json`
//!
//! Ids are restricted to `[A-Za-z0-9_-]` before they are joined into paths or
//! keys. Key generation is centralized in the `keys` module.

pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod locks;
#[cfg(feature = "storage-object")]
pub mod object;
pub mod registry;
mod sweep;
pub mod traits;

// Re-export commonly used types
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use locks::IdLocks;
#[cfg(feature = "storage-object")]
pub use object::ObjectStorage;
pub use pixstash_core::StorageBackend;
pub use registry::{create_storage, StorageRegistry};
pub use traits::{ByteStream, InfoUpdate, Storage, StorageError, StorageResult};
