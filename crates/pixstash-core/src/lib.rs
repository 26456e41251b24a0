//! Pixstash Core Library
//!
//! This crate provides the domain vocabulary shared by every pixstash component:
//! image formats, stored variants, orientation, the `MediaItem` metadata record,
//! storage backend names, and the resolved configuration.

pub mod config;
pub mod error;
pub mod models;
pub mod storage_types;

// Re-export commonly used types
pub use config::{
    CleanupSettings, Config, ProcessingSettings, S3Settings, StorageSettings, WatermarkSettings,
};
pub use error::ConfigError;
pub use models::{ImageFormat, MediaItem, Orientation, Variant};
pub use storage_types::StorageBackend;
