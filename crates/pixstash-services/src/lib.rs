//! Pixstash Services Layer
//!
//! Orchestration over storage and processing: the upload saga and batch
//! uploads, item lifecycle (delete, tags, expiry), catalog queries, and the
//! scheduled expiry sweep. Callers (the CLI today) stay thin and hold no
//! business rules of their own.

pub mod catalog;
pub mod cleanup;
pub mod lifecycle;
pub mod upload;

pub use catalog::{CatalogEntry, CatalogPage, CatalogService, ListQuery, TagCount};
pub use cleanup::CleanupService;
pub use lifecycle::MediaLifecycleService;
pub use upload::{
    BatchFailure, BatchOutcome, BatchUploadReport, SagaStep, UploadError, UploadRequest,
    UploadService, UploadSettings, UploadedImage,
};
