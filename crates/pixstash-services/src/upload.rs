//! Upload pipeline
//!
//! One upload runs as a saga: detect → describe → strip EXIF → watermark →
//! encode derived variants → save original → save derived → save metadata.
//! Nothing is written before every encoding succeeded; once the original is
//! stored, a failing step triggers best-effort deletes of what was written.

use crate::lifecycle::normalize_tags;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::DynamicImage;
use pixstash_core::{Config, ImageFormat, MediaItem, Orientation, Variant};
use pixstash_processing::{
    strip_metadata, ConvertOptions, Converter, ProcessingError, Watermarker,
};
use pixstash_storage::{keys, Storage, StorageError};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub quality: u8,
    pub effort: u8,
    pub lossless: bool,
    pub enable_avif: bool,
    pub strip_exif: bool,
    /// Fail the upload when the watermark cannot be applied instead of storing it unmarked.
    pub watermark_required: bool,
    pub max_upload_size: u64,
    pub max_upload_count: usize,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            quality: 80,
            effort: 6,
            lossless: false,
            enable_avif: false,
            strip_exif: true,
            watermark_required: false,
            max_upload_size: 10 * 1024 * 1024,
            max_upload_count: 20,
        }
    }
}

impl UploadSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            quality: config.processing.quality,
            effort: config.processing.effort,
            lossless: config.processing.force_lossless,
            enable_avif: config.processing.enable_avif,
            strip_exif: config.processing.enable_exif_strip,
            watermark_required: false,
            max_upload_size: config.max_upload_size,
            max_upload_count: config.max_upload_count,
        }
    }

    fn convert_options(&self, format: ImageFormat) -> ConvertOptions {
        ConvertOptions::new(format)
            .with_quality(self.quality)
            .with_effort(self.effort)
            .with_lossless(self.lossless)
    }
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub filename: String,
    pub data: Bytes,
    pub tags: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl UploadRequest {
    pub fn new(filename: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            data: data.into(),
            tags: Vec::new(),
            expires_at: None,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_expiry(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = expires_at;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedImage {
    pub id: String,
    pub url: String,
    pub webp_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avif_url: Option<String>,
    pub item: MediaItem,
}

/// The persistence step an upload failed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaStep {
    SaveOriginal,
    SaveWebp,
    SaveAvif,
    SaveMetadata,
}

impl fmt::Display for SagaStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            SagaStep::SaveOriginal => "saving original",
            SagaStep::SaveWebp => "saving webp",
            SagaStep::SaveAvif => "saving avif",
            SagaStep::SaveMetadata => "saving metadata",
        };
        f.write_str(step)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("No files to upload")]
    Empty,

    #[error("Too many files: {count} (limit {limit})")]
    TooManyFiles { count: usize, limit: usize },

    #[error("{filename}: {size} bytes exceeds the upload limit of {limit} bytes")]
    TooLarge {
        filename: String,
        size: u64,
        limit: u64,
    },

    #[error("{filename}: {source}")]
    Processing {
        filename: String,
        #[source]
        source: ProcessingError,
    },

    /// A storage write failed. `compensation_errors` lists deletes that
    /// could not undo earlier steps; their files may be orphaned.
    #[error("{filename}: {step} failed: {source}")]
    Persist {
        filename: String,
        step: SagaStep,
        #[source]
        source: StorageError,
        compensation_errors: Vec<StorageError>,
    },
}

impl UploadError {
    fn processing(filename: &str, source: ProcessingError) -> Self {
        Self::Processing {
            filename: filename.to_string(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    AllSucceeded,
    Partial,
    AllFailed,
}

#[derive(Debug)]
pub struct BatchFailure {
    pub filename: String,
    pub error: UploadError,
}

#[derive(Debug, Default)]
pub struct BatchUploadReport {
    pub succeeded: Vec<UploadedImage>,
    pub failed: Vec<BatchFailure>,
}

impl BatchUploadReport {
    pub fn outcome(&self) -> BatchOutcome {
        match (self.succeeded.is_empty(), self.failed.is_empty()) {
            (_, true) => BatchOutcome::AllSucceeded,
            (true, false) => BatchOutcome::AllFailed,
            (false, false) => BatchOutcome::Partial,
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

pub struct UploadService {
    storage: Arc<dyn Storage>,
    converter: Arc<Converter>,
    watermarker: Option<Arc<Watermarker>>,
    settings: UploadSettings,
}

impl UploadService {
    pub fn new(
        storage: Arc<dyn Storage>,
        converter: Arc<Converter>,
        settings: UploadSettings,
    ) -> Self {
        Self {
            storage,
            converter,
            watermarker: None,
            settings,
        }
    }

    pub fn with_watermarker(mut self, watermarker: Arc<Watermarker>) -> Self {
        self.watermarker = Some(watermarker);
        self
    }

    pub fn require_watermark(mut self, required: bool) -> Self {
        self.settings.watermark_required = required;
        self
    }

    pub fn settings(&self) -> &UploadSettings {
        &self.settings
    }

    /// Upload one image.
    #[tracing::instrument(skip(self, request), fields(filename = %request.filename, size_bytes = request.data.len()))]
    pub async fn upload(&self, request: UploadRequest) -> Result<UploadedImage, UploadError> {
        let start = Instant::now();
        let UploadRequest {
            filename,
            data,
            tags,
            expires_at,
        } = request;

        let size = data.len() as u64;
        if size > self.settings.max_upload_size {
            return Err(UploadError::TooLarge {
                filename,
                size,
                limit: self.settings.max_upload_size,
            });
        }

        let input = data.clone();
        let (format, img) = run_blocking(move || Converter::detect_format(&input))
            .await
            .map_err(|e| UploadError::processing(&filename, e))?;
        let description = Converter::describe(&img, format);
        let orientation = description.orientation;

        tracing::debug!(
            format = %format,
            width = description.width,
            height = description.height,
            orientation = %orientation,
            "Image decoded"
        );

        let original = if self.settings.strip_exif {
            strip_metadata(data, format)
        } else {
            data
        };

        let img = self.watermark(img, &filename).await?;

        let webp = self
            .converter
            .convert(&img, &self.settings.convert_options(ImageFormat::WebP))
            .await
            .map_err(|e| UploadError::processing(&filename, e))?;

        let avif = if self.settings.enable_avif {
            let encoded = self
                .converter
                .convert(&img, &self.settings.convert_options(ImageFormat::Avif))
                .await
                .map_err(|e| UploadError::processing(&filename, e))?;
            Some(encoded)
        } else {
            None
        };

        let id = self
            .storage
            .save(None, original, &filename, Variant::Original, orientation)
            .await
            .map_err(|source| UploadError::Persist {
                filename: filename.clone(),
                step: SagaStep::SaveOriginal,
                source,
                compensation_errors: Vec::new(),
            })?;
        let mut saved = vec![Variant::Original];

        let result = self
            .storage
            .save(Some(&id), webp, &filename, Variant::WebP, orientation)
            .await;
        if let Err(source) = result {
            return Err(self
                .compensate(&id, orientation, &saved, filename, SagaStep::SaveWebp, source)
                .await);
        }
        saved.push(Variant::WebP);

        if let Some(avif) = avif {
            let result = self
                .storage
                .save(Some(&id), avif, &filename, Variant::Avif, orientation)
                .await;
            if let Err(source) = result {
                return Err(self
                    .compensate(&id, orientation, &saved, filename, SagaStep::SaveAvif, source)
                    .await);
            }
            saved.push(Variant::Avif);
        }

        let mut item = MediaItem::new(
            &id,
            &filename,
            format,
            description.width,
            description.height,
            size,
        )
        .with_tags(normalize_tags(tags))
        .with_expiry(expires_at);
        item.orientation = orientation;
        item.storage_locator = self.storage.locator(Variant::Original, orientation);
        item.original_extension = Some(keys::original_extension(&filename));

        let result = self.storage.save_info(&item).await;
        if let Err(source) = result {
            return Err(self
                .compensate(&id, orientation, &saved, filename, SagaStep::SaveMetadata, source)
                .await);
        }

        let uploaded = UploadedImage {
            url: self.storage.get_url(&id, Variant::Original, orientation),
            webp_url: self.storage.get_url(&id, Variant::WebP, orientation),
            avif_url: saved
                .contains(&Variant::Avif)
                .then(|| self.storage.get_url(&id, Variant::Avif, orientation)),
            id,
            item,
        };

        tracing::info!(
            id = %uploaded.id,
            format = %format,
            orientation = %orientation,
            variants = saved.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Image uploaded"
        );

        Ok(uploaded)
    }

    /// Upload every file, collecting per-file failures.
    ///
    /// Only an empty or oversized batch is rejected as a whole.
    #[tracing::instrument(skip(self, requests), fields(count = requests.len()))]
    pub async fn upload_batch(
        &self,
        requests: Vec<UploadRequest>,
    ) -> Result<BatchUploadReport, UploadError> {
        if requests.is_empty() {
            return Err(UploadError::Empty);
        }
        if requests.len() > self.settings.max_upload_count {
            return Err(UploadError::TooManyFiles {
                count: requests.len(),
                limit: self.settings.max_upload_count,
            });
        }

        let mut report = BatchUploadReport::default();
        for request in requests {
            let filename = request.filename.clone();
            match self.upload(request).await {
                Ok(uploaded) => report.succeeded.push(uploaded),
                Err(error) => {
                    tracing::warn!(filename = %filename, error = %error, "Upload failed");
                    report.failed.push(BatchFailure { filename, error });
                }
            }
        }

        tracing::info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            outcome = ?report.outcome(),
            "Batch upload finished"
        );

        Ok(report)
    }

    async fn watermark(
        &self,
        img: DynamicImage,
        filename: &str,
    ) -> Result<DynamicImage, UploadError> {
        let Some(watermarker) = self.watermarker.clone() else {
            return Ok(img);
        };

        let (img, result) = tokio::task::spawn_blocking(move || {
            let result = watermarker.apply(&img);
            (img, result)
        })
        .await
        .map_err(|e| UploadError::processing(filename, join_error(e)))?;

        match result {
            Ok(marked) => Ok(marked),
            Err(e) if self.settings.watermark_required => {
                Err(UploadError::processing(filename, e))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Watermark failed, storing without it");
                Ok(img)
            }
        }
    }

    /// Undo the writes in `saved`, newest first, and build the error to report.
    async fn compensate(
        &self,
        id: &str,
        orientation: Orientation,
        saved: &[Variant],
        filename: String,
        step: SagaStep,
        source: StorageError,
    ) -> UploadError {
        tracing::error!(id = %id, step = %step, error = %source, "Upload failed, rolling back");

        let mut compensation_errors = Vec::new();
        for &variant in saved.iter().rev() {
            if let Err(e) = self.storage.delete(id, variant, orientation).await {
                tracing::warn!(
                    id = %id,
                    variant = %variant,
                    error = %e,
                    "Rollback delete failed"
                );
                compensation_errors.push(e);
            }
        }

        UploadError::Persist {
            filename,
            step,
            source,
            compensation_errors,
        }
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, ProcessingError>
where
    F: FnOnce() -> Result<T, ProcessingError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(join_error)?
}

fn join_error(e: tokio::task::JoinError) -> ProcessingError {
    ProcessingError::Io(std::io::Error::other(format!("processing task failed: {}", e)))
}
