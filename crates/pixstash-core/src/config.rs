//! Configuration module
//!
//! Flat environment variables are read once at startup and grouped into
//! settings structs. The storage and processing crates only ever see these
//! structs; they never touch the environment themselves.

use std::env;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::storage_types::StorageBackend;

const LOCAL_STORAGE_PATH: &str = "static/images";
const PUBLIC_URL_PREFIX: &str = "/static/images";
const MAX_UPLOAD_SIZE: u64 = 10 * 1024 * 1024;
const MAX_UPLOAD_COUNT: usize = 20;
const IMAGE_QUALITY: u8 = 80;
const COMPRESSION_EFFORT: u8 = 6;
const AVIF_ENCODER: &str = "avifenc";
const AVIF_TIMEOUT_SECS: u64 = 30;
const CLEANUP_INTERVAL_SECS: u64 = 3600;
const WATERMARK_TEXT: &str = "InfiniteImages";
const WATERMARK_FONT: &str = "Arial";
const WATERMARK_SIZE: f32 = 24.0;
const WATERMARK_COLOR: &str = "#ffffff";
const WATERMARK_OPACITY: u8 = 50;
const WATERMARK_POSITION: &str = "bottom-right";
const WATERMARK_MARGIN: u32 = 10;

/// S3-compatible object storage credentials
#[derive(Clone, Debug, Default)]
pub struct S3Settings {
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub bucket: Option<String>,
    /// Public host serving the bucket, used by `get_url` when set.
    pub custom_domain: Option<String>,
}

/// Storage backend selection and per-backend settings
#[derive(Clone, Debug)]
pub struct StorageSettings {
    /// Backend name as configured. Resolved by the storage registry, so an
    /// unknown name surfaces as an error there instead of being replaced here.
    pub backend: String,
    pub local_path: String,
    pub public_url_prefix: String,
    pub s3: S3Settings,
    /// Root of the mounted remote filesystem (NFS/SSHFS).
    pub remote_fs_path: Option<String>,
}

impl StorageSettings {
    /// Local backend rooted at `path`; mostly useful in tests and tooling.
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            backend: StorageBackend::Local.to_string(),
            local_path: path.into(),
            public_url_prefix: PUBLIC_URL_PREFIX.to_string(),
            s3: S3Settings::default(),
            remote_fs_path: None,
        }
    }

    pub fn backend_kind(&self) -> Option<StorageBackend> {
        self.backend.parse().ok()
    }
}

#[derive(Clone, Debug)]
pub struct ProcessingSettings {
    pub quality: u8,
    pub effort: u8,
    pub force_lossless: bool,
    pub enable_avif: bool,
    pub avif_encoder: String,
    pub avif_timeout_secs: u64,
    pub enable_exif_strip: bool,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            quality: IMAGE_QUALITY,
            effort: COMPRESSION_EFFORT,
            force_lossless: false,
            enable_avif: false,
            avif_encoder: AVIF_ENCODER.to_string(),
            avif_timeout_secs: AVIF_TIMEOUT_SECS,
            enable_exif_strip: true,
        }
    }
}

/// Raw watermark settings. Colour and position are parsed by the processing crate.
#[derive(Clone, Debug)]
pub struct WatermarkSettings {
    pub enabled: bool,
    /// `text` or `image`
    pub kind: String,
    pub text: String,
    pub font: String,
    pub size: f32,
    pub color: String,
    /// Percent, 0-100.
    pub opacity: u8,
    pub position: String,
    pub image_path: Option<String>,
    pub margin: u32,
}

impl Default for WatermarkSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            kind: "text".to_string(),
            text: WATERMARK_TEXT.to_string(),
            font: WATERMARK_FONT.to_string(),
            size: WATERMARK_SIZE,
            color: WATERMARK_COLOR.to_string(),
            opacity: WATERMARK_OPACITY,
            position: WATERMARK_POSITION.to_string(),
            image_path: None,
            margin: WATERMARK_MARGIN,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CleanupSettings {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: CLEANUP_INTERVAL_SECS,
        }
    }
}

/// Resolved application configuration
#[derive(Clone, Debug)]
pub struct Config {
    pub storage: StorageSettings,
    pub processing: ProcessingSettings,
    pub watermark: WatermarkSettings,
    pub cleanup: CleanupSettings,
    pub max_upload_size: u64,
    pub max_upload_count: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageSettings::local(LOCAL_STORAGE_PATH),
            processing: ProcessingSettings::default(),
            watermark: WatermarkSettings::default(),
            cleanup: CleanupSettings::default(),
            max_upload_size: MAX_UPLOAD_SIZE,
            max_upload_count: MAX_UPLOAD_COUNT,
        }
    }
}

impl Config {
    /// Load `.env` (if any) and read the environment, then validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut config = Config {
            storage: StorageSettings {
                backend: env::var("STORAGE_TYPE").unwrap_or_else(|_| "local".to_string()),
                local_path: env::var("LOCAL_STORAGE_PATH")
                    .unwrap_or_else(|_| LOCAL_STORAGE_PATH.to_string()),
                public_url_prefix: env::var("PUBLIC_URL_PREFIX")
                    .unwrap_or_else(|_| PUBLIC_URL_PREFIX.to_string()),
                s3: S3Settings {
                    endpoint: env_opt("S3_ENDPOINT"),
                    region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
                    access_key: env_opt("S3_ACCESS_KEY"),
                    secret_key: env_opt("S3_SECRET_KEY"),
                    bucket: env_opt("S3_BUCKET"),
                    custom_domain: env_opt("CUSTOM_DOMAIN"),
                },
                remote_fs_path: env_opt("REMOTE_FS_PATH"),
            },
            processing: ProcessingSettings {
                quality: env_parse("IMAGE_QUALITY", IMAGE_QUALITY),
                effort: env_parse("COMPRESSION_EFFORT", COMPRESSION_EFFORT),
                force_lossless: env_bool("FORCE_LOSSLESS", false),
                enable_avif: env_bool("ENABLE_AVIF", false),
                avif_encoder: env::var("AVIF_ENCODER").unwrap_or_else(|_| AVIF_ENCODER.to_string()),
                avif_timeout_secs: env_parse("AVIF_TIMEOUT_SECS", AVIF_TIMEOUT_SECS),
                enable_exif_strip: env_bool("ENABLE_EXIF_STRIP", true),
            },
            watermark: WatermarkSettings {
                enabled: env_bool("ENABLE_WATERMARK", false),
                kind: env::var("WATERMARK_TYPE").unwrap_or_else(|_| "text".to_string()),
                text: env::var("WATERMARK_TEXT").unwrap_or_else(|_| WATERMARK_TEXT.to_string()),
                font: env::var("WATERMARK_FONT").unwrap_or_else(|_| WATERMARK_FONT.to_string()),
                size: env_parse("WATERMARK_SIZE", WATERMARK_SIZE),
                color: env::var("WATERMARK_COLOR").unwrap_or_else(|_| WATERMARK_COLOR.to_string()),
                opacity: env_parse("WATERMARK_OPACITY", WATERMARK_OPACITY),
                position: env::var("WATERMARK_POSITION")
                    .unwrap_or_else(|_| WATERMARK_POSITION.to_string()),
                image_path: env_opt("WATERMARK_IMAGE_PATH"),
                margin: env_parse("WATERMARK_MARGIN", WATERMARK_MARGIN),
            },
            cleanup: CleanupSettings {
                enabled: env_bool("ENABLE_AUTO_CLEAN", true),
                interval_secs: env_parse("CLEANUP_INTERVAL_SECS", CLEANUP_INTERVAL_SECS),
            },
            max_upload_size: env_parse("MAX_UPLOAD_SIZE", MAX_UPLOAD_SIZE),
            max_upload_count: env_parse("MAX_UPLOAD_COUNT", MAX_UPLOAD_COUNT),
        };

        config.validate()?;
        Ok(config)
    }

    /// Normalise out-of-range values and reject unusable backend settings.
    ///
    /// Out-of-range tuning values are replaced with defaults and logged. The
    /// backend name is lowercased, since registry lookups are exact; an unknown
    /// name is otherwise left for the registry to reject.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        self.storage.backend = self.storage.backend.trim().to_ascii_lowercase();

        if !(1..=100).contains(&self.processing.quality) {
            tracing::warn!(
                quality = self.processing.quality,
                "Invalid image quality, using default {}",
                IMAGE_QUALITY
            );
            self.processing.quality = IMAGE_QUALITY;
        }

        if !(1..=10).contains(&self.processing.effort) {
            tracing::warn!(
                effort = self.processing.effort,
                "Invalid compression effort, using default {}",
                COMPRESSION_EFFORT
            );
            self.processing.effort = COMPRESSION_EFFORT;
        }

        if self.processing.avif_timeout_secs == 0 {
            self.processing.avif_timeout_secs = AVIF_TIMEOUT_SECS;
        }

        if self.watermark.opacity > 100 {
            tracing::warn!(
                opacity = self.watermark.opacity,
                "Watermark opacity above 100, clamping"
            );
            self.watermark.opacity = 100;
        }

        if self.watermark.enabled {
            if self.watermark.kind != "text" && self.watermark.kind != "image" {
                tracing::warn!(kind = %self.watermark.kind, "Invalid watermark type, using 'text'");
                self.watermark.kind = "text".to_string();
            }
            if self.watermark.kind == "image" && self.watermark.image_path.is_none() {
                tracing::warn!("WATERMARK_IMAGE_PATH is required for image watermarks, disabling watermark");
                self.watermark.enabled = false;
            }
        }

        if self.cleanup.interval_secs == 0 {
            self.cleanup.interval_secs = CLEANUP_INTERVAL_SECS;
        }

        match self.storage.backend_kind() {
            Some(StorageBackend::S3) => {
                let s3 = &self.storage.s3;
                for (key, value) in [
                    ("S3_ENDPOINT", &s3.endpoint),
                    ("S3_ACCESS_KEY", &s3.access_key),
                    ("S3_SECRET_KEY", &s3.secret_key),
                    ("S3_BUCKET", &s3.bucket),
                ] {
                    if value.is_none() {
                        return Err(ConfigError::Missing(format!(
                            "{} must be set when using the s3 storage backend",
                            key
                        )));
                    }
                }
            }
            Some(StorageBackend::Nfs) => {
                if self.storage.remote_fs_path.is_none() {
                    return Err(ConfigError::Missing(
                        "REMOTE_FS_PATH must be set when using the nfs storage backend"
                            .to_string(),
                    ));
                }
            }
            Some(StorageBackend::Local) | None => {}
        }

        Ok(())
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Could not parse value, using default {}", default);
            default
        }),
        Err(_) => default,
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                tracing::warn!(key, value = %raw, "Could not parse boolean, using default {}", default);
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Config {
        Config {
            storage: StorageSettings::local("/tmp/images"),
            processing: ProcessingSettings::default(),
            watermark: WatermarkSettings::default(),
            cleanup: CleanupSettings::default(),
            max_upload_size: MAX_UPLOAD_SIZE,
            max_upload_count: MAX_UPLOAD_COUNT,
        }
    }

    #[test]
    fn test_out_of_range_tuning_is_reset() {
        let mut config = base();
        config.processing.quality = 0;
        config.processing.effort = 42;
        config.validate().unwrap();
        assert_eq!(config.processing.quality, IMAGE_QUALITY);
        assert_eq!(config.processing.effort, COMPRESSION_EFFORT);
    }

    #[test]
    fn test_unknown_watermark_type_falls_back_to_text() {
        let mut config = base();
        config.watermark.enabled = true;
        config.watermark.kind = "hologram".to_string();
        config.validate().unwrap();
        assert_eq!(config.watermark.kind, "text");
        assert!(config.watermark.enabled);
    }

    #[test]
    fn test_image_watermark_without_path_is_disabled() {
        let mut config = base();
        config.watermark.enabled = true;
        config.watermark.kind = "image".to_string();
        config.validate().unwrap();
        assert!(!config.watermark.enabled);
    }

    #[test]
    fn test_s3_requires_credentials() {
        let mut config = base();
        config.storage.backend = "s3".to_string();
        config.storage.s3.endpoint = Some("http://minio:9000".to_string());
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing(msg) if msg.contains("S3_ACCESS_KEY")));
    }

    #[test]
    fn test_backend_name_is_lowercased() {
        let mut config = base();
        config.storage.backend = " Local ".to_string();
        config.validate().unwrap();
        assert_eq!(config.storage.backend, "local");
        assert_eq!(config.storage.backend_kind(), Some(StorageBackend::Local));
    }

    #[test]
    fn test_unknown_backend_is_kept() {
        let mut config = base();
        config.storage.backend = "ftp".to_string();
        config.validate().unwrap();
        assert_eq!(config.storage.backend, "ftp");
        assert_eq!(config.storage.backend_kind(), None);
    }
}
