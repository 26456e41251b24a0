//! Wiring for the `pixstash` binary: tracing setup, service construction from
//! the resolved configuration, and argument parsing helpers.

use anyhow::{bail, Context};
use chrono::{DateTime, Duration, Utc};
use pixstash_core::Config;
use pixstash_processing::{AvifEncoderConfig, Converter, WatermarkConfig, Watermarker};
use pixstash_services::{
    CatalogService, CleanupService, MediaLifecycleService, UploadService, UploadSettings,
};
use pixstash_storage::{create_storage, Storage};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Initialize tracing for the CLI. Logs go to stderr; `LOG_FORMAT=json`
/// switches to JSON lines.
///
/// `.env` is loaded first so `RUST_LOG` and `LOG_FORMAT` can live there.
pub fn init_tracing() {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = json_logs();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

fn json_logs() -> bool {
    std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Everything the commands need, built once per invocation.
pub struct App {
    pub config: Config,
    pub storage: Arc<dyn Storage>,
    pub uploads: UploadService,
    pub catalog: CatalogService,
    pub lifecycle: MediaLifecycleService,
    pub cleanup: Arc<CleanupService>,
}

impl App {
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let storage = create_storage(&config.storage)
            .await
            .with_context(|| format!("Failed to initialize '{}' storage", config.storage.backend))?;

        let converter = Converter::new(AvifEncoderConfig {
            binary: config.processing.avif_encoder.clone(),
            timeout: std::time::Duration::from_secs(config.processing.avif_timeout_secs),
        })
        .context("Invalid AVIF encoder configuration")?;

        if config.processing.enable_avif && !converter.avif_encoder().is_available() {
            tracing::warn!(
                encoder = %config.processing.avif_encoder,
                "AVIF enabled but encoder not found; uploads will fail until it is installed"
            );
        }

        let mut uploads = UploadService::new(
            storage.clone(),
            Arc::new(converter),
            UploadSettings::from_config(&config),
        );
        if config.watermark.enabled {
            let watermark = WatermarkConfig::from_settings(&config.watermark);
            uploads = uploads.with_watermarker(Arc::new(Watermarker::new(watermark)));
        }

        Ok(Self {
            catalog: CatalogService::new(storage.clone()),
            lifecycle: MediaLifecycleService::new(storage.clone()),
            cleanup: Arc::new(CleanupService::from_settings(
                storage.clone(),
                &config.cleanup,
            )),
            uploads,
            storage,
            config,
        })
    }
}

/// Comma-separated tags; blanks are dropped.
pub fn parse_tags(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// An expiry given as RFC 3339, a relative offset (`90s`, `30m`, `12h`, `7d`),
/// or `never` to clear it.
pub fn parse_expiry(value: &str, now: DateTime<Utc>) -> anyhow::Result<Option<DateTime<Utc>>> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("never") || value.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok(Some(at.with_timezone(&Utc)));
    }

    let Some(unit) = value.chars().last() else {
        bail!("Empty expiry");
    };
    let amount: i64 = value[..value.len() - unit.len_utf8()]
        .parse()
        .with_context(|| format!("Invalid expiry '{}'", value))?;
    let offset = match unit {
        's' => Duration::seconds(amount),
        'm' => Duration::minutes(amount),
        'h' => Duration::hours(amount),
        'd' => Duration::days(amount),
        _ => bail!("Invalid expiry unit in '{}', expected s, m, h or d", value),
    };

    Ok(Some(now + offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parse_tags_drops_blanks() {
        assert_eq!(parse_tags("a, b,,c "), vec!["a", "b", "c"]);
        assert!(parse_tags(" , ").is_empty());
    }

    #[test]
    fn parse_expiry_relative() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            parse_expiry("2h", now).unwrap(),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap())
        );
        assert_eq!(
            parse_expiry("7d", now).unwrap(),
            Some(Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn parse_expiry_absolute_and_never() {
        let now = Utc::now();
        assert_eq!(
            parse_expiry("2030-05-01T12:00:00+02:00", now).unwrap(),
            Some(Utc.with_ymd_and_hms(2030, 5, 1, 10, 0, 0).unwrap())
        );
        assert_eq!(parse_expiry("never", now).unwrap(), None);
    }

    #[test]
    fn parse_expiry_rejects_garbage() {
        let now = Utc::now();
        assert!(parse_expiry("", now).is_err());
        assert!(parse_expiry("5w", now).is_err());
        assert!(parse_expiry("soon", now).is_err());
    }

    #[test]
    fn log_format_can_come_from_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let env_file = dir.path().join(".env");
        std::fs::write(&env_file, "LOG_FORMAT=json\n").unwrap();

        std::env::remove_var("LOG_FORMAT");
        assert!(!json_logs());
        dotenvy::from_path(&env_file).unwrap();
        assert!(json_logs());
        std::env::remove_var("LOG_FORMAT");
    }

    #[tokio::test]
    async fn app_builds_local_backend() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage = pixstash_core::StorageSettings::local(dir.path().display().to_string());

        let app = App::from_config(config).await.unwrap();
        assert_eq!(
            app.storage.backend_type(),
            pixstash_core::StorageBackend::Local
        );
        assert!(app.catalog.random_item().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn app_rejects_unknown_backend() {
        let mut config = Config::default();
        config.storage.backend = "ftp".to_string();
        assert!(App::from_config(config).await.is_err());
    }
}
