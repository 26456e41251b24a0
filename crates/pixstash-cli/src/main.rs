//! pixstash: operate an image store from the command line.
//!
//! Configuration comes from the environment (and `.env`): STORAGE_TYPE,
//! LOCAL_STORAGE_PATH, S3_*, IMAGE_QUALITY, ENABLE_AVIF, WATERMARK_*, ...

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use pixstash_cli::{init_tracing, parse_expiry, parse_tags, App};
use pixstash_core::{Config, Variant};
use pixstash_services::{BatchOutcome, ListQuery, UploadRequest};
use pixstash_storage::StorageRegistry;
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pixstash", about = "Content-addressed image store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload one or more images
    Upload {
        /// Image files
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Comma-separated tags applied to every file
        #[arg(long)]
        tags: Option<String>,
        /// Expiry: RFC 3339 timestamp or offset such as 30m, 12h, 7d
        #[arg(long)]
        expires: Option<String>,
        /// Fail instead of storing unmarked images when watermarking fails
        #[arg(long)]
        require_watermark: bool,
    },
    /// List stored images
    List {
        #[arg(long, default_value = "1")]
        page: i64,
        #[arg(long, default_value = "20")]
        limit: i64,
        /// Only images carrying this tag
        #[arg(long)]
        tag: Option<String>,
    },
    /// Show the metadata of one image
    Info { id: String },
    /// Print the public URL of a variant
    Url {
        id: String,
        #[arg(long, value_enum, default_value = "original")]
        variant: VariantArg,
    },
    /// Replace the tags of an image; no tags clears them
    Tags { id: String, tags: Vec<String> },
    /// Set the expiry of an image, or `never` to clear it
    Expire { id: String, when: String },
    /// Delete an image with all its variants
    Delete { id: String },
    /// Remove expired images
    Clean {
        /// Keep running and sweep on the configured interval
        #[arg(long)]
        watch: bool,
    },
    /// Count images per tag
    TagCounts,
    /// Pick a random image
    Random,
    /// List the storage backends compiled into this build
    Backends,
}

#[derive(Clone, Copy, ValueEnum)]
enum VariantArg {
    Original,
    Webp,
    Avif,
}

impl From<VariantArg> for Variant {
    fn from(value: VariantArg) -> Self {
        match value {
            VariantArg::Original => Variant::Original,
            VariantArg::Webp => Variant::WebP,
            VariantArg::Avif => Variant::Avif,
        }
    }
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

fn print_backends() {
    for name in StorageRegistry::with_builtin().names() {
        println!("{}", name);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    // needs no configuration
    if let Commands::Backends = cli.command {
        print_backends();
        return Ok(());
    }

    let config = Config::from_env().context("Invalid configuration")?;
    let mut app = App::from_config(config).await?;

    match cli.command {
        Commands::Upload {
            files,
            tags,
            expires,
            require_watermark,
        } => {
            let tags = tags.as_deref().map(parse_tags).unwrap_or_default();
            let expires_at = match expires {
                Some(value) => parse_expiry(&value, Utc::now())?,
                None => None,
            };
            if require_watermark {
                app.uploads = app.uploads.require_watermark(true);
            }

            let mut requests = Vec::with_capacity(files.len());
            for path in &files {
                let data = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                let filename = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| path.display().to_string());
                requests.push(
                    UploadRequest::new(filename, data)
                        .with_tags(tags.clone())
                        .with_expiry(expires_at),
                );
            }

            let report = app.uploads.upload_batch(requests).await?;
            let failed: Vec<_> = report
                .failed
                .iter()
                .map(|f| json!({ "filename": f.filename, "error": f.error.to_string() }))
                .collect();
            print_json(&json!({
                "outcome": report.outcome(),
                "succeeded": report.succeeded,
                "failed": failed,
            }))?;

            if report.outcome() == BatchOutcome::AllFailed {
                bail!("All {} uploads failed", report.total());
            }
        }
        Commands::List { page, limit, tag } => {
            let page = app.catalog.list_page(&ListQuery { page, limit, tag }).await?;
            print_json(&page)?;
        }
        Commands::Info { id } => {
            let item = app.lifecycle.get(&id).await?;
            print_json(&item)?;
        }
        Commands::Url { id, variant } => {
            let item = app.lifecycle.get(&id).await?;
            println!(
                "{}",
                app.storage.get_url(&id, variant.into(), item.orientation)
            );
        }
        Commands::Tags { id, tags } => {
            let tags = tags.iter().flat_map(|t| parse_tags(t)).collect();
            let item = app.lifecycle.set_tags(&id, tags).await?;
            print_json(&json!({ "id": item.id, "tags": item.tags }))?;
        }
        Commands::Expire { id, when } => {
            let expires_at = parse_expiry(&when, Utc::now())?;
            let item = app.lifecycle.set_expiry(&id, expires_at).await?;
            print_json(&json!({ "id": item.id, "expiresAt": item.expiry() }))?;
        }
        Commands::Delete { id } => {
            app.lifecycle.delete(&id).await?;
            print_json(&json!({ "id": id, "deleted": true }))?;
        }
        Commands::Clean { watch } => {
            if watch {
                if !app.config.cleanup.enabled {
                    tracing::warn!("ENABLE_AUTO_CLEAN is off; sweeping anyway because --watch was given");
                }
                let handle = app.cleanup.clone().start();
                tokio::signal::ctrl_c()
                    .await
                    .context("Failed to listen for shutdown signal")?;
                handle.abort();
                tracing::info!("Cleanup stopped");
            } else {
                let deleted = app.cleanup.run_once().await?;
                print_json(&json!({ "deleted": deleted }))?;
            }
        }
        Commands::TagCounts => {
            print_json(&app.catalog.tag_counts().await?)?;
        }
        Commands::Random => match app.catalog.random_item().await? {
            Some(entry) => print_json(&entry)?,
            None => bail!("No images stored"),
        },
        Commands::Backends => print_backends(),
    }

    Ok(())
}
