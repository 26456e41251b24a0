//! AVIF encoding through an external `avifenc`-compatible binary.

use crate::error::{ProcessingError, ProcessingResult};
use bytes::Bytes;
use image::DynamicImage;
use std::io::Cursor;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

#[derive(Debug, Clone)]
pub struct AvifEncoderConfig {
    /// Binary name (looked up on `PATH`) or absolute path.
    pub binary: String,
    /// Ceiling for one encoder run; the child is killed when it expires.
    pub timeout: Duration,
}

impl Default for AvifEncoderConfig {
    fn default() -> Self {
        Self {
            binary: "avifenc".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct AvifEncoder {
    config: AvifEncoderConfig,
}

impl AvifEncoder {
    pub fn new(config: AvifEncoderConfig) -> ProcessingResult<Self> {
        let dangerous_chars = [';', '|', '&', '$', '`', '(', ')', '<', '>', '\n', '\r'];
        if config.binary.trim().is_empty()
            || config.binary.chars().any(|c| dangerous_chars.contains(&c))
        {
            return Err(ProcessingError::ExternalTool {
                tool: config.binary.clone(),
                status: None,
                stderr: "invalid encoder path".to_string(),
            });
        }

        Ok(Self { config })
    }

    pub fn binary(&self) -> &str {
        &self.config.binary
    }

    /// Whether the encoder binary can be found.
    pub fn is_available(&self) -> bool {
        let binary = std::path::Path::new(&self.config.binary);
        if binary.components().count() > 1 {
            return binary.is_file();
        }
        std::env::var_os("PATH")
            .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(binary).is_file()))
            .unwrap_or(false)
    }

    /// Encode `img` to AVIF.
    ///
    /// The intermediate PNG is produced on the blocking pool.
    pub async fn encode(
        &self,
        img: &DynamicImage,
        quality: u8,
        effort: u8,
        lossless: bool,
    ) -> ProcessingResult<Bytes> {
        let img = img.clone();
        let png = tokio::task::spawn_blocking(move || png_input(&img))
            .await
            .map_err(|e| ProcessingError::Encode {
                format: pixstash_core::ImageFormat::Png,
                message: e.to_string(),
            })??;
        self.encode_png(png, quality, effort, lossless).await
    }

    /// Run the encoder on PNG bytes.
    ///
    /// The input goes through a temp directory that is removed on every exit
    /// path, including timeouts.
    #[tracing::instrument(skip(self, png), fields(tool = %self.config.binary, input_bytes = png.len()))]
    pub async fn encode_png(
        &self,
        png: Vec<u8>,
        quality: u8,
        effort: u8,
        lossless: bool,
    ) -> ProcessingResult<Bytes> {
        let start = std::time::Instant::now();
        let workdir = tempfile::tempdir()?;
        let input_path = workdir.path().join("input.png");
        let output_path = workdir.path().join("output.avif");
        tokio::fs::write(&input_path, &png).await?;

        let mut args = vec![
            input_path.to_string_lossy().to_string(),
            "-o".to_string(),
            output_path.to_string_lossy().to_string(),
            "-s".to_string(),
            effort.to_string(),
        ];
        if lossless {
            args.push("--lossless".to_string());
        } else {
            args.extend_from_slice(&["-q".to_string(), quality.to_string()]);
        }

        let mut command = Command::new(&self.config.binary);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.config.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ProcessingError::ExternalTool {
                    tool: self.config.binary.clone(),
                    status: None,
                    stderr: format!("failed to execute: {}", e),
                })
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.config.timeout.as_secs_f64(),
                    "AVIF encoder timed out"
                );
                return Err(ProcessingError::ExternalToolTimeout {
                    tool: self.config.binary.clone(),
                    timeout: self.config.timeout,
                });
            }
        };

        if !output.status.success() {
            return Err(ProcessingError::ExternalTool {
                tool: self.config.binary.clone(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let data = match tokio::fs::read(&output_path).await {
            Ok(data) if !data.is_empty() => data,
            _ => {
                return Err(ProcessingError::ExternalTool {
                    tool: self.config.binary.clone(),
                    status: output.status.code(),
                    stderr: "encoder exited successfully but produced no output".to_string(),
                })
            }
        };

        tracing::debug!(
            size_bytes = data.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "AVIF encode finished"
        );

        Ok(Bytes::from(data))
    }
}

/// PNG handed to the external encoder. CPU bound.
pub(crate) fn png_input(img: &DynamicImage) -> ProcessingResult<Vec<u8>> {
    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|e| ProcessingError::Encode {
            format: pixstash_core::ImageFormat::Png,
            message: e.to_string(),
        })?;
    Ok(png)
}
