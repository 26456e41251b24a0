use pixstash_core::ImageFormat;
use std::time::Duration;
use thiserror::Error;

/// Image processing errors
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Failed to encode {format} image: {message}")]
    Encode { format: ImageFormat, message: String },

    #[error("{tool} failed (exit status {status:?}): {stderr}")]
    ExternalTool {
        tool: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("{tool} timed out after {timeout:?}")]
    ExternalToolTimeout { tool: String, timeout: Duration },

    #[error("Failed to load font: {0}")]
    FontLoad(String),

    #[error("Failed to render watermark: {0}")]
    Render(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ProcessingResult<T> = Result<T, ProcessingError>;
