//! Pixstash Processing Library
//!
//! Decoding, re-encoding and watermarking of uploaded images:
//! - format detection and description (converter)
//! - in-process jpeg/png/gif/webp encoding, avif through an external encoder
//! - EXIF removal for stored originals
//! - text and image watermarks

pub mod avif;
pub mod converter;
pub mod error;
pub mod exif;
pub mod image;

pub use avif::{AvifEncoder, AvifEncoderConfig};
pub use converter::{ConvertOptions, Converter, ImageDescription};
pub use error::{ProcessingError, ProcessingResult};
pub use exif::strip_metadata;
pub use crate::image::{Watermarker, WatermarkConfig, WatermarkKind, WatermarkPosition};
