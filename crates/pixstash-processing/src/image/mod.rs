//! Watermarking
//!
//! - text and image marks composited onto decoded bitmaps (watermark)
//! - font lookup for text marks (font)

pub mod font;
pub mod watermark;

pub use font::resolve_font;
pub use watermark::{WatermarkConfig, WatermarkKind, WatermarkPosition, Watermarker};
