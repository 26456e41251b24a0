pub mod format;
pub mod media;

pub use format::{ImageFormat, Orientation, Variant};
pub use media::MediaItem;
