use bytes::Bytes;
use img_parts::{jpeg::Jpeg, png::Png, ImageEXIF};
use pixstash_core::ImageFormat;

/// Drop EXIF from JPEG and PNG data.
///
/// Other formats, and data that fails to parse as the claimed format, are
/// returned unchanged.
pub fn strip_metadata(data: Bytes, format: ImageFormat) -> Bytes {
    let original_len = data.len();
    let stripped = match format {
        ImageFormat::Jpeg => match Jpeg::from_bytes(data.clone()) {
            Ok(mut jpeg) => {
                jpeg.set_exif(None);
                jpeg.encoder().bytes()
            }
            Err(_) => data,
        },
        ImageFormat::Png => match Png::from_bytes(data.clone()) {
            Ok(mut png) => {
                png.set_exif(None);
                png.encoder().bytes()
            }
            Err(_) => data,
        },
        _ => data,
    };

    if stripped.len() != original_len {
        tracing::debug!(
            format = %format,
            removed_bytes = original_len.saturating_sub(stripped.len()),
            "Stripped image metadata"
        );
    }

    stripped
}
