//! Format detection, description and re-encoding.

use crate::avif::{AvifEncoder, AvifEncoderConfig};
use crate::error::{ProcessingError, ProcessingResult};
use bytes::Bytes;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageReader};
use pixstash_core::{ImageFormat, Orientation};
use std::io::Cursor;

/// Target encoding and tuning for [`Converter::convert`].
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub format: ImageFormat,
    /// 1-100
    pub quality: u8,
    /// 1-10; higher spends more time for smaller output
    pub effort: u8,
    pub lossless: bool,
    /// Resize target. Both must be non-zero to resize.
    pub width: u32,
    pub height: u32,
}

impl ConvertOptions {
    pub fn new(format: ImageFormat) -> Self {
        Self {
            format,
            quality: 80,
            effort: 6,
            lossless: false,
            width: 0,
            height: 0,
        }
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_effort(mut self, effort: u8) -> Self {
        self.effort = effort;
        self
    }

    pub fn with_lossless(mut self, lossless: bool) -> Self {
        self.lossless = lossless;
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }
}

/// Intrinsic properties of a decoded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDescription {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub orientation: Orientation,
}

pub struct Converter {
    avif: AvifEncoder,
}

impl Converter {
    pub fn new(avif: AvifEncoderConfig) -> ProcessingResult<Self> {
        Ok(Self {
            avif: AvifEncoder::new(avif)?,
        })
    }

    pub fn avif_encoder(&self) -> &AvifEncoder {
        &self.avif
    }

    /// Sniff and decode an upload.
    ///
    /// Only jpeg, png, gif and webp are accepted as sources. Anything else is
    /// `UnsupportedFormat`; a recognized container with broken data is `Decode`.
    pub fn detect_format(data: &[u8]) -> ProcessingResult<(ImageFormat, DynamicImage)> {
        let reader = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| ProcessingError::Decode(e.to_string()))?;

        let format = match reader.format() {
            Some(image::ImageFormat::Jpeg) => ImageFormat::Jpeg,
            Some(image::ImageFormat::Png) => ImageFormat::Png,
            Some(image::ImageFormat::Gif) => ImageFormat::Gif,
            Some(image::ImageFormat::WebP) => ImageFormat::WebP,
            Some(other) => {
                return Err(ProcessingError::UnsupportedFormat(
                    format!("{:?}", other).to_lowercase(),
                ))
            }
            None => {
                return Err(ProcessingError::UnsupportedFormat(
                    "unrecognized data".to_string(),
                ))
            }
        };

        let img = reader
            .decode()
            .map_err(|e| ProcessingError::Decode(format!("{} data: {}", format, e)))?;

        Ok((format, img))
    }

    /// Dimensions and orientation of a decoded image.
    ///
    /// Portrait only when strictly taller than wide. Square images are
    /// landscape here and in the storage layout alike, but this rule is kept
    /// separate from [`Orientation::from_dimensions`] on purpose.
    pub fn describe(img: &DynamicImage, format: ImageFormat) -> ImageDescription {
        let (width, height) = img.dimensions();
        let orientation = if height > width {
            Orientation::Portrait
        } else {
            Orientation::Landscape
        };
        ImageDescription {
            format,
            width,
            height,
            orientation,
        }
    }

    /// Encode `img` as `options.format`, resizing first when a size is given.
    pub async fn convert(
        &self,
        img: &DynamicImage,
        options: &ConvertOptions,
    ) -> ProcessingResult<Bytes> {
        let start = std::time::Instant::now();
        let img = img.clone();
        let (width, height) = (options.width, options.height);

        let data = match options.format {
            ImageFormat::Avif => {
                let png = run_blocking(ImageFormat::Avif, move || {
                    crate::avif::png_input(&resize(img, width, height))
                })
                .await?;
                self.avif
                    .encode_png(png, options.quality, options.effort, options.lossless)
                    .await?
            }
            format => {
                let options = options.clone();
                run_blocking(format, move || {
                    encode_in_process(&resize(img, width, height), &options)
                })
                .await?
            }
        };

        tracing::debug!(
            format = %options.format,
            quality = options.quality,
            lossless = options.lossless,
            size_bytes = data.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Image converted"
        );

        Ok(data)
    }
}

async fn run_blocking<T, F>(format: ImageFormat, f: F) -> ProcessingResult<T>
where
    F: FnOnce() -> ProcessingResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ProcessingError::Encode {
            format,
            message: e.to_string(),
        })?
}

/// Lanczos3 resample to exactly `width` x `height`; a zero dimension keeps the image as is.
fn resize(img: DynamicImage, width: u32, height: u32) -> DynamicImage {
    if width == 0 || height == 0 || img.dimensions() == (width, height) {
        return img;
    }
    img.resize_exact(width, height, FilterType::Lanczos3)
}

fn encode_in_process(img: &DynamicImage, options: &ConvertOptions) -> ProcessingResult<Bytes> {
    match options.format {
        ImageFormat::Jpeg => encode_jpeg(img, options.quality),
        ImageFormat::Png => encode_png(img, options.effort),
        ImageFormat::Gif => encode_gif(img),
        ImageFormat::WebP => encode_webp(img, options.quality, options.lossless),
        ImageFormat::Avif => Err(ProcessingError::Encode {
            format: ImageFormat::Avif,
            message: "avif is encoded by the external encoder".to_string(),
        }),
    }
}

/// Compress to JPEG using mozjpeg
fn encode_jpeg(img: &DynamicImage, quality: u8) -> ProcessingResult<Bytes> {
    let rgb_img = img.to_rgb8();
    let (width, height) = rgb_img.dimensions();
    let encode_err = |e: std::io::Error| ProcessingError::Encode {
        format: ImageFormat::Jpeg,
        message: e.to_string(),
    };

    let mut comp = mozjpeg::Compress::new(mozjpeg::ColorSpace::JCS_RGB);
    comp.set_size(width as usize, height as usize);
    comp.set_quality(quality.clamp(1, 100) as f32);
    comp.set_progressive_mode();
    comp.set_optimize_coding(true);

    let mut comp = comp.start_compress(Vec::new()).map_err(encode_err)?;
    comp.write_scanlines(&rgb_img).map_err(encode_err)?;
    let jpeg_data = comp.finish().map_err(encode_err)?;

    Ok(Bytes::from(jpeg_data))
}

fn encode_png(img: &DynamicImage, effort: u8) -> ProcessingResult<Bytes> {
    let compression = match effort {
        0..=3 => CompressionType::Fast,
        4..=7 => CompressionType::Default,
        _ => CompressionType::Best,
    };

    let mut buffer = Vec::new();
    let encoder = PngEncoder::new_with_quality(&mut buffer, compression, PngFilter::Adaptive);
    img.write_with_encoder(encoder)
        .map_err(|e| ProcessingError::Encode {
            format: ImageFormat::Png,
            message: e.to_string(),
        })?;

    Ok(Bytes::from(buffer))
}

fn encode_gif(img: &DynamicImage) -> ProcessingResult<Bytes> {
    let mut buffer = Vec::new();
    DynamicImage::ImageRgba8(img.to_rgba8())
        .write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Gif)
        .map_err(|e| ProcessingError::Encode {
            format: ImageFormat::Gif,
            message: e.to_string(),
        })?;

    Ok(Bytes::from(buffer))
}

fn encode_webp(img: &DynamicImage, quality: u8, lossless: bool) -> ProcessingResult<Bytes> {
    let rgba_img = img.to_rgba8();
    let (width, height) = rgba_img.dimensions();

    // libwebp caps each side at 16383 px
    let encoder = webp::Encoder::from_rgba(&rgba_img, width, height);
    let webp_data = encoder
        .encode_simple(lossless, quality.clamp(1, 100) as f32)
        .map_err(|e| ProcessingError::Encode {
            format: ImageFormat::WebP,
            message: format!("{:?} ({}x{})", e, width, height),
        })?;

    Ok(Bytes::copy_from_slice(&webp_data))
}
