use super::font::resolve_font;
use crate::error::{ProcessingError, ProcessingResult};
use ab_glyph::{Font, FontVec, PxScale, ScaleFont};
use image::{imageops, DynamicImage, GenericImageView, ImageReader, Rgba, RgbaImage};
use imageproc::drawing::{draw_text_mut, text_size};
use pixstash_core::WatermarkSettings;
use std::path::PathBuf;
use std::str::FromStr;

/// Watermark type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkKind {
    Text,
    Image,
}

/// Watermark position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    Center,
}

impl FromStr for WatermarkPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "top-left" => Ok(Self::TopLeft),
            "top-right" => Ok(Self::TopRight),
            "bottom-left" => Ok(Self::BottomLeft),
            "bottom-right" => Ok(Self::BottomRight),
            "center" => Ok(Self::Center),
            other => Err(format!("unknown watermark position: {}", other)),
        }
    }
}

/// Watermark configuration
#[derive(Debug, Clone)]
pub struct WatermarkConfig {
    pub kind: WatermarkKind,
    pub text: String,
    /// Font name or path to a font file
    pub font: String,
    /// Pixel height of the text
    pub size: f32,
    pub color: Rgba<u8>,
    /// 0-255, multiplied into the mark's alpha
    pub opacity: u8,
    pub position: WatermarkPosition,
    pub image_path: Option<PathBuf>,
    pub margin: u32,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            kind: WatermarkKind::Text,
            text: "InfiniteImages".to_string(),
            font: "Arial".to_string(),
            size: 24.0,
            color: Rgba([255, 255, 255, 255]),
            opacity: 128,
            position: WatermarkPosition::BottomRight,
            margin: 10,
            image_path: None,
        }
    }
}

impl WatermarkConfig {
    /// Build from resolved settings. Opacity there is a percentage.
    pub fn from_settings(settings: &WatermarkSettings) -> Self {
        let kind = if settings.kind.eq_ignore_ascii_case("image") {
            WatermarkKind::Image
        } else {
            WatermarkKind::Text
        };

        let position = settings.position.parse().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Invalid watermark position, using bottom-right");
            WatermarkPosition::BottomRight
        });

        let color = parse_hex_color(&settings.color).unwrap_or_else(|| {
            tracing::warn!(color = %settings.color, "Invalid watermark color, using white");
            Rgba([255, 255, 255, 255])
        });

        let percent = u32::from(settings.opacity.min(100));

        Self {
            kind,
            text: settings.text.clone(),
            font: settings.font.clone(),
            size: settings.size,
            color,
            opacity: ((percent * 255 + 50) / 100) as u8,
            position,
            image_path: settings.image_path.as_ref().map(PathBuf::from),
            margin: settings.margin,
        }
    }
}

/// `#rrggbb` or `#rgb`, leading `#` optional.
fn parse_hex_color(value: &str) -> Option<Rgba<u8>> {
    let hex = value.trim().trim_start_matches('#');
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let channel = |s: &str| u8::from_str_radix(s, 16).ok();
    match hex.len() {
        6 => Some(Rgba([
            channel(&hex[0..2])?,
            channel(&hex[2..4])?,
            channel(&hex[4..6])?,
            255,
        ])),
        3 => {
            let expand = |i: usize| channel(&hex[i..i + 1]).map(|v| v * 17);
            Some(Rgba([expand(0)?, expand(1)?, expand(2)?, 255]))
        }
        _ => None,
    }
}

/// Top-left corner of a `mark_w` x `mark_h` mark on a `width` x `height` base.
///
/// Not clipped: a mark larger than the base yields negative coordinates and
/// is cropped by the overlay.
fn mark_origin(
    width: u32,
    height: u32,
    mark_w: u32,
    mark_h: u32,
    position: WatermarkPosition,
    margin: u32,
) -> (i64, i64) {
    let (w, h) = (i64::from(width), i64::from(height));
    let (mw, mh) = (i64::from(mark_w), i64::from(mark_h));
    let m = i64::from(margin);

    match position {
        WatermarkPosition::TopLeft => (m, m),
        WatermarkPosition::TopRight => (w - mw - m, m),
        WatermarkPosition::BottomLeft => (m, h - mh - m),
        WatermarkPosition::BottomRight => (w - mw - m, h - mh - m),
        WatermarkPosition::Center => ((w - mw) / 2, (h - mh) / 2),
    }
}

pub struct Watermarker {
    config: WatermarkConfig,
    font: Option<FontVec>,
}

impl Watermarker {
    /// Font lookup happens here for text marks; a lookup failure is kept and
    /// reported by every [`apply`](Self::apply).
    pub fn new(config: WatermarkConfig) -> Self {
        let font = match config.kind {
            WatermarkKind::Text => match resolve_font(&config.font) {
                Ok(font) => Some(font),
                Err(e) => {
                    tracing::warn!(font = %config.font, error = %e, "Watermark font unavailable");
                    None
                }
            },
            WatermarkKind::Image => None,
        };
        Self { config, font }
    }

    /// Use an already loaded font instead of looking one up.
    pub fn with_font(config: WatermarkConfig, font: FontVec) -> Self {
        Self {
            config,
            font: Some(font),
        }
    }

    pub fn config(&self) -> &WatermarkConfig {
        &self.config
    }

    /// Composite the configured mark onto a copy of `img`.
    pub fn apply(&self, img: &DynamicImage) -> ProcessingResult<DynamicImage> {
        let mut mark = match self.config.kind {
            WatermarkKind::Text => self.render_text()?,
            WatermarkKind::Image => self.load_image()?,
        };

        if self.config.opacity < u8::MAX {
            let opacity = u32::from(self.config.opacity);
            for pixel in mark.pixels_mut() {
                pixel[3] = (u32::from(pixel[3]) * opacity / 255) as u8;
            }
        }

        let (width, height) = img.dimensions();
        let (x, y) = mark_origin(
            width,
            height,
            mark.width(),
            mark.height(),
            self.config.position,
            self.config.margin,
        );

        let mut base = img.to_rgba8();
        imageops::overlay(&mut base, &mark, x, y);

        Ok(DynamicImage::ImageRgba8(base))
    }

    /// Text on a transparent canvas sized to its measured extent.
    fn render_text(&self) -> ProcessingResult<RgbaImage> {
        let font = self.font.as_ref().ok_or_else(|| {
            ProcessingError::FontLoad(format!("no usable font for '{}'", self.config.font))
        })?;

        if self.config.text.is_empty() {
            return Err(ProcessingError::Render("watermark text is empty".to_string()));
        }
        if !self.config.size.is_finite() || self.config.size <= 0.0 {
            return Err(ProcessingError::Render(format!(
                "invalid font size {}",
                self.config.size
            )));
        }

        let scale = PxScale::from(self.config.size);
        let (text_w, _) = text_size(scale, font, &self.config.text);
        let line_h = font.as_scaled(scale).height().ceil() as u32;
        if text_w == 0 || line_h == 0 {
            return Err(ProcessingError::Render(format!(
                "text '{}' has no visible glyphs",
                self.config.text
            )));
        }

        let Rgba([r, g, b, _]) = self.config.color;
        let mut canvas = RgbaImage::from_pixel(text_w, line_h, Rgba([r, g, b, 0]));
        draw_text_mut(
            &mut canvas,
            Rgba([r, g, b, 255]),
            0,
            0,
            scale,
            font,
            &self.config.text,
        );

        Ok(canvas)
    }

    fn load_image(&self) -> ProcessingResult<RgbaImage> {
        let path = self.config.image_path.as_ref().ok_or_else(|| {
            ProcessingError::NotFound("no watermark image configured".to_string())
        })?;

        let data = std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                ProcessingError::NotFound(format!("watermark image {}", path.display()))
            }
            _ => ProcessingError::Io(e),
        })?;

        let img = ImageReader::new(std::io::Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| ProcessingError::Decode(format!("{}: {}", path.display(), e)))?
            .decode()
            .map_err(|e| ProcessingError::Decode(format!("{}: {}", path.display(), e)))?;

        Ok(img.to_rgba8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn create_test_image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            width,
            height,
            Rgba([0, 0, 0, 255]),
        ))
    }

    fn write_mark(dir: &std::path::Path, width: u32, height: u32, color: Rgba<u8>) -> PathBuf {
        let path = dir.join("mark.png");
        let img = RgbaImage::from_pixel(width, height, color);
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png)
            .unwrap();
        std::fs::write(&path, buffer).unwrap();
        path
    }

    fn image_config(path: PathBuf, position: WatermarkPosition, opacity: u8) -> WatermarkConfig {
        WatermarkConfig {
            kind: WatermarkKind::Image,
            image_path: Some(path),
            position,
            opacity,
            ..Default::default()
        }
    }

    #[test]
    fn test_mark_origin_positions() {
        let p = |pos| mark_origin(200, 100, 50, 20, pos, 10);
        assert_eq!(p(WatermarkPosition::TopLeft), (10, 10));
        assert_eq!(p(WatermarkPosition::TopRight), (140, 10));
        assert_eq!(p(WatermarkPosition::BottomLeft), (10, 70));
        assert_eq!(p(WatermarkPosition::BottomRight), (140, 70));
        assert_eq!(p(WatermarkPosition::Center), (75, 40));
    }

    #[test]
    fn test_mark_origin_is_not_clipped() {
        assert_eq!(
            mark_origin(30, 30, 50, 50, WatermarkPosition::BottomRight, 10),
            (-30, -30)
        );
    }

    #[test]
    fn test_position_parsing() {
        assert_eq!(
            "bottom_right".parse::<WatermarkPosition>().unwrap(),
            WatermarkPosition::BottomRight
        );
        assert_eq!(
            "Top-Left".parse::<WatermarkPosition>().unwrap(),
            WatermarkPosition::TopLeft
        );
        assert!("middle".parse::<WatermarkPosition>().is_err());
    }

    #[test]
    fn test_hex_colors() {
        assert_eq!(parse_hex_color("#ff8000"), Some(Rgba([255, 128, 0, 255])));
        assert_eq!(parse_hex_color("fff"), Some(Rgba([255, 255, 255, 255])));
        assert_eq!(parse_hex_color("#12345"), None);
        assert_eq!(parse_hex_color("#gggggg"), None);
    }

    #[test]
    fn test_from_settings_converts_percent_opacity() {
        let settings = WatermarkSettings {
            kind: "image".to_string(),
            position: "center".to_string(),
            image_path: Some("/tmp/mark.png".to_string()),
            ..Default::default()
        };
        let config = WatermarkConfig::from_settings(&settings);
        assert_eq!(config.kind, WatermarkKind::Image);
        assert_eq!(config.position, WatermarkPosition::Center);
        assert_eq!(config.opacity, 128);
        assert_eq!(config.color, Rgba([255, 255, 255, 255]));

        let opaque = WatermarkSettings {
            opacity: 100,
            ..Default::default()
        };
        assert_eq!(WatermarkConfig::from_settings(&opaque).opacity, 255);
    }

    #[test]
    fn test_image_mark_bottom_right_with_opacity() {
        let dir = tempdir().unwrap();
        let path = write_mark(dir.path(), 20, 10, Rgba([255, 255, 255, 255]));
        let marker = Watermarker::new(image_config(path, WatermarkPosition::BottomRight, 128));

        let result = marker.apply(&create_test_image(100, 50)).unwrap().to_rgba8();
        assert_eq!(result.dimensions(), (100, 50));

        // Mark covers x 70..90, y 30..40.
        let inside = result.get_pixel(75, 35);
        assert!(inside[0] > 100 && inside[0] < 160, "blended: {:?}", inside);
        assert_eq!(*result.get_pixel(95, 45), Rgba([0, 0, 0, 255]));
        assert_eq!(*result.get_pixel(5, 5), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn test_full_opacity_replaces_pixels() {
        let dir = tempdir().unwrap();
        let path = write_mark(dir.path(), 10, 10, Rgba([200, 10, 10, 255]));
        let marker = Watermarker::new(image_config(path, WatermarkPosition::TopLeft, 255));

        let result = marker.apply(&create_test_image(40, 40)).unwrap().to_rgba8();
        assert_eq!(*result.get_pixel(12, 12), Rgba([200, 10, 10, 255]));
        assert_eq!(*result.get_pixel(9, 9), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn test_oversized_mark_is_cropped() {
        let dir = tempdir().unwrap();
        let path = write_mark(dir.path(), 80, 80, Rgba([255, 255, 255, 255]));
        let marker = Watermarker::new(image_config(path, WatermarkPosition::Center, 255));

        let result = marker.apply(&create_test_image(20, 20)).unwrap();
        assert_eq!(result.dimensions(), (20, 20));
        assert_eq!(*result.to_rgba8().get_pixel(0, 0), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_missing_mark_image_is_not_found() {
        let marker = Watermarker::new(image_config(
            PathBuf::from("/nonexistent/mark.png"),
            WatermarkPosition::Center,
            128,
        ));
        let err = marker.apply(&create_test_image(10, 10)).unwrap_err();
        assert!(matches!(err, ProcessingError::NotFound(_)));
    }

    #[test]
    fn test_undecodable_mark_image_is_decode_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mark.png");
        std::fs::write(&path, b"not an image").unwrap();

        let marker = Watermarker::new(image_config(path, WatermarkPosition::Center, 128));
        let err = marker.apply(&create_test_image(10, 10)).unwrap_err();
        assert!(matches!(err, ProcessingError::Decode(_)));
    }

    #[test]
    fn test_text_without_font_is_font_load_error() {
        let marker = Watermarker::new(WatermarkConfig {
            font: "/nonexistent/NoSuchFont.ttf".to_string(),
            ..Default::default()
        });
        let err = marker.apply(&create_test_image(10, 10)).unwrap_err();
        assert!(matches!(err, ProcessingError::FontLoad(_)));
    }

    #[test]
    fn test_text_mark_draws_in_corner() {
        let font = match resolve_font("DejaVuSans") {
            Ok(font) => font,
            Err(_) => {
                eprintln!("no system font installed, skipping");
                return;
            }
        };
        let marker = Watermarker::with_font(
            WatermarkConfig {
                text: "WM".to_string(),
                size: 32.0,
                opacity: 255,
                ..Default::default()
            },
            font,
        );

        let result = marker.apply(&create_test_image(200, 100)).unwrap().to_rgba8();
        let lit = |x0: u32, x1: u32, y0: u32, y1: u32| {
            (x0..x1)
                .flat_map(|x| (y0..y1).map(move |y| (x, y)))
                .filter(|&(x, y)| result.get_pixel(x, y)[0] > 0)
                .count()
        };
        assert!(lit(100, 200, 50, 100) > 0);
        assert_eq!(lit(0, 100, 0, 50), 0);
    }
}
