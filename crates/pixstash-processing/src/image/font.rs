//! Font lookup for text watermarks.

use crate::error::{ProcessingError, ProcessingResult};
use ab_glyph::FontVec;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const SYSTEM_FONT_DIRS: &[&str] = &[
    "/usr/share/fonts",
    "/usr/local/share/fonts",
    "/Library/Fonts",
    "/System/Library/Fonts",
    "C:\\Windows\\Fonts",
];

/// Tried in order when the configured name is not installed.
const FALLBACK_FONTS: &[&str] = &[
    "DejaVuSans",
    "LiberationSans-Regular",
    "NotoSans-Regular",
    "FreeSans",
];

/// Resolve a font reference to a loaded font.
///
/// A reference that looks like a path is loaded as-is and never falls back.
/// A bare name is matched against the file stems of `.ttf`/`.otf` files in the
/// system and user font directories, then against [`FALLBACK_FONTS`].
pub fn resolve_font(reference: &str) -> ProcessingResult<FontVec> {
    if looks_like_path(reference) {
        return load_font(Path::new(reference));
    }

    let dirs = font_dirs();
    if let Some(path) = find_font_file(reference, &dirs) {
        return load_font(&path);
    }

    for fallback in FALLBACK_FONTS {
        if let Some(path) = find_font_file(fallback, &dirs) {
            tracing::warn!(
                requested = %reference,
                fallback = %path.display(),
                "Font not installed, using fallback"
            );
            return load_font(&path);
        }
    }

    Err(ProcessingError::FontLoad(format!(
        "no font named '{}' and no fallback font found",
        reference
    )))
}

/// First font file (by sorted path) under `dirs` whose stem equals `name`, ignoring case.
pub fn find_font_file(name: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter().filter(|dir| dir.is_dir()).find_map(|dir| {
        WalkDir::new(dir)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .find(|path| is_font_file(path) && stem_matches(path, name))
    })
}

fn load_font(path: &Path) -> ProcessingResult<FontVec> {
    let data = std::fs::read(path).map_err(|e| {
        ProcessingError::FontLoad(format!("cannot read {}: {}", path.display(), e))
    })?;
    let font = FontVec::try_from_vec(data).map_err(|e| {
        ProcessingError::FontLoad(format!("cannot parse {}: {}", path.display(), e))
    })?;

    tracing::debug!(path = %path.display(), "Loaded watermark font");
    Ok(font)
}

fn font_dirs() -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = SYSTEM_FONT_DIRS.iter().map(PathBuf::from).collect();
    if let Some(home) = std::env::var_os("HOME") {
        let home = PathBuf::from(home);
        dirs.push(home.join(".fonts"));
        dirs.push(home.join(".local/share/fonts"));
    }
    dirs
}

fn looks_like_path(reference: &str) -> bool {
    reference.contains('/') || reference.contains('\\') || is_font_file(Path::new(reference))
}

fn is_font_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("ttf") || ext.eq_ignore_ascii_case("otf"))
        .unwrap_or(false)
}

fn stem_matches(path: &Path, name: &str) -> bool {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| stem.eq_ignore_ascii_case(name))
        .unwrap_or(false)
}
