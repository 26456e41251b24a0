//! Shared key generation for storage backends.
//!
//! Relative layout: `{variant}/{orientation}/{id}.{ext}` for image bytes and
//! `metadata/{id}.json` for records. Local paths and object keys are both built
//! from these strings.

use pixstash_core::{Orientation, Variant};
use uuid::Uuid;

use crate::traits::{StorageError, StorageResult};

pub const METADATA_DIR: &str = "metadata";

/// Extension used for originals uploaded without a usable one.
pub const FALLBACK_EXTENSION: &str = "bin";

/// Generate a fresh item id (128 random bits, hex).
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Reject ids that could escape the storage root or collide with layout names.
pub fn validate_id(id: &str) -> StorageResult<()> {
    if id.is_empty() {
        return Err(StorageError::InvalidKey("Item id is empty".to_string()));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(StorageError::InvalidKey(format!(
            "Item id contains invalid characters: {}",
            id
        )));
    }
    Ok(())
}

/// Extension to store an original under, taken from the uploaded filename.
///
/// Case is kept as uploaded; anything that is not plain alphanumeric falls
/// back to `bin`.
pub fn original_extension(filename: &str) -> String {
    std::path::Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_string)
        .unwrap_or_else(|| FALLBACK_EXTENSION.to_string())
}

/// Directory (or key prefix) holding one variant for one orientation.
pub fn variant_dir(variant: Variant, orientation: Orientation) -> String {
    format!("{}/{}", variant.as_str(), orientation.as_str())
}

/// File name of a derived variant. `None` for the original, whose extension varies.
pub fn derived_file_name(id: &str, variant: Variant) -> Option<String> {
    variant
        .derived_format()
        .map(|format| format!("{}.{}", id, format.extension()))
}

/// Full relative key for a variant file with a known extension.
pub fn variant_key(id: &str, variant: Variant, orientation: Orientation, ext: &str) -> String {
    format!("{}/{}.{}", variant_dir(variant, orientation), id, ext)
}

/// Full relative key for a derived variant.
pub fn derived_key(id: &str, variant: Variant, orientation: Orientation) -> Option<String> {
    derived_file_name(id, variant).map(|name| format!("{}/{}", variant_dir(variant, orientation), name))
}

pub fn metadata_key(id: &str) -> String {
    format!("{}/{}.json", METADATA_DIR, id)
}

/// Whether a file name in an original directory belongs to `id`.
pub fn is_original_of(file_name: &str, id: &str) -> bool {
    file_name
        .strip_prefix(id)
        .is_some_and(|rest| rest.starts_with('.'))
}

/// Public URL path for a variant, mirroring the layout under `prefix`.
///
/// Originals are addressed without an extension; derived variants carry theirs.
pub fn public_url(prefix: &str, id: &str, variant: Variant, orientation: Orientation) -> String {
    let prefix = prefix.trim_end_matches('/');
    match derived_file_name(id, variant) {
        Some(name) => format!("{}/{}/{}", prefix, variant_dir(variant, orientation), name),
        None => format!("{}/{}/{}", prefix, variant_dir(variant, orientation), id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_id() {
        assert!(validate_id("0f8fad5bd9cb469fa16570867728950e").is_ok());
        assert!(validate_id("legacy_17150-00").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("../etc").is_err());
        assert!(validate_id("a/b").is_err());
        assert!(validate_id("a.json").is_err());
    }

    #[test]
    fn test_generated_ids_are_valid_and_distinct() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
        assert!(validate_id(&a).is_ok());
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_original_extension() {
        assert_eq!(original_extension("cat.JPG"), "JPG");
        assert_eq!(original_extension("Holiday.PNG"), "PNG");
        assert_eq!(original_extension("photo.final.png"), "png");
        assert_eq!(original_extension("README"), "bin");
        assert_eq!(original_extension("weird.p g"), "bin");
    }

    #[test]
    fn test_layout_keys() {
        assert_eq!(
            variant_key("abc", Variant::Original, Orientation::Portrait, "gif"),
            "original/portrait/abc.gif"
        );
        assert_eq!(
            derived_key("abc", Variant::WebP, Orientation::Landscape).as_deref(),
            Some("webp/landscape/abc.webp")
        );
        assert_eq!(derived_key("abc", Variant::Original, Orientation::Landscape), None);
        assert_eq!(metadata_key("abc"), "metadata/abc.json");
    }

    #[test]
    fn test_is_original_of() {
        assert!(is_original_of("abc.jpg", "abc"));
        assert!(!is_original_of("abcd.jpg", "abc"));
        assert!(!is_original_of("abc", "abc"));
    }

    #[test]
    fn test_public_url() {
        assert_eq!(
            public_url("/static/images/", "abc", Variant::Original, Orientation::Landscape),
            "/static/images/original/landscape/abc"
        );
        assert_eq!(
            public_url("/static/images", "abc", Variant::Avif, Orientation::Portrait),
            "/static/images/avif/portrait/abc.avif"
        );
    }
}
