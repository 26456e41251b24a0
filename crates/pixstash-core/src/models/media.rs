//! The durable description of one stored image.
//!
//! The JSON field names are an on-disk compatibility surface: metadata records
//! written by earlier deployments must keep parsing, so renames are pinned here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::format::{ImageFormat, Orientation};

/// `0001-01-01T00:00:00Z`, the value an unset expiry serializes as.
pub fn zero_time() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(-62_135_596_800, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Metadata record persisted by a storage backend next to the image bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    pub id: String,
    /// User-supplied name; display only.
    #[serde(rename = "filename")]
    pub original_filename: String,
    /// Backend-specific locator, diagnostic only.
    #[serde(rename = "storagePath")]
    pub storage_locator: String,
    #[serde(rename = "size")]
    pub size_bytes: u64,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub orientation: Orientation,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// Meaningless unless `has_expiry` is set.
    #[serde(default = "zero_time")]
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub has_expiry: bool,
    /// Extension of the stored original, recorded at save time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_extension: Option<String>,
}

impl MediaItem {
    /// Create a record for a freshly stored original.
    ///
    /// Orientation follows the storage rule (`width >= height` is landscape).
    pub fn new(
        id: impl Into<String>,
        original_filename: impl Into<String>,
        format: ImageFormat,
        width: u32,
        height: u32,
        size_bytes: u64,
    ) -> Self {
        Self {
            id: id.into(),
            original_filename: original_filename.into(),
            storage_locator: String::new(),
            size_bytes,
            width,
            height,
            format,
            orientation: Orientation::from_dimensions(width, height),
            tags: Vec::new(),
            created_at: Utc::now(),
            expires_at: zero_time(),
            has_expiry: false,
            original_extension: None,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_expiry(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.set_expiry(expires_at);
        self
    }

    /// Set or clear the expiry; clearing resets the timestamp to the zero value.
    pub fn set_expiry(&mut self, expires_at: Option<DateTime<Utc>>) {
        match expires_at {
            Some(at) => {
                self.expires_at = at;
                self.has_expiry = true;
            }
            None => {
                self.expires_at = zero_time();
                self.has_expiry = false;
            }
        }
    }

    /// The expiry, if one is set.
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.has_expiry.then_some(self.expires_at)
    }

    /// True only when an expiry is set and lies strictly before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.has_expiry && self.expires_at < now
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample() -> MediaItem {
        MediaItem::new("abc123", "cat.jpg", ImageFormat::Jpeg, 640, 480, 2048)
    }

    #[test]
    fn test_json_field_names() {
        let mut item = sample().with_tags(vec!["pets".to_string()]);
        item.storage_locator = "original/landscape".to_string();

        let json = serde_json::to_value(&item).unwrap();
        for key in [
            "id",
            "filename",
            "storagePath",
            "size",
            "width",
            "height",
            "format",
            "orientation",
            "tags",
            "createdAt",
            "expiresAt",
            "hasExpiry",
        ] {
            assert!(json.get(key).is_some(), "missing key {key}");
        }
        assert!(json.get("originalExtension").is_none());
        assert_eq!(json["orientation"], "landscape");
        assert_eq!(json["format"], "jpeg");
    }

    #[test]
    fn test_parses_legacy_record() {
        let legacy = r#"{
            "id": "1715000000000000000",
            "filename": "sunset.png",
            "storagePath": "original/portrait",
            "size": 1234,
            "width": 300,
            "height": 600,
            "format": "webp",
            "orientation": "portrait",
            "tags": null,
            "createdAt": "2024-05-06T12:00:00.123456789+08:00",
            "expiresAt": "0001-01-01T00:00:00Z",
            "hasExpiry": false
        }"#;

        let item: MediaItem = serde_json::from_str(legacy).unwrap();
        assert_eq!(item.original_filename, "sunset.png");
        assert_eq!(item.orientation, Orientation::Portrait);
        assert!(item.tags.is_empty());
        assert_eq!(item.expires_at, zero_time());
        assert_eq!(item.original_extension, None);
    }

    #[test]
    fn test_expiry_ignored_without_flag() {
        let mut item = sample();
        item.expires_at = Utc::now() - Duration::days(1);
        item.has_expiry = false;
        assert!(!item.is_expired_at(Utc::now()));
        assert_eq!(item.expiry(), None);
    }

    #[test]
    fn test_expiry_strictly_before_now() {
        let now = Utc::now();
        let item = sample().with_expiry(Some(now));
        assert!(!item.is_expired_at(now));
        assert!(item.is_expired_at(now + Duration::seconds(1)));
    }

    #[test]
    fn test_clearing_expiry_resets_timestamp() {
        let mut item = sample().with_expiry(Some(Utc::now()));
        item.set_expiry(None);
        assert!(!item.has_expiry);
        assert_eq!(item.expires_at, zero_time());
    }

    #[test]
    fn test_round_trip() {
        let mut item = sample().with_expiry(Some(Utc::now() + Duration::hours(3)));
        item.original_extension = Some("jpg".to_string());
        let json = serde_json::to_string(&item).unwrap();
        let back: MediaItem = serde_json::from_str(&json).unwrap();
        assert_eq!(item, back);
    }
}
