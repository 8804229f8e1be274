//! Represents one entry of the shared metadata record.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Thumbnail URI stored when no thumbnail was produced for an object.
pub const THUMBNAIL_NOT_AVAILABLE: &str = "n/a";

/// Coarse classification of an uploaded object.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Normal,
    Image,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Normal => "normal",
            ObjectType::Image => "image",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single uploaded object as seen by the metadata record.
///
/// The serialized field names are shared with every other writer of the
/// metadata blob, so they must not change. Unknown fields from older writers
/// are ignored on read.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectRecord {
    /// Object key in the source bucket. Not unique in the raw collection.
    pub name: String,

    /// Resolvable location of the original object.
    #[serde(rename = "sourceURI")]
    pub source_uri: String,

    /// Unix timestamp (seconds) at which this record was produced.
    #[serde(rename = "lastModified")]
    pub last_modified: i64,

    /// Size of the original object in bytes.
    pub size: u64,

    #[serde(rename = "type")]
    pub kind: ObjectType,

    /// Location of the thumbnail, or [`THUMBNAIL_NOT_AVAILABLE`].
    #[serde(rename = "thumbnailURI")]
    pub thumbnail_uri: String,
}

impl ObjectRecord {
    /// Record for an object that never gets a thumbnail.
    pub fn normal(
        name: impl Into<String>,
        source_uri: impl Into<String>,
        last_modified: i64,
        size: u64,
    ) -> Self {
        Self {
            name: name.into(),
            source_uri: source_uri.into(),
            last_modified,
            size,
            kind: ObjectType::Normal,
            thumbnail_uri: THUMBNAIL_NOT_AVAILABLE.to_string(),
        }
    }

    /// Record for an image. `thumbnail_uri` is `None` when thumbnailing failed.
    pub fn image(
        name: impl Into<String>,
        source_uri: impl Into<String>,
        last_modified: i64,
        size: u64,
        thumbnail_uri: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source_uri: source_uri.into(),
            last_modified,
            size,
            kind: ObjectType::Image,
            thumbnail_uri: thumbnail_uri.unwrap_or_else(|| THUMBNAIL_NOT_AVAILABLE.to_string()),
        }
    }

    pub fn has_thumbnail(&self) -> bool {
        self.thumbnail_uri != THUMBNAIL_NOT_AVAILABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_with_shared_field_names() {
        let record = ObjectRecord::normal("report.pdf", "http://h/src/report.pdf", 1683300000, 42);
        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(
            value,
            json!({
                "name": "report.pdf",
                "sourceURI": "http://h/src/report.pdf",
                "lastModified": 1683300000,
                "size": 42,
                "type": "normal",
                "thumbnailURI": "n/a"
            })
        );
    }

    #[test]
    fn ignores_unknown_fields_from_older_writers() {
        let raw = r#"{
            "name": "cat.png",
            "sourceURI": "s",
            "lastModified": 10,
            "LastModifiedStr": "3:04:05 PM",
            "size": 7,
            "type": "image",
            "thumbnailURI": "t"
        }"#;

        let record: ObjectRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.kind, ObjectType::Image);
        assert_eq!(record.thumbnail_uri, "t");
        assert!(record.has_thumbnail());
    }

    #[test]
    fn rejects_unknown_type_and_negative_size() {
        let bad_type = r#"{"name":"a","sourceURI":"s","lastModified":1,"size":1,"type":"video","thumbnailURI":"n/a"}"#;
        let bad_size = r#"{"name":"a","sourceURI":"s","lastModified":1,"size":-1,"type":"normal","thumbnailURI":"n/a"}"#;

        assert!(serde_json::from_str::<ObjectRecord>(bad_type).is_err());
        assert!(serde_json::from_str::<ObjectRecord>(bad_size).is_err());
    }

    #[test]
    fn failed_image_keeps_image_type_without_thumbnail() {
        let record = ObjectRecord::image("cat.jpg", "s", 1, 1, None);
        assert_eq!(record.kind, ObjectType::Image);
        assert_eq!(record.thumbnail_uri, THUMBNAIL_NOT_AVAILABLE);
        assert!(!record.has_thumbnail());
    }
}
