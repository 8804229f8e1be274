//! Upload notifications delivered by the event trigger.

use serde::{Deserialize, Serialize};

/// One uploaded object, as announced by the trigger.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UploadNotification {
    #[serde(rename = "objectKey")]
    pub object_key: String,

    #[serde(rename = "objectSize")]
    pub object_size: u64,
}

impl UploadNotification {
    pub fn new(object_key: impl Into<String>, object_size: u64) -> Self {
        Self {
            object_key: object_key.into(),
            object_size,
        }
    }
}

/// Accepted request bodies for an upload invocation.
///
/// Either a bare batch of notifications or an S3-style notification envelope
/// (`{"Records":[{"s3":{"object":{"key":..,"size":..}}}]}`).
#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum UploadEvent {
    Batch(Vec<UploadNotification>),
    Envelope(S3Envelope),
}

#[derive(Deserialize, Debug)]
pub struct S3Envelope {
    #[serde(rename = "Records", default)]
    pub records: Vec<S3EventRecord>,
}

#[derive(Deserialize, Debug)]
pub struct S3EventRecord {
    pub s3: S3Entity,
}

#[derive(Deserialize, Debug)]
pub struct S3Entity {
    pub object: S3ObjectEntity,
}

#[derive(Deserialize, Debug)]
pub struct S3ObjectEntity {
    pub key: String,
    #[serde(default)]
    pub size: u64,
}

impl UploadEvent {
    /// Flatten into notifications, preserving record order.
    pub fn into_notifications(self) -> Vec<UploadNotification> {
        match self {
            UploadEvent::Batch(batch) => batch,
            UploadEvent::Envelope(envelope) => envelope
                .records
                .into_iter()
                .map(|r| UploadNotification::new(r.s3.object.key, r.s3.object.size))
                .collect(),
        }
    }
}
