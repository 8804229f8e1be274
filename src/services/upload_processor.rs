//! src/services/upload_processor.rs
//!
//! UploadProcessor: handles one batch of upload notifications:
//! classify each object, thumbnail the images, build one metadata record
//! per object, then append the whole batch to the metadata record at once.
//!
//! A failure while thumbnailing one object never aborts the batch. The
//! object is still recorded (as an image without thumbnail) and the failure
//! is logged and reported back. Metadata failures fail the invocation; any
//! thumbnails already written stay where they are.

use crate::models::event::UploadNotification;
use crate::models::record::ObjectRecord;
use crate::services::metadata_store::{MetadataError, MetadataStore};
use crate::services::object_store::{ObjectStore, StorageError, resource_uri};
use crate::services::thumbnail::{Thumbnailer, ThumbnailError, classify};
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("no object information received in upload event")]
    EmptyBatch,
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

/// Why one object ended up without a thumbnail.
#[derive(Debug, Error)]
pub enum ObjectError {
    #[error("failed to read source object: {0}")]
    Fetch(#[source] StorageError),
    #[error(transparent)]
    Thumbnail(#[from] ThumbnailError),
    #[error("failed to write thumbnail: {0}")]
    Store(#[source] StorageError),
}

#[derive(Debug, Clone, Serialize)]
pub struct ObjectFailure {
    pub key: String,
    pub error: String,
}

/// What one upload invocation did.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    /// Records appended to the metadata record, in batch order.
    pub records: Vec<ObjectRecord>,
    /// Number of thumbnails written.
    pub thumbnails: usize,
    pub failures: Vec<ObjectFailure>,
}

/// Buckets and addressing used by the processor.
#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub source_bucket: String,
    pub thumbnail_bucket: String,
    pub public_url: String,
    /// How many objects of a batch are thumbnailed at the same time.
    pub concurrency: usize,
}

#[derive(Clone)]
pub struct UploadProcessor {
    store: Arc<dyn ObjectStore>,
    metadata: MetadataStore,
    thumbnailer: Thumbnailer,
    settings: UploadSettings,
}

impl UploadProcessor {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        metadata: MetadataStore,
        thumbnailer: Thumbnailer,
        settings: UploadSettings,
    ) -> Self {
        Self {
            store,
            metadata,
            thumbnailer,
            settings,
        }
    }

    pub fn source_bucket(&self) -> &str {
        &self.settings.source_bucket
    }

    /// Process a batch with records stamped at the current time.
    pub async fn process_batch(
        &self,
        batch: Vec<UploadNotification>,
    ) -> Result<BatchReport, ProcessError> {
        self.process_batch_at(batch, Utc::now()).await
    }

    /// Process a batch with every record stamped at `now`.
    pub async fn process_batch_at(
        &self,
        batch: Vec<UploadNotification>,
        now: DateTime<Utc>,
    ) -> Result<BatchReport, ProcessError> {
        if batch.is_empty() {
            warn!("no object information received in incoming event");
            return Err(ProcessError::EmptyBatch);
        }

        let timestamp = now.timestamp();
        let outcomes: Vec<(ObjectRecord, Option<ObjectError>)> = stream::iter(batch)
            .map(|notification| async move { self.process_object(&notification, timestamp).await })
            .buffered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let mut records = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for (record, failure) in outcomes {
            if let Some(err) = failure {
                failures.push(ObjectFailure {
                    key: record.name.clone(),
                    error: err.to_string(),
                });
            }
            records.push(record);
        }
        let thumbnails = records.iter().filter(|r| r.has_thumbnail()).count();

        if let Err(err) = self.metadata.append(&records).await {
            error!(
                bucket = %self.metadata.bucket(),
                key = %self.metadata.key(),
                objects = records.len(),
                error = %err,
                "error while adding metadata"
            );
            return Err(err.into());
        }

        info!(
            objects = records.len(),
            thumbnails,
            failures = failures.len(),
            "processed upload batch"
        );
        Ok(BatchReport {
            records,
            thumbnails,
            failures,
        })
    }

    /// Build the record for one object, thumbnailing it when it is an image.
    async fn process_object(
        &self,
        notification: &UploadNotification,
        timestamp: i64,
    ) -> (ObjectRecord, Option<ObjectError>) {
        let key = notification.object_key.as_str();
        let source_uri = resource_uri(&self.settings.public_url, &self.settings.source_bucket, key);

        if classify(key).is_none() {
            info!(
                key,
                "skipping thumbnail generation as object is not an image"
            );
            let record = ObjectRecord::normal(key, source_uri, timestamp, notification.object_size);
            return (record, None);
        }

        match self.create_thumbnail(key).await {
            Ok(thumbnail_uri) => {
                let record = ObjectRecord::image(
                    key,
                    source_uri,
                    timestamp,
                    notification.object_size,
                    Some(thumbnail_uri),
                );
                (record, None)
            }
            Err(err) => {
                warn!(
                    src_bucket = %self.settings.source_bucket,
                    dest_bucket = %self.settings.thumbnail_bucket,
                    key,
                    error = %err,
                    "error while creating thumbnail; recording object without one"
                );
                let record =
                    ObjectRecord::image(key, source_uri, timestamp, notification.object_size, None);
                (record, Some(err))
            }
        }
    }

    /// Read the source, build the thumbnail and store it under the same key.
    async fn create_thumbnail(&self, key: &str) -> Result<String, ObjectError> {
        let data = self
            .store
            .get(&self.settings.source_bucket, key)
            .await
            .map_err(ObjectError::Fetch)?;

        let thumbnail = self.thumbnailer.generate_async(key, data).await?;

        self.store
            .put(&self.settings.thumbnail_bucket, key, thumbnail)
            .await
            .map_err(ObjectError::Store)?;

        let uri = resource_uri(&self.settings.public_url, &self.settings.thumbnail_bucket, key);
        info!(key, thumbnail_uri = %uri, "created and stored thumbnail");
        Ok(uri)
    }
}
