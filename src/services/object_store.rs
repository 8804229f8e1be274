//! Object store gateway interface.
//!
//! Everything above this layer (metadata store, upload processor, digest)
//! talks to storage only through [`ObjectStore`], so the local gateway and
//! the in-memory test double are interchangeable.

use async_trait::async_trait;
use bytes::Bytes;
use std::{io, sync::Arc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("region `{0}` is not supported")]
    UnsupportedRegion(String),
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("access denied to `{key}` in bucket `{bucket}`: {reason}")]
    AccessDenied {
        bucket: String,
        key: String,
        reason: String,
    },
    #[error("object `{key}` in bucket `{bucket}` changed since it was read")]
    PreconditionFailed { bucket: String, key: String },
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::ObjectNotFound { .. })
    }

    pub fn is_precondition_failed(&self) -> bool {
        matches!(self, StorageError::PreconditionFailed { .. })
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Payload plus the version token it was read at.
#[derive(Debug, Clone)]
pub struct VersionedObject {
    pub data: Bytes,
    pub version: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Read a whole object.
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes>;

    /// Unconditionally create or overwrite an object.
    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> StorageResult<()>;

    /// Read an object together with its current version. `None` if absent.
    async fn get_versioned(&self, bucket: &str, key: &str)
    -> StorageResult<Option<VersionedObject>>;

    /// Write only if the stored version still equals `expected`.
    ///
    /// `expected = None` means the object must not exist yet. Returns the new
    /// version, or [`StorageError::PreconditionFailed`] when another writer
    /// got there first.
    async fn put_if_match(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        expected: Option<&str>,
    ) -> StorageResult<String>;
}

#[async_trait]
impl<T: ObjectStore + ?Sized> ObjectStore for Arc<T> {
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        (**self).get(bucket, key).await
    }

    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> StorageResult<()> {
        (**self).put(bucket, key, data).await
    }

    async fn get_versioned(
        &self,
        bucket: &str,
        key: &str,
    ) -> StorageResult<Option<VersionedObject>> {
        (**self).get_versioned(bucket, key).await
    }

    async fn put_if_match(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        expected: Option<&str>,
    ) -> StorageResult<String> {
        (**self).put_if_match(bucket, key, data, expected).await
    }
}

/// Public URI under which `bucket/key` is served.
pub fn resource_uri(public_url: &str, bucket: &str, key: &str) -> String {
    format!("{}/{}/{}", public_url.trim_end_matches('/'), bucket, key)
}
