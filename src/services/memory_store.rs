use crate::services::object_store::{ObjectStore, StorageError, StorageResult, VersionedObject};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

type ObjectId = (String, String);

#[derive(Clone)]
struct Entry {
    data: Bytes,
    version: u64,
}

/// Which gateway call touched which object, in call order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Get(String, String),
    Put(String, String),
}

/// `MemoryObjectStore` is an in-memory implementation of [`ObjectStore`] for
/// tests. It records every call, can fail reads or writes for chosen
/// objects, and can simulate a competing writer landing between a read and
/// the caller's following write.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<Mutex<HashMap<ObjectId, Entry>>>,
    calls: Arc<Mutex<Vec<Call>>>,
    fail_reads: Arc<Mutex<HashSet<ObjectId>>>,
    fail_writes: Arc<Mutex<HashSet<ObjectId>>>,
    interleaved: Arc<Mutex<HashMap<ObjectId, Vec<Bytes>>>>,
    next_version: Arc<Mutex<u64>>,
}

fn id(bucket: &str, key: &str) -> ObjectId {
    (bucket.to_string(), key.to_string())
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without recording a call.
    pub async fn insert(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        let version = self.bump_version().await;
        self.objects.lock().await.insert(
            id(bucket, key),
            Entry {
                data: data.into(),
                version,
            },
        );
    }

    /// Current payload, without recording a call.
    pub async fn peek(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.objects
            .lock()
            .await
            .get(&id(bucket, key))
            .map(|e| e.data.clone())
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    pub async fn puts_to(&self, bucket: &str) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|call| match call {
                Call::Put(b, k) if b == bucket => Some(k.clone()),
                _ => None,
            })
            .collect()
    }

    /// Subsequent reads of this object fail with `Unavailable`.
    pub async fn fail_reads(&self, bucket: &str, key: &str) {
        self.fail_reads.lock().await.insert(id(bucket, key));
    }

    /// Subsequent writes of this object fail with `AccessDenied`.
    pub async fn fail_writes(&self, bucket: &str, key: &str) {
        self.fail_writes.lock().await.insert(id(bucket, key));
    }

    /// Queue competing writes. Each read of the object, plain or versioned,
    /// is followed by one of these payloads replacing it before the caller
    /// can write.
    pub async fn interleave_writes(&self, bucket: &str, key: &str, payloads: Vec<Bytes>) {
        self.interleaved
            .lock()
            .await
            .entry(id(bucket, key))
            .or_default()
            .extend(payloads);
    }

    async fn bump_version(&self) -> u64 {
        let mut next = self.next_version.lock().await;
        *next += 1;
        *next
    }

    async fn check_read(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.calls
            .lock()
            .await
            .push(Call::Get(bucket.to_string(), key.to_string()));
        if self.fail_reads.lock().await.contains(&id(bucket, key)) {
            return Err(StorageError::Unavailable(format!(
                "injected read failure for {bucket}/{key}"
            )));
        }
        Ok(())
    }

    /// Apply the next queued competing write, if any.
    async fn land_competing_write(&self, bucket: &str, key: &str) {
        let competing = {
            let mut queued = self.interleaved.lock().await;
            queued
                .get_mut(&id(bucket, key))
                .filter(|q| !q.is_empty())
                .map(|q| q.remove(0))
        };
        if let Some(data) = competing {
            self.insert(bucket, key, data).await;
        }
    }

    async fn check_write(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.calls
            .lock()
            .await
            .push(Call::Put(bucket.to_string(), key.to_string()));
        if self.fail_writes.lock().await.contains(&id(bucket, key)) {
            return Err(StorageError::AccessDenied {
                bucket: bucket.to_string(),
                key: key.to_string(),
                reason: "injected write failure".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        self.check_read(bucket, key).await?;
        let current = self.peek(bucket, key).await;
        self.land_competing_write(bucket, key).await;
        current.ok_or_else(|| StorageError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> StorageResult<()> {
        self.check_write(bucket, key).await?;
        self.insert(bucket, key, data).await;
        Ok(())
    }

    async fn get_versioned(
        &self,
        bucket: &str,
        key: &str,
    ) -> StorageResult<Option<VersionedObject>> {
        self.check_read(bucket, key).await?;
        let current = self
            .objects
            .lock()
            .await
            .get(&id(bucket, key))
            .map(|e| VersionedObject {
                data: e.data.clone(),
                version: e.version.to_string(),
            });

        self.land_competing_write(bucket, key).await;
        Ok(current)
    }

    async fn put_if_match(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        expected: Option<&str>,
    ) -> StorageResult<String> {
        self.check_write(bucket, key).await?;
        let version = self.bump_version().await;
        let mut objects = self.objects.lock().await;
        let current = objects.get(&id(bucket, key)).map(|e| e.version.to_string());
        if current.as_deref() != expected {
            return Err(StorageError::PreconditionFailed {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        objects.insert(id(bucket, key), Entry { data, version });
        Ok(version.to_string())
    }
}
