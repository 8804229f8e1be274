//! src/services/metadata_store.rs
//!
//! MetadataStore: owns the single shared metadata record: a JSON array of
//! [`ObjectRecord`] stored at one fixed bucket + key.
//!
//! Writes are append-only. The raw array may hold several entries for one
//! object name (retries, re-uploads, duplicate deliveries); every read
//! collapses them to the entry with the greatest `lastModified` before any
//! filtering happens.
//!
//! Two write modes exist:
//! - [`WriteMode::Legacy`] is an unconditional read-modify-write. Two
//!   invocations appending at the same time can both read the same prior
//!   state, and the later write silently drops the earlier one's records.
//! - [`WriteMode::Versioned`] reads the record with its version token and
//!   writes with `put_if_match`, re-reading and retrying when another writer
//!   won the race. No records are lost; after `max_attempts` the append fails
//!   with [`MetadataError::Conflict`].

use crate::models::record::ObjectRecord;
use crate::services::object_store::{ObjectStore, StorageError};
use bytes::Bytes;
use serde::Serialize;
use std::{collections::HashMap, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, error, info, warn};

const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(25);

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata record `{bucket}/{key}` unavailable: {source}")]
    StoreUnavailable {
        bucket: String,
        key: String,
        #[source]
        source: StorageError,
    },
    #[error("metadata record `{bucket}/{key}` is not a valid record array: {source}")]
    CorruptData {
        bucket: String,
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode metadata records: {0}")]
    SerializationFailure(#[source] serde_json::Error),
    #[error("metadata record `{bucket}/{key}` kept changing; gave up after {attempts} attempts")]
    Conflict {
        bucket: String,
        key: String,
        attempts: u32,
    },
}

/// Closed interval of Unix timestamps, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub start: i64,
    pub end: i64,
}

impl TimeWindow {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        self.start <= timestamp && timestamp <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeFilter {
    All,
    Window(TimeWindow),
}

impl TimeFilter {
    /// Build a filter from raw bounds. A negative bound is the "no filter"
    /// sentinel and selects everything.
    pub fn from_bounds(start: i64, end: i64) -> Self {
        if start < 0 || end < 0 {
            TimeFilter::All
        } else {
            TimeFilter::Window(TimeWindow::new(start, end))
        }
    }

    pub fn matches(&self, record: &ObjectRecord) -> bool {
        match self {
            TimeFilter::All => true,
            TimeFilter::Window(window) => window.contains(record.last_modified),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Unconditional read-modify-write. Concurrent appends can lose records.
    Legacy,
    /// Compare-and-swap on the record version, retried up to `max_attempts`.
    Versioned { max_attempts: u32 },
}

impl WriteMode {
    /// Parse `legacy` or `versioned` (case-insensitive).
    pub fn from_name(name: &str, max_attempts: u32) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "legacy" => Some(WriteMode::Legacy),
            "versioned" => Some(WriteMode::Versioned {
                max_attempts: max_attempts.max(1),
            }),
            _ => None,
        }
    }
}

/// Keep one record per name: the one with the strictly greatest
/// `last_modified`. On equal timestamps the first one seen stays.
///
/// Output order is the order in which each name first appeared.
pub fn dedup_latest(records: Vec<ObjectRecord>) -> Vec<ObjectRecord> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<ObjectRecord> = Vec::new();

    for record in records {
        match index.get(&record.name) {
            Some(&pos) => {
                if record.last_modified > unique[pos].last_modified {
                    unique[pos] = record;
                }
            }
            None => {
                index.insert(record.name.clone(), unique.len());
                unique.push(record);
            }
        }
    }
    unique
}

#[derive(Clone)]
pub struct MetadataStore {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    key: String,
    mode: WriteMode,
    retry_backoff: Duration,
}

impl MetadataStore {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        key: impl Into<String>,
        mode: WriteMode,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            key: key.into(),
            mode,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    /// Base delay between versioned write attempts; attempt `n` waits `n` times this.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }


    /// Deduplicated records, optionally restricted to a time window.
    ///
    /// Never returns two records with the same name. Has no side effects.
    pub async fn read_filtered(
        &self,
        filter: TimeFilter,
    ) -> Result<Vec<ObjectRecord>, MetadataError> {
        let raw = self.read_raw().await?;
        let raw_len = raw.len();
        let records: Vec<ObjectRecord> = dedup_latest(raw)
            .into_iter()
            .filter(|record| filter.matches(record))
            .collect();

        debug!(
            bucket = %self.bucket,
            key = %self.key,
            raw = raw_len,
            returned = records.len(),
            ?filter,
            "read metadata"
        );
        Ok(records)
    }

    /// The persisted collection as written, duplicates included.
    ///
    /// Any failed read, a missing record included, is `StoreUnavailable`.
    /// [`MetadataStore::initialize`] creates the record at startup.
    pub async fn read_raw(&self) -> Result<Vec<ObjectRecord>, MetadataError> {
        match self.store.get(&self.bucket, &self.key).await {
            Ok(data) => self.decode(&data),
            Err(err) => Err(self.unavailable("read", err)),
        }
    }

    /// Create the record as an empty array unless it already exists.
    ///
    /// Returns `true` when this call created it. An existing record is never
    /// touched, so concurrent starts are safe.
    pub async fn initialize(&self) -> Result<bool, MetadataError> {
        let empty = encode(&[])?;
        match self
            .store
            .put_if_match(&self.bucket, &self.key, empty, None)
            .await
        {
            Ok(version) => {
                info!(bucket = %self.bucket, key = %self.key, %version, "created empty metadata record");
                Ok(true)
            }
            Err(err) if err.is_precondition_failed() => {
                debug!(bucket = %self.bucket, key = %self.key, "metadata record already present");
                Ok(false)
            }
            Err(err) => Err(self.unavailable("initialize", err)),
        }
    }

    /// Append `records` to the persisted collection without deduplicating.
    pub async fn append(&self, records: &[ObjectRecord]) -> Result<(), MetadataError> {
        match self.mode {
            WriteMode::Legacy => self.append_unconditional(records).await,
            WriteMode::Versioned { max_attempts } => {
                self.append_versioned(records, max_attempts).await
            }
        }
    }

    async fn append_unconditional(&self, records: &[ObjectRecord]) -> Result<(), MetadataError> {
        let mut current = self.read_raw().await?;
        let previous = current.len();
        current.extend_from_slice(records);
        let body = encode(&current)?;

        self.store
            .put(&self.bucket, &self.key, body)
            .await
            .map_err(|err| self.unavailable("write", err))?;

        info!(
            bucket = %self.bucket,
            key = %self.key,
            appended = records.len(),
            total = previous + records.len(),
            "appended metadata records"
        );
        Ok(())
    }

    async fn append_versioned(
        &self,
        records: &[ObjectRecord],
        max_attempts: u32,
    ) -> Result<(), MetadataError> {
        for attempt in 1..=max_attempts {
            let (mut current, version) =
                match self.store.get_versioned(&self.bucket, &self.key).await {
                    Ok(Some(object)) => (self.decode(&object.data)?, object.version),
                    Ok(None) => {
                        let missing = StorageError::ObjectNotFound {
                            bucket: self.bucket.clone(),
                            key: self.key.clone(),
                        };
                        return Err(self.unavailable("read", missing));
                    }
                    Err(err) => return Err(self.unavailable("read", err)),
                };

            let previous = current.len();
            current.extend_from_slice(records);
            let body = encode(&current)?;

            match self
                .store
                .put_if_match(&self.bucket, &self.key, body, Some(&version))
                .await
            {
                Ok(new_version) => {
                    info!(
                        bucket = %self.bucket,
                        key = %self.key,
                        appended = records.len(),
                        total = previous + records.len(),
                        attempt,
                        version = %new_version,
                        "appended metadata records"
                    );
                    return Ok(());
                }
                Err(err) if err.is_precondition_failed() => {
                    warn!(
                        bucket = %self.bucket,
                        key = %self.key,
                        attempt,
                        max_attempts,
                        "metadata record changed concurrently, retrying append"
                    );
                    if attempt < max_attempts {
                        tokio::time::sleep(self.retry_backoff * attempt).await;
                    }
                }
                Err(err) => return Err(self.unavailable("write", err)),
            }
        }

        error!(
            bucket = %self.bucket,
            key = %self.key,
            attempts = max_attempts,
            "giving up on metadata append"
        );
        Err(MetadataError::Conflict {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            attempts: max_attempts,
        })
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<ObjectRecord>, MetadataError> {
        serde_json::from_slice(data).map_err(|source| {
            error!(bucket = %self.bucket, key = %self.key, error = %source, "corrupt metadata record");
            MetadataError::CorruptData {
                bucket: self.bucket.clone(),
                key: self.key.clone(),
                source,
            }
        })
    }

    fn unavailable(&self, operation: &str, source: StorageError) -> MetadataError {
        error!(
            bucket = %self.bucket,
            key = %self.key,
            operation,
            error = %source,
            "metadata store operation failed"
        );
        MetadataError::StoreUnavailable {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            source,
        }
    }
}

fn encode(records: &[ObjectRecord]) -> Result<Bytes, MetadataError> {
    serde_json::to_vec(records)
        .map(Bytes::from)
        .map_err(MetadataError::SerializationFailure)
}
