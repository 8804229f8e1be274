//! src/services/storage_service.rs
//!
//! LocalObjectStore: the object store gateway backed by SQLite for object
//! rows and local disk for payloads sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{key}`. Every write stamps a fresh
//! `version_id`, which is what [`ObjectStore::put_if_match`] compares.

use crate::models::{bucket::Bucket, object::StoredObject};
use crate::services::object_store::{
    ObjectStore, StorageError, StorageResult, VersionedObject,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    sync::RwLock,
};
use tracing::{debug, warn};
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const SUPPORTED_REGIONS: [&str; 16] = [
    "local",
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "eu-west-1",
    "ap-southeast-1",
    "ap-northeast-1",
    "ap-south-1",
    "ap-south-2",
    "ap-southeast-2",
    "ap-southeast-3",
    "ap-southeast-4",
    "ap-northeast-2",
    "ap-northeast-3",
    "me-south-1",
];

const OBJECT_COLUMNS: &str =
    "id, bucket_id, key, content_type, size_bytes, etag, last_modified, version_id";

/// Open (creating if needed) the SQLite database behind the gateway.
pub async fn connect(database_url: &str, max_connections: u32) -> StorageResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// What must hold about the stored version for a write to go through.
#[derive(Debug, Clone, Copy)]
enum WriteCondition<'a> {
    Any,
    Absent,
    Version(&'a str),
}

/// Payload written to a temp file, not yet visible under its key.
struct StagedPayload {
    tmp_path: PathBuf,
    size_bytes: i64,
    etag: String,
}

/// Local gateway providing the operations the services need:
/// - whole-object get/put for source objects and thumbnails
/// - versioned get and compare-and-swap put for the metadata record
/// - streaming put and file readers for the HTTP surface
///
/// Writers in this process are serialized by `write_lock` so the row check
/// and the payload rename happen together. Writers in other processes are
/// still caught by the conditional SQL, which is the authoritative check.
#[derive(Clone)]
pub struct LocalObjectStore {
    /// Shared SQLite connection pool used for object rows.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    write_lock: Arc<RwLock<()>>,
}

impl LocalObjectStore {
    /// Create a store backed by the provided SQLite pool, using `base_path`
    /// as the root directory for object payloads.
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            write_lock: Arc::new(RwLock::new(())),
        }
    }

    /// Apply the embedded schema. Safe to run repeatedly.
    pub async fn migrate(&self) -> StorageResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!("Running {} migration statements...", statements.len());

        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    ///
    /// Rejects empty or oversized keys, keys that begin with `/`, contain
    /// `..`, a backslash or any control byte.
    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        if key.is_empty() {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(StorageError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StorageError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Validate bucket name format.
    ///
    /// Enforces S3-like naming rules:
    /// - 3–63 characters
    /// - lowercase letters, digits, dots, hyphens only
    /// - cannot start/end with dot or hyphen
    /// - cannot contain consecutive dots or dot-hyphen patterns
    /// - cannot look like an IPv4 address
    fn ensure_bucket_name_safe(&self, name: &str) -> StorageResult<()> {
        let invalid = |reason: &str| StorageError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if name.trim() != name {
            return Err(invalid("cannot begin or end with whitespace"));
        }

        let len = name.len();
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
            return Err(invalid("must be between 3 and 63 characters"));
        }

        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return Err(invalid(
                "allowed characters are lowercase letters, digits, dots, and hyphens",
            ));
        }

        if name.starts_with('.')
            || name.ends_with('.')
            || name.starts_with('-')
            || name.ends_with('-')
        {
            return Err(invalid("must start and end with a lowercase letter or digit"));
        }

        if name.contains("..") || name.contains("-.") || name.contains(".-") {
            return Err(invalid(
                "cannot contain consecutive dots or dot-hyphen combinations",
            ));
        }

        if is_ipv4_like(name) {
            return Err(invalid("must not be formatted like an IP address"));
        }

        Ok(())
    }

    /// Validate region string against SUPPORTED_REGIONS (case-insensitive).
    fn ensure_region_valid(&self, region: &str) -> StorageResult<()> {
        if SUPPORTED_REGIONS
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(region))
        {
            Ok(())
        } else {
            Err(StorageError::UnsupportedRegion(region.to_string()))
        }
    }

    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        let mut path = self.base_path.clone();
        path.push(bucket_name);
        path
    }

    /// Generate two-level shard identifiers for an object key.
    ///
    /// Uses MD5(bucket/key) and returns the first two bytes as lowercase
    /// hexadecimal strings (00–ff).
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Combines base_path/bucket/{shard}/{shard}/{key}.
    /// Parent directories may not exist yet.
    fn object_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket_name, key);
        let mut path = self.bucket_root(bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Create a bucket row and directory if they do not exist yet.
    ///
    /// Validates name and region; an existing bucket is returned unchanged.
    pub async fn ensure_bucket(&self, name: &str, region: &str) -> StorageResult<Bucket> {
        self.ensure_bucket_name_safe(name)?;
        let normalized_region = region.to_lowercase();
        self.ensure_region_valid(&normalized_region)?;
        fs::create_dir_all(self.bucket_root(name)).await?;

        sqlx::query(
            "INSERT INTO buckets (id, name, region, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(&normalized_region)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;

        self.fetch_bucket(name).await
    }

    /// Fetch bucket metadata from SQLite. Returns BucketNotFound if missing.
    async fn fetch_bucket(&self, bucket: &str) -> StorageResult<Bucket> {
        self.ensure_bucket_name_safe(bucket)?;
        sqlx::query_as::<sqlx::sqlite::Sqlite, Bucket>(
            "SELECT id, name, region, created_at FROM buckets WHERE name = ?",
        )
        .bind(bucket)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::BucketNotFound(bucket.to_string()),
            other => StorageError::Sqlx(other),
        })
    }

    /// Fetch an object row. Returns ObjectNotFound if missing.
    async fn fetch_object(&self, bucket: &Bucket, key: &str) -> StorageResult<StoredObject> {
        sqlx::query_as::<_, StoredObject>(&format!(
            "SELECT {OBJECT_COLUMNS} FROM objects WHERE key = ? AND bucket_id = ?"
        ))
        .bind(key)
        .bind(bucket.id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::ObjectNotFound {
                bucket: bucket.name.clone(),
                key: key.to_string(),
            },
            other => StorageError::Sqlx(other),
        })
    }

    async fn read_payload(&self, bucket: &Bucket, key: &str) -> StorageResult<Bytes> {
        let file_path = self.object_path(&bucket.name, key);
        let data = fs::read(&file_path)
            .await
            .map_err(|err| map_io_error(&bucket.name, key, err))?;
        Ok(Bytes::from(data))
    }

    /// Stream bytes into a temp file next to the final location.
    ///
    /// Computes MD5/etag and size while streaming and fsyncs before
    /// returning. The temp file is removed on any error.
    async fn stage_payload<S>(&self, parent: &Path, stream: S) -> StorageResult<StagedPayload>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        fs::create_dir_all(parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StorageError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        Ok(StagedPayload {
            tmp_path,
            size_bytes,
            etag: format!("{:x}", digest.compute()),
        })
    }

    /// Write an object under `condition`.
    ///
    /// - Stages the payload in a temp file.
    /// - Applies the conditional row change inside a transaction.
    /// - Moves any previous payload aside and renames the new one into place.
    /// - Commits, then drops the displaced payload.
    ///
    /// A failed condition, rename or commit leaves both the row and the
    /// payload as they were.
    async fn store_stream<S>(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        stream: S,
        condition: WriteCondition<'_>,
    ) -> StorageResult<StoredObject>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        self.ensure_key_safe(key)?;
        let _guard = self.write_lock.write().await;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let file_path = self.object_path(&bucket_rec.name, key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        let staged = self.stage_payload(&parent, stream).await?;

        let mut tx = match self.db.begin().await {
            Ok(tx) => tx,
            Err(err) => {
                let _ = fs::remove_file(&staged.tmp_path).await;
                return Err(StorageError::Sqlx(err));
            }
        };

        let version_id = Uuid::new_v4().to_string();
        let last_modified = Utc::now();
        let row = match condition {
            WriteCondition::Any => sqlx::query_as::<_, StoredObject>(&format!(
                "INSERT INTO objects ({OBJECT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(bucket_id, key) DO UPDATE SET
                     content_type = excluded.content_type,
                     size_bytes = excluded.size_bytes,
                     etag = excluded.etag,
                     last_modified = excluded.last_modified,
                     version_id = excluded.version_id
                 RETURNING {OBJECT_COLUMNS}"
            ))
            .bind(Uuid::new_v4())
            .bind(bucket_rec.id)
            .bind(key)
            .bind(content_type.clone())
            .bind(staged.size_bytes)
            .bind(&staged.etag)
            .bind(last_modified)
            .bind(&version_id)
            .fetch_one(&mut *tx)
            .await
            .map(Some),
            WriteCondition::Absent => sqlx::query_as::<_, StoredObject>(&format!(
                "INSERT INTO objects ({OBJECT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 RETURNING {OBJECT_COLUMNS}"
            ))
            .bind(Uuid::new_v4())
            .bind(bucket_rec.id)
            .bind(key)
            .bind(content_type.clone())
            .bind(staged.size_bytes)
            .bind(&staged.etag)
            .bind(last_modified)
            .bind(&version_id)
            .fetch_one(&mut *tx)
            .await
            .map(Some),
            WriteCondition::Version(expected) => sqlx::query_as::<_, StoredObject>(&format!(
                "UPDATE objects SET
                     content_type = ?, size_bytes = ?, etag = ?,
                     last_modified = ?, version_id = ?
                 WHERE bucket_id = ? AND key = ? AND version_id = ?
                 RETURNING {OBJECT_COLUMNS}"
            ))
            .bind(content_type.clone())
            .bind(staged.size_bytes)
            .bind(&staged.etag)
            .bind(last_modified)
            .bind(&version_id)
            .bind(bucket_rec.id)
            .bind(key)
            .bind(expected)
            .fetch_optional(&mut *tx)
            .await,
        };

        let object = match row {
            Ok(Some(object)) => object,
            Ok(None) => {
                let _ = fs::remove_file(&staged.tmp_path).await;
                return Err(precondition_failed(bucket, key));
            }
            Err(err) if is_unique_violation(&err) => {
                let _ = fs::remove_file(&staged.tmp_path).await;
                return Err(precondition_failed(bucket, key));
            }
            Err(err) => {
                let _ = fs::remove_file(&staged.tmp_path).await;
                return Err(StorageError::Sqlx(err));
            }
        };

        let displaced = install_payload(&staged.tmp_path, &file_path)
            .await
            .map_err(|err| map_io_error(bucket, key, err))?;

        if let Err(err) = tx.commit().await {
            if let Err(restore_err) = restore_displaced(&file_path, displaced).await {
                warn!(bucket, key, error = %restore_err, "failed to restore previous payload");
            }
            return Err(StorageError::Sqlx(err));
        }
        if let Some(backup) = displaced {
            let _ = fs::remove_file(&backup).await;
        }
        debug!(
            bucket,
            key,
            version = %object.version_id,
            size = object.size_bytes,
            "stored object"
        );
        Ok(object)
    }

    /// Stream-upload an object with overwrite semantics (HTTP PUT).
    pub async fn upload_object_stream<S>(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        stream: S,
    ) -> StorageResult<StoredObject>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        self.store_stream(bucket, key, content_type, stream, WriteCondition::Any)
            .await
    }

    /// Fetch an object for reading.
    ///
    /// Returns the row and an opened File handle ready for streaming out.
    /// Returns ObjectNotFound if the row exists but the payload is missing.
    pub async fn get_object_reader(
        &self,
        bucket: &str,
        key: &str,
    ) -> StorageResult<(StoredObject, File)> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let object = self.fetch_object(&bucket_rec, key).await?;

        let file_path = self.object_path(&bucket_rec.name, key);
        let file = File::open(&file_path)
            .await
            .map_err(|err| map_io_error(bucket, key, err))?;

        Ok((object, file))
    }

    /// Fetch only the object row.
    pub async fn get_object_metadata(
        &self,
        bucket: &str,
        key: &str,
    ) -> StorageResult<StoredObject> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        self.fetch_object(&bucket_rec, key).await
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        self.ensure_key_safe(key)?;
        let _guard = self.write_lock.read().await;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        self.fetch_object(&bucket_rec, key).await?;
        self.read_payload(&bucket_rec, key).await
    }

    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> StorageResult<()> {
        self.store_stream(bucket, key, None, single_chunk(data), WriteCondition::Any)
            .await
            .map(|_| ())
    }

    async fn get_versioned(
        &self,
        bucket: &str,
        key: &str,
    ) -> StorageResult<Option<VersionedObject>> {
        self.ensure_key_safe(key)?;
        let _guard = self.write_lock.read().await;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let object = match self.fetch_object(&bucket_rec, key).await {
            Ok(object) => object,
            Err(err) if err.is_not_found() => return Ok(None),
            Err(err) => return Err(err),
        };
        let data = self.read_payload(&bucket_rec, key).await?;
        Ok(Some(VersionedObject {
            data,
            version: object.version_id,
        }))
    }

    async fn put_if_match(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        expected: Option<&str>,
    ) -> StorageResult<String> {
        let condition = match expected {
            Some(version) => WriteCondition::Version(version),
            None => WriteCondition::Absent,
        };
        let object = self
            .store_stream(bucket, key, None, single_chunk(data), condition)
            .await?;
        Ok(object.version_id)
    }
}

fn single_chunk(data: Bytes) -> impl Stream<Item = io::Result<Bytes>> + Send {
    futures::stream::once(futures::future::ready(Ok(data)))
}

/// Rename `tmp_path` over `file_path`, moving any previous payload aside.
///
/// Returns where the previous payload went. On error the previous payload
/// is back at `file_path` and the temp file is removed.
async fn install_payload(tmp_path: &Path, file_path: &Path) -> io::Result<Option<PathBuf>> {
    let backup = file_path
        .parent()
        .map(|dir| dir.join(format!(".bak-{}", Uuid::new_v4())))
        .ok_or_else(|| io::Error::new(ErrorKind::Other, "object path missing parent directory"))?;

    let displaced = match fs::rename(file_path, &backup).await {
        Ok(()) => Some(backup),
        Err(err) if err.kind() == ErrorKind::NotFound => None,
        Err(err) => {
            let _ = fs::remove_file(tmp_path).await;
            return Err(err);
        }
    };

    if let Err(err) = fs::rename(tmp_path, file_path).await {
        let _ = fs::remove_file(tmp_path).await;
        if let Some(backup) = &displaced {
            let _ = fs::rename(backup, file_path).await;
        }
        return Err(err);
    }
    Ok(displaced)
}

/// Undo [`install_payload`]: drop the new payload and put the displaced one back.
async fn restore_displaced(file_path: &Path, displaced: Option<PathBuf>) -> io::Result<()> {
    match displaced {
        Some(backup) => fs::rename(&backup, file_path).await,
        None => match fs::remove_file(file_path).await {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        },
    }
}

fn precondition_failed(bucket: &str, key: &str) -> StorageError {
    StorageError::PreconditionFailed {
        bucket: bucket.to_string(),
        key: key.to_string(),
    }
}

/// Map filesystem errors on a payload to gateway errors.
fn map_io_error(bucket: &str, key: &str, err: io::Error) -> StorageError {
    match err.kind() {
        ErrorKind::NotFound => StorageError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        },
        ErrorKind::PermissionDenied => StorageError::AccessDenied {
            bucket: bucket.to_string(),
            key: key.to_string(),
            reason: err.to_string(),
        },
        _ => StorageError::Io(err),
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    parts.iter().all(|segment| {
        !segment.is_empty()
            && segment.len() <= 3
            && segment.chars().all(|c| c.is_ascii_digit())
            && segment.parse::<u8>().is_ok()
    })
}
