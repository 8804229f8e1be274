//! Represents a logical bucket: a top-level container for objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A storage bucket in the local gateway.
///
/// The service provisions its source, thumbnail and metadata buckets at
/// startup; nothing else creates or removes them.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    /// Unique identifier for this bucket (UUID for internal DB use).
    pub id: Uuid,

    /// Bucket name (must conform to DNS naming rules).
    pub name: String,

    /// Region the bucket is provisioned in (e.g. "us-west-2").
    pub region: String,

    /// When this bucket was created.
    pub created_at: DateTime<Utc>,
}
