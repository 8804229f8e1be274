//! Core data models.
//!
//! `bucket` and `object` map to the local gateway's SQLite tables via
//! `sqlx::FromRow`. `record` is the entry type of the shared metadata blob
//! and `event` is what the trigger hands to an upload invocation.

pub mod bucket;
pub mod event;
pub mod object;
pub mod record;
