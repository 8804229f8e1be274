//! Defines the HTTP surface.
//!
//! ## Structure
//! - **Invocation triggers**
//!   - `POST /events/upload`: run one upload invocation for a batch
//!   - `POST /events/digest`: send the digest for the previous day
//!
//! - **Metadata**
//!   - `GET  /metadata?start=&end=`: deduplicated records, optionally windowed
//!
//! - **Object-level endpoints** (where source and thumbnail URIs resolve)
//!   - `PUT  /{bucket}/{*key}`: upload object
//!   - `GET  /{bucket}/{*key}`: download object
//!   - `HEAD /{bucket}/{*key}`: retrieve headers only
//!
//! The wildcard `*key` allows nested keys like `photos/2025/img.jpg`.

use crate::{
    handlers::{
        event_handlers::{process_upload, run_digest},
        health_handlers::{healthz, readyz},
        metadata_handlers::list_metadata,
        object_handlers::{get_object, head_object, upload_object},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Build the router. Handlers share [`AppState`].
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/events/upload", post(process_upload))
        .route("/events/digest", post(run_digest))
        .route("/metadata", get(list_metadata))
        .route(
            "/{bucket}/{*key}",
            put(upload_object).get(get_object).head(head_object),
        )
}
