//! Trigger adapter: one HTTP request is one invocation.
//!
//! - POST /events/upload  -> upload invocation for the batch in the body
//! - POST /events/digest  -> digest invocation for the previous UTC day

use crate::{
    errors::AppError,
    models::event::UploadEvent,
    services::{digest::DigestReport, upload_processor::BatchReport},
    state::AppState,
};
use axum::{Json, extract::State};
use chrono::Utc;

/// `POST /events/upload`
pub async fn process_upload(
    State(state): State<AppState>,
    Json(event): Json<UploadEvent>,
) -> Result<Json<BatchReport>, AppError> {
    let report = state
        .processor
        .process_batch(event.into_notifications())
        .await?;
    Ok(Json(report))
}

/// `POST /events/digest`
///
/// The body, if any, is ignored.
pub async fn run_digest(State(state): State<AppState>) -> Result<Json<DigestReport>, AppError> {
    let report = state.digest.run(Utc::now()).await?;
    Ok(Json(report))
}
