//! HTTP handlers for object reads and writes.
//! Streams object bodies to avoid buffering in memory and delegates storage
//! concerns to `LocalObjectStore`. A PUT into the source bucket also kicks
//! off a one-object upload invocation in the background.

use crate::{
    errors::AppError,
    models::{event::UploadNotification, object::StoredObject},
    state::AppState,
};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use std::io;
use tokio_util::io::ReaderStream;
use tracing::{error, info};

/// Upload an object to `/{bucket}/{*key}`.
pub async fn upload_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));

    let object = state
        .storage
        .upload_object_stream(&bucket, &key, content_type, stream)
        .await?;

    if bucket == state.processor.source_bucket() {
        dispatch_upload(&state, &object);
    }

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", object.etag)) {
        response.headers_mut().insert(header::ETAG, value);
    }
    Ok(response)
}

/// Run the upload invocation for one freshly stored source object.
fn dispatch_upload(state: &AppState, object: &StoredObject) {
    let processor = state.processor.clone();
    let notification =
        UploadNotification::new(object.key.clone(), object.size_bytes.max(0) as u64);

    tokio::spawn(async move {
        let key = notification.object_key.clone();
        match processor.process_batch(vec![notification]).await {
            Ok(report) => info!(
                key = %key,
                thumbnails = report.thumbnails,
                "upload notification processed"
            ),
            Err(err) => error!(key = %key, error = %err, "upload notification failed"),
        }
    });
}

/// Download an object `/{bucket}/{*key}` as a streaming response.
pub async fn get_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let (meta, file) = state.storage.get_object_reader(&bucket, &key).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta);

    Ok(response)
}

/// HEAD `/{bucket}/{*key}`: same headers as GET but no body.
pub async fn head_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let meta = state.storage.get_object_metadata(&bucket, &key).await?;
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta);

    Ok(response)
}

fn set_object_headers(headers: &mut HeaderMap, meta: &StoredObject) {
    let content_type = meta
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".into());
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(meta.size_bytes.max(0) as u64),
    );

    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", meta.etag)) {
        headers.insert(header::ETAG, value);
    }

    if let Ok(value) = HeaderValue::from_str(&meta.last_modified.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn stored(content_type: Option<&str>) -> StoredObject {
        StoredObject {
            id: Uuid::new_v4(),
            bucket_id: Uuid::new_v4(),
            key: "photos/cat.png".into(),
            content_type: content_type.map(str::to_string),
            size_bytes: 42,
            etag: "abc123".into(),
            last_modified: Utc.timestamp_opt(1684000000, 0).unwrap(),
            version_id: "v1".into(),
        }
    }

    #[test]
    fn object_headers_describe_the_stored_row() {
        let mut headers = HeaderMap::new();
        set_object_headers(&mut headers, &stored(Some("image/png")));

        assert_eq!(headers[header::CONTENT_TYPE], "image/png");
        assert_eq!(headers[header::CONTENT_LENGTH], "42");
        assert_eq!(headers[header::ETAG], "\"abc123\"");
        assert_eq!(
            headers[header::LAST_MODIFIED],
            "Sat, 13 May 2023 17:46:40 +0000"
        );
    }

    #[test]
    fn missing_content_type_defaults_to_octet_stream() {
        let mut headers = HeaderMap::new();
        set_object_headers(&mut headers, &stored(None));
        assert_eq!(headers[header::CONTENT_TYPE], "application/octet-stream");
    }
}
