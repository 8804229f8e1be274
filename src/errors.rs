use crate::services::{
    digest::DigestError, metadata_store::MetadataError, object_store::StorageError,
    upload_processor::ProcessError,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        let status = match &err {
            StorageError::BucketNotFound(_) | StorageError::ObjectNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            StorageError::InvalidBucketName { .. }
            | StorageError::UnsupportedRegion(_)
            | StorageError::InvalidObjectKey => StatusCode::BAD_REQUEST,
            StorageError::AccessDenied { .. } => StatusCode::FORBIDDEN,
            StorageError::PreconditionFailed { .. } => StatusCode::PRECONDITION_FAILED,
            StorageError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            StorageError::Sqlx(_) | StorageError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError::new(status, err.to_string())
    }
}

impl From<MetadataError> for AppError {
    fn from(err: MetadataError) -> Self {
        let status = match &err {
            MetadataError::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            MetadataError::Conflict { .. } => StatusCode::CONFLICT,
            MetadataError::CorruptData { .. } | MetadataError::SerializationFailure(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError::new(status, err.to_string())
    }
}

impl From<ProcessError> for AppError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::EmptyBatch => AppError::bad_request(err.to_string()),
            ProcessError::Metadata(inner) => inner.into(),
        }
    }
}

impl From<DigestError> for AppError {
    fn from(err: DigestError) -> Self {
        match err {
            DigestError::Metadata(inner) => inner.into(),
            DigestError::Delivery(inner) => AppError::new(StatusCode::BAD_GATEWAY, inner.to_string()),
            err @ DigestError::WindowOutOfRange { .. } => {
                AppError::new(StatusCode::BAD_REQUEST, err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::mailer::DeliveryError;

    #[test]
    fn storage_errors_map_to_http_statuses() {
        let missing = StorageError::ObjectNotFound {
            bucket: "b".into(),
            key: "k".into(),
        };
        assert_eq!(AppError::from(missing).status, StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::from(StorageError::InvalidObjectKey).status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(StorageError::Unavailable("down".into())).status,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn empty_batch_is_a_bad_request() {
        let err = AppError::from(ProcessError::EmptyBatch);
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "no object information received in upload event");
    }

    #[test]
    fn metadata_errors_keep_their_meaning_through_wrappers() {
        let conflict = MetadataError::Conflict {
            bucket: "m".into(),
            key: "metadata.json".into(),
            attempts: 3,
        };
        assert_eq!(
            AppError::from(ProcessError::Metadata(conflict)).status,
            StatusCode::CONFLICT
        );

        let unavailable = MetadataError::StoreUnavailable {
            bucket: "m".into(),
            key: "metadata.json".into(),
            source: StorageError::Unavailable("down".into()),
        };
        assert_eq!(
            AppError::from(DigestError::Metadata(unavailable)).status,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn out_of_range_digest_time_is_a_bad_request() {
        let err = DigestError::WindowOutOfRange {
            now: chrono::DateTime::<chrono::Utc>::MIN_UTC,
        };
        assert_eq!(AppError::from(err).status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn delivery_failure_is_a_bad_gateway() {
        let err = DigestError::Delivery(DeliveryError::Transport("refused".into()));
        assert_eq!(AppError::from(err).status, StatusCode::BAD_GATEWAY);
    }
}
