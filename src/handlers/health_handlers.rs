//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness: SQLite, payload disk and the metadata record

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::BTreeMap, path::Path};
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
///
/// Cheap liveness probe; never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// 200 when every check passes, 503 otherwise. The body lists each check.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();
    checks.insert("sqlite", check_sqlite(&state).await);
    checks.insert("disk", check_disk(&state.storage.base_path).await);
    checks.insert("metadata", check_metadata(&state).await);

    let ready = checks.values().all(|c| c.ok);
    let body = ReadyResponse {
        status: if ready { "ok".into() } else { "error".into() },
        checks,
    };
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn check_sqlite(state: &AppState) -> CheckStatus {
    match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*state.storage.db)
        .await
    {
        Ok(1) => CheckStatus::ok(),
        Ok(v) => CheckStatus::failed(format!("unexpected result: {}", v)),
        Err(e) => CheckStatus::failed(format!("error: {}", e)),
    }
}

/// Write, read back and remove a probe file under the payload root.
async fn check_disk(base_path: &Path) -> CheckStatus {
    let probe = base_path.join(format!(".readyz-{}", Uuid::new_v4()));
    let result = match fs::write(&probe, b"readyz").await {
        Ok(()) => match fs::read(&probe).await {
            Ok(bytes) if bytes == b"readyz" => CheckStatus::ok(),
            Ok(_) => CheckStatus::failed("file content mismatch"),
            Err(e) => CheckStatus::failed(format!("could not read probe file: {}", e)),
        },
        Err(e) => return CheckStatus::failed(format!("could not write probe file: {}", e)),
    };
    let _ = fs::remove_file(&probe).await;
    result
}

/// The metadata record must exist and decode.
async fn check_metadata(state: &AppState) -> CheckStatus {
    match state.metadata.read_raw().await {
        Ok(_) => CheckStatus::ok(),
        Err(e) => CheckStatus::failed(e.to_string()),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disk_check_passes_on_writable_dir_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();

        let status = check_disk(dir.path()).await;

        assert!(status.ok);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn disk_check_fails_on_missing_dir() {
        let dir = tempfile::tempdir().unwrap();

        let status = check_disk(&dir.path().join("gone")).await;

        assert!(!status.ok);
        assert!(status.error.unwrap().starts_with("could not write probe file"));
    }
}
