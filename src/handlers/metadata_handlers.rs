//! `GET /metadata?start=&end=`: the deduplicated metadata collection.

use crate::{
    errors::AppError,
    models::record::ObjectRecord,
    services::metadata_store::TimeFilter,
    state::AppState,
};
use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct MetadataQuery {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl MetadataQuery {
    /// Both bounds or neither. A negative bound selects everything.
    fn filter(&self) -> Result<TimeFilter, AppError> {
        match (self.start, self.end) {
            (None, None) => Ok(TimeFilter::All),
            (Some(start), Some(end)) => Ok(TimeFilter::from_bounds(start, end)),
            _ => Err(AppError::bad_request(
                "`start` and `end` must be given together",
            )),
        }
    }
}

pub async fn list_metadata(
    State(state): State<AppState>,
    Query(query): Query<MetadataQuery>,
) -> Result<Json<Vec<ObjectRecord>>, AppError> {
    let records = state.metadata.read_filtered(query.filter()?).await?;
    Ok(Json(records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::metadata_store::TimeWindow;
    use axum::http::StatusCode;

    fn query(start: Option<i64>, end: Option<i64>) -> MetadataQuery {
        MetadataQuery { start, end }
    }

    #[test]
    fn no_bounds_means_no_filter() {
        assert_eq!(MetadataQuery::default().filter().unwrap(), TimeFilter::All);
    }

    #[test]
    fn both_bounds_build_a_window() {
        assert_eq!(
            query(Some(10), Some(20)).filter().unwrap(),
            TimeFilter::Window(TimeWindow::new(10, 20))
        );
    }

    #[test]
    fn negative_bound_is_the_no_filter_sentinel() {
        assert_eq!(query(Some(-1), Some(-1)).filter().unwrap(), TimeFilter::All);
    }

    #[test]
    fn single_bound_is_rejected() {
        let err = query(Some(10), None).filter().unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}
