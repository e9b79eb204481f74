use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::models::scan::ScanRecord;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub patient_id: Option<String>,
}

/// `GET /history?patient_id=`: newest first, at most 100 scans.
pub async fn list(
    State(ctx): State<ApiContext>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ScanRecord>>, ApiError> {
    let patient_id = query
        .patient_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty());
    let scans = ctx.store.history(patient_id).await?;
    Ok(Json(scans))
}
