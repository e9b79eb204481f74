use axum::extract::State;
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::models::patient::PatientSummary;

/// `GET /patients`: one entry per known mobile number, most recent first.
pub async fn list(State(ctx): State<ApiContext>) -> Result<Json<Vec<PatientSummary>>, ApiError> {
    Ok(Json(ctx.store.roster().await?))
}
