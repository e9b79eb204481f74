use axum::extract::{Multipart, State};
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::{AnalyzeResponse, ApiContext};
use crate::pipeline::analysis::AnalysisRequest;

/// `POST /analyze`: multipart `file`, optional `patient_name` and `mobile_number`.
pub async fn analyze(
    State(ctx): State<ApiContext>,
    mut multipart: Multipart,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let mut request = AnalysisRequest::default();
    let mut has_file = false;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                request.file_name = field.file_name().map(str::to_string);
                request.bytes = field.bytes().await?.to_vec();
                has_file = true;
            }
            "patient_name" => request.patient_name = Some(field.text().await?),
            "mobile_number" => request.mobile_number = Some(field.text().await?),
            other => {
                tracing::debug!(field = other, "Ignoring unknown multipart field");
            }
        }
    }

    if !has_file {
        return Err(ApiError::BadRequest("Missing 'file' field".into()));
    }

    let outcome = ctx.analysis.analyze(request).await?;
    Ok(Json(AnalyzeResponse::from(outcome)))
}
