use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::report::{generate_report, load_scan_image, report_file_name, ReportError};

/// `GET /report/:scan_id`: PDF attachment for a stored scan.
pub async fn download(
    State(ctx): State<ApiContext>,
    Path(scan_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = Uuid::parse_str(scan_id.trim())
        .map_err(|_| ApiError::NotFound(format!("Scan {scan_id} not found")))?;
    let record = ctx.store.get_scan(id).await?;

    let image_path = record
        .stored_file_name()
        .map(|name| ctx.config.uploads_dir.join(name));

    let file_name = report_file_name(&record);
    let pdf = tokio::task::spawn_blocking(move || {
        let image = image_path.as_deref().and_then(load_scan_image);
        generate_report(&record, image.as_ref())
    })
    .await
    .map_err(|e| ReportError::Task(e.to_string()))??;

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={file_name}"),
            ),
        ],
        pdf,
    )
        .into_response())
}
