//! API error types with structured JSON responses.

use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::db::DatabaseError;
use crate::pipeline::analysis::AnalysisError;
use crate::pipeline::preprocess::PreprocessError;
use crate::report::ReportError;

/// Error envelope: `{"status":"error","error":{"code":..,"message":..}}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: &'static str,
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Invalid image: {0}")]
    InvalidImage(String),
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("Inference failed: {0}")]
    InferenceFailed(String),
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Report generation failed: {0}")]
    ReportFailed(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidImage(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::ModelUnavailable(_) | ApiError::StorageUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InferenceFailed(_) | ApiError::ReportFailed(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::InvalidImage(_) => "INVALID_IMAGE",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::ModelUnavailable(_) => "MODEL_UNAVAILABLE",
            ApiError::InferenceFailed(_) => "INFERENCE_FAILED",
            ApiError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::ReportFailed(_) => "REPORT_FAILED",
            ApiError::Internal(_) => "INTERNAL",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let message = match &self {
            ApiError::BadRequest(detail)
            | ApiError::InvalidImage(detail)
            | ApiError::PayloadTooLarge(detail)
            | ApiError::NotFound(detail) => detail.clone(),
            // Server-side failures: log the detail, send a generic message.
            ApiError::ModelUnavailable(detail) => {
                tracing::error!(detail = %detail, "Classifier could not be loaded");
                "The diagnostic model is not available".to_string()
            }
            ApiError::InferenceFailed(detail) => {
                tracing::error!(detail = %detail, "Inference failed");
                "The image could not be analyzed".to_string()
            }
            ApiError::StorageUnavailable(detail) => {
                tracing::error!(detail = %detail, "Storage failure");
                "Storage is temporarily unavailable".to_string()
            }
            ApiError::ReportFailed(detail) => {
                tracing::error!(detail = %detail, "Report generation failed");
                "The report could not be generated".to_string()
            }
            ApiError::Internal(detail) => {
                tracing::error!(detail = %detail, "API internal error");
                "An internal error occurred".to_string()
            }
        };

        let body = ErrorBody {
            status: "error",
            error: ErrorDetail { code, message },
        };
        (status, Json(body)).into_response()
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound { entity_type, id } => {
                ApiError::NotFound(format!("{entity_type} {id} not found"))
            }
            other => ApiError::StorageUnavailable(other.to_string()),
        }
    }
}

impl From<AnalysisError> for ApiError {
    fn from(err: AnalysisError) -> Self {
        match err {
            AnalysisError::InvalidImage(PreprocessError::Empty) => {
                ApiError::BadRequest("Uploaded file is empty".into())
            }
            AnalysisError::InvalidImage(e @ PreprocessError::TooLarge { .. }) => {
                ApiError::PayloadTooLarge(e.to_string())
            }
            AnalysisError::InvalidImage(e) => ApiError::InvalidImage(e.to_string()),
            AnalysisError::ModelUnavailable(e) => ApiError::ModelUnavailable(e.to_string()),
            AnalysisError::Inference(e) => ApiError::InferenceFailed(e.to_string()),
            AnalysisError::Upload(e) => ApiError::StorageUnavailable(e.to_string()),
            AnalysisError::Storage(e) => ApiError::StorageUnavailable(e.to_string()),
            AnalysisError::Task(e) => ApiError::Internal(e),
        }
    }
}

impl From<ReportError> for ApiError {
    fn from(err: ReportError) -> Self {
        ApiError::ReportFailed(err.to_string())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(err.body_text())
        } else {
            ApiError::BadRequest(err.body_text())
        }
    }
}
