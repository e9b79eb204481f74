//! Liveness/status endpoint.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::api::types::ApiContext;
use crate::models::enums::WeightsBasis;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub message: &'static str,
    pub version: &'static str,
    pub model_loaded: bool,
    /// `null` until the first analysis loads the model.
    pub weights_basis: Option<WeightsBasis>,
}

/// `GET /`: service status. Never triggers a model load.
pub async fn status(State(ctx): State<ApiContext>) -> Json<StatusResponse> {
    Json(StatusResponse {
        message: "RetiNet API is running",
        version: crate::config::APP_VERSION,
        model_loaded: ctx.classifier.is_loaded(),
        weights_basis: ctx.classifier.weights_basis(),
    })
}
