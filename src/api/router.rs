//! Route table.
//!
//! Layers (outermost → innermost): request tracing → CORS → body limit → handler.
//! NOTE: Path params use `:param` syntax (matchit 0.7 / axum 0.7).

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::api::endpoints;
use crate::api::types::ApiContext;

pub fn api_router(ctx: ApiContext) -> Router {
    let uploads = ServeDir::new(&ctx.config.uploads_dir);
    let body_limit = ctx.config.max_upload_bytes;

    Router::new()
        .route("/", get(endpoints::health::status))
        .route("/analyze", post(endpoints::analyze::analyze))
        .route("/report/:scan_id", get(endpoints::report::download))
        .route("/history", get(endpoints::history::list))
        .route("/patients", get(endpoints::patients::list))
        .nest_service("/uploads", uploads)
        .with_state(ctx)
        .layer(DefaultBodyLimit::max(body_limit))
        // Browser frontend is served from another origin.
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
