//! HTTP API for the screening service.
//!
//! JSON endpoints for analysis, history and the patient roster, a PDF
//! report download, and static serving of uploaded scans under `/uploads`.
//! `api_router()` returns a `Router` that can be mounted on any axum server.

pub mod endpoints;
pub mod error;
pub mod router;
pub mod server;
pub mod types;

pub use error::ApiError;
pub use router::api_router;
pub use server::{serve, start_api_server, ApiServer, ServerError};
pub use types::ApiContext;
