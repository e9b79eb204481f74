pub mod api;
pub mod config;
pub mod db;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod training;

use tracing_subscriber::EnvFilter;

use crate::api::{ApiContext, ServerError};
use crate::config::ServiceConfig;
use crate::db::ScanStore;

/// Install the global `tracing` subscriber (`RUST_LOG` overrides the default filter).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init();
}

/// Run the HTTP service until Ctrl-C.
pub async fn run() -> Result<(), ServerError> {
    init_tracing();
    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let config = ServiceConfig::from_env();
    tracing::info!(
        db = %config.database_path.display(),
        uploads = %config.uploads_dir.display(),
        weights = %config.weights_path.display(),
        "Service configuration"
    );

    let store = ScanStore::open(&config.database_path)?;
    let addr = config.bind_addr;
    let ctx = ApiContext::new(config, store);

    api::serve(ctx, addr, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Cannot listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown requested");
    })
    .await
}
