//! API server lifecycle.
//!
//! Two entry points share one pattern, bind → build router → serve with a
//! graceful-shutdown future:
//! - `serve` runs in the foreground until the given future resolves (the binary).
//! - `start_api_server` spawns a background task and returns a handle with a
//!   shutdown channel (embedding, tests).

use std::future::Future;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::api::router::api_router;
use crate::api::types::ApiContext;
use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("Storage unavailable: {0}")]
    Storage(#[from] DatabaseError),

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),

    #[error("Cannot prepare uploads directory: {0}")]
    Uploads(#[source] std::io::Error),
}

/// Handle to a running background server.
pub struct ApiServer {
    pub local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl ApiServer {
    /// Shut down the server gracefully. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            tracing::info!(addr = %self.local_addr, "API server shutdown signal sent");
        }
    }
}

impl Drop for ApiServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn bind(
    ctx: &ApiContext,
    addr: SocketAddr,
) -> Result<(TcpListener, SocketAddr), ServerError> {
    // ServeDir answers 404 for everything when the root is missing.
    tokio::fs::create_dir_all(&ctx.config.uploads_dir)
        .await
        .map_err(ServerError::Uploads)?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    let local_addr = listener
        .local_addr()
        .map_err(|source| ServerError::Bind { addr, source })?;
    Ok((listener, local_addr))
}

/// Serve in the foreground until `shutdown` resolves.
pub async fn serve<F>(ctx: ApiContext, addr: SocketAddr, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (listener, local_addr) = bind(&ctx, addr).await?;
    let app = api_router(ctx);

    tracing::info!(addr = %local_addr, "RetiNet API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(ServerError::Serve)?;
    tracing::info!("RetiNet API stopped");
    Ok(())
}

/// Bind `addr` (port 0 picks an ephemeral port) and serve in a background task.
pub async fn start_api_server(ctx: ApiContext, addr: SocketAddr) -> Result<ApiServer, ServerError> {
    let (listener, local_addr) = bind(&ctx, addr).await?;
    let app = api_router(ctx);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let shutdown_signal = async move {
            let _ = shutdown_rx.await;
            tracing::info!("API server received shutdown signal");
        };

        tracing::info!(addr = %local_addr, "API server started");

        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
        {
            tracing::error!(error = %e, "API server error");
        }

        tracing::info!("API server stopped");
    });

    Ok(ApiServer {
        local_addr,
        shutdown_tx: Some(shutdown_tx),
    })
}
