//! HTTP surface of the service.
//!
//! ```text
//! POST /convert-image   file, target_format  → converted.<target>
//! POST /image-to-pdf    file                 → converted.pdf
//! POST /pdf-to-image    file, target_format  → converted.<target>   (page 1)
//! GET  /conversions     ?limit=N             → recent conversion records
//! GET  /health                               → liveness + rasterizer status
//! ```

pub mod handlers;
pub mod routes;
pub mod state;
pub mod upload;

pub use routes::build_router;
pub use state::AppState;

use crate::error::ConvertError;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Serve `state` on `listener` until Ctrl+C or SIGTERM.
///
/// Starts the periodic workspace sweep when one is configured, and flushes
/// and closes the conversion log once in-flight requests have drained.
pub async fn serve(state: AppState, listener: TcpListener) -> Result<(), ConvertError> {
    let app = build_router(state.clone())?;

    let sweeper = state.config().sweep_interval().map(|every| {
        let workspace = state.workspace().clone();
        let max_age = state.config().max_file_age();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                workspace.sweep(max_age).await;
            }
        })
    });

    let addr = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "<unknown>".into());
    info!(
        addr = %addr,
        pdf_rasterizer = state.rasterizer().is_some(),
        cleanup = ?state.config().cleanup,
        "Server ready and accepting connections"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ConvertError::Internal(format!("server error: {e}")));

    if let Some(task) = sweeper {
        task.abort();
    }
    state.store().close().await;
    info!("Conversion log closed");
    served
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }
    info!("Shutting down gracefully...");
}
