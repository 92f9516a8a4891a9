use std::net::SocketAddr;

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::decompression::RequestDecompressionLayer;
use tracing::info;

use super::{
    services::{
        cancel_worker, delete_worker, get_settings, health, list_workers, metrics,
        put_settings, start_worker,
    },
    state::AppState,
};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/workers", get(list_workers))
        .route("/workers/{id}/start", post(start_worker))
        .route("/workers/{id}/cancel", post(cancel_worker))
        .route("/workers/{id}", delete(delete_worker))
        .route("/settings", get(get_settings))
        .route("/settings", put(put_settings))
        .route("/metrics", get(metrics))
        .with_state(state)
        // Accept gzip/deflate/brotli request bodies transparently.
        .layer(RequestDecompressionLayer::new())
}

/// Serve the control surface until the shutdown token fires or a signal
/// arrives. Cancels the token on signal so the scheduler stops with us.
pub async fn run(
    state: AppState,
    address: SocketAddr,
    shutdown: CancellationToken,
) -> Result<(), AnyError> {
    let app = router(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "ChapterBox API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = shutdown.cancelled() => {},
    }

    shutdown.cancel();
    info!("Shutdown signal received");
}
