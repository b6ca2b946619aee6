pub mod handlers;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::ApiState;

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/peers", get(handlers::handle_peers))
        .route("/status", get(handlers::handle_status))
        .route("/version", get(handlers::handle_version))
        .with_state(state)
        .layer(cors)
}

/// Bind `0.0.0.0:port` and serve until `shutdown` fires.
pub async fn serve(state: ApiState, port: u16, shutdown: CancellationToken) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "API listening on 0.0.0.0");
    serve_on(listener, state, shutdown).await
}

/// Serve on an already bound listener.
pub async fn serve_on(
    listener: TcpListener,
    mut state: ApiState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    // Open streams must end for graceful shutdown to complete.
    state.shutdown = shutdown.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled_owned().await })
        .await?;
    tracing::info!("API stopped");
    Ok(())
}
