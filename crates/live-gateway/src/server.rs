//! Axum-based HTTP and WebSocket server.

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::Utc;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::connection::handle_live_connection;
use crate::state::GatewayState;

/// Build the gateway router.
///
/// The live endpoint and `/health` are registered first so they take
/// priority over the embedded asset routes.
pub fn router(state: Arc<GatewayState>) -> Router {
    let live_path = state.config.live_path();
    let serve_assets = state.config.serve_assets();

    let app = Router::new()
        .route(&live_path, get(ws_handler))
        .route("/health", get(health_handler));

    #[cfg(feature = "metrics")]
    let app = app.route("/metrics", get(metrics_handler));

    let mut app = app.with_state(state);

    if serve_assets {
        app = app.merge(live_web::assets_router());
    }

    app.layer(TraceLayer::new_for_http())
}

/// Start the gateway on the configured address and serve until Ctrl-C.
pub async fn start_gateway(state: Arc<GatewayState>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.bind(), state.config.port());
    let listener = TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");

    if state.config.serve_assets() {
        info!("Client assets available at http://{addr}/");
    }

    serve(listener, state, shutdown_signal()).await
}

/// Serve on `listener` until `shutdown` resolves, then cancel every live
/// page and wait for in-flight requests.
pub async fn serve<F>(listener: TcpListener, state: Arc<GatewayState>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state.clone());
    let closing = state.clone();

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            let pages = closing.close_all().await;
            info!(pages, "Closing live pages");
        })
        .await?;

    Ok(())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_live_connection(state, socket))
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let version = env!("CARGO_PKG_VERSION");
    let connections = state.connection_count().await;
    let uptime = (Utc::now() - state.started_at).num_seconds();

    axum::Json(json!({
        "status": "ok",
        "version": version,
        "connections": connections,
        "uptime_secs": uptime,
        "path": state.config.live_path(),
    }))
}

#[cfg(feature = "metrics")]
async fn metrics_handler() -> impl IntoResponse {
    use axum::http::StatusCode;

    match crate::metrics::render() {
        Some(body) => (StatusCode::OK, body),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed".to_string()),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(%e, "Failed to listen for Ctrl-C, running until killed");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
