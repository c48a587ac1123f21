pub mod buffer;
pub mod config;
pub mod cursor;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod resource;
pub mod rpc;
pub mod session;
pub mod snapshot;
pub mod state;

pub use state::AppState;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Builds the full router: the JSON-RPC endpoint, the agent WebSocket
/// upgrade, and the two ambient operational endpoints (spec §6.1, §4.L).
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/mcp", post(mcp_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/cleanup-connections", post(cleanup_connections_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn mcp_handler(State(state): State<AppState>, Json(request): Json<rpc::JsonRpcRequest>) -> impl IntoResponse {
    match rpc::handle_request(request, &state).await {
        Some(response) => Json(response).into_response(),
        None => axum::http::StatusCode::NO_CONTENT.into_response(),
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        session::run_session(
            socket,
            state.config.clone(),
            state.sessions.clone(),
            state.pending.clone(),
            state.snapshots.clone(),
        )
        .await;
    })
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let connections = state.active_connection_count().await;
    Json(serde_json::json!({
        "status": "ok",
        "connections": connections,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "port": state.config.bind_addr.port(),
    }))
}

async fn cleanup_connections_handler(State(state): State<AppState>) -> impl IntoResponse {
    let active = state.sweep_stale_sessions().await;
    Json(serde_json::json!({ "active": active })) as Json<Value>
}

/// Runs the shared periodic sweep for stale sessions and stale cursors
/// (spec §5, "one shared periodic sweep task"). Cursor staleness is swept
/// lazily on access (§4.B); this task only needs to drive the session
/// side.
pub async fn spawn_sweep_task(state: AppState) {
    let interval = state.sweep_interval();
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let active = state.sweep_stale_sessions().await;
        info!(active, "stale-session sweep completed");
    }
}
