//! The HTTP surface (§6 "HTTP surface (additive, ambient)"): a small
//! `axum::Router` exposing `GET /healthz` for liveness probing and
//! `GET /ws` for the WebSocket upgrade. Everything past the upgrade is
//! the session layer's business (`crate::session::handle_socket`); this
//! module only owns accepting the connection and handing it off.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};

use crate::session::{handle_socket, AppState};

use super::logging::log_requests;

async fn healthz(State(app): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "sources": app.search.all_sources(),
    }))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(app): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(app, socket))
}

/// Builds the process-wide router. `AppState` is injected as typed
/// `axum::extract::State` rather than an `Extension`, matching the
/// teacher's preference for state the handlers actually depend on to be
/// visible in their signatures.
pub fn build_router(app: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/ws", get(ws_upgrade))
        .layer(middleware::from_fn(log_requests))
        .layer(cors)
        .with_state(app)
}
