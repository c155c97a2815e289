// Module: http
// WebSocket signaling, status endpoints and receiver assets

pub mod error;
pub mod health;
pub mod status;
pub mod websocket;

use axum::{
    routing::{get, post},
    Router,
};
use dashcast_cast::DeviceRegistry;
use dashcast_core::Config;
use dashcast_relay::SignalingRelay;
use dashcast_stream::StreamTable;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<SignalingRelay>,
    /// Absent when no cast bridge is configured
    pub registry: Option<Arc<DeviceRegistry>>,
    pub streams: Arc<StreamTable>,
    pub config: Arc<Config>,
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let assets = ServeDir::new(&state.config.server.static_dir);

    Router::new()
        .route("/ws", get(websocket::websocket_handler))
        .route("/api/status", get(status::get_status))
        .route("/api/devices/{host}/reset", post(status::reset_device))
        .merge(health::create_health_router())
        .fallback_service(assets)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
