//! Route definitions

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::HttpConfig;
use crate::AppState;

use super::api;

/// Create the main router with all routes
pub fn create_router(app_state: Arc<AppState>, config: &HttpConfig) -> Router {
    let cors = if config.cors_enabled {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
    };

    Router::new()
        // Host surface
        .route("/api/command/:name", post(api::run_command))
        .route("/api/lifecycle/:event", post(api::lifecycle_event))
        // Monitoring
        .route("/api/status", get(api::get_status))
        .route("/api/config", get(api::get_config))
        .route("/api/overlay", get(api::get_overlay))
        .route("/api/overlay/box", post(api::draw_box))
        .route("/api/overlay/stream", get(api::overlay_stream))
        // Middleware
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
