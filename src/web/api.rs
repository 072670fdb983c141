//! REST API endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::coordinator::{CommandReply, LifecycleEvent, LifecycleState, PipelineStatus};
use crate::inference::DetectorMode;
use crate::render::{BoundingBox, DrawCommand, OverlayFrameState};
use crate::AppState;

use super::sse;

/// API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

impl ApiResponse<()> {
    pub fn error(message: &str) -> Json<Self> {
        Json(Self {
            success: false,
            data: None,
            error: Some(message.to_string()),
        })
    }

    pub fn ok() -> Json<Self> {
        Json(Self {
            success: true,
            data: None,
            error: None,
        })
    }
}

/// Run a named host command
pub async fn run_command(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.coordinator.command(&name).await {
        Ok(CommandReply::Success) => (StatusCode::OK, ApiResponse::<()>::ok()),
        Ok(CommandReply::Busy) => (
            StatusCode::CONFLICT,
            ApiResponse::<()>::error("A capture is already in flight"),
        ),
        Ok(CommandReply::NotImplemented) => (
            StatusCode::NOT_IMPLEMENTED,
            ApiResponse::<()>::error(&format!("Unknown command: {}", name)),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            ApiResponse::<()>::error(&e.to_string()),
        ),
    }
}

/// Lifecycle response
#[derive(Debug, Serialize)]
pub struct LifecycleResponse {
    pub state: LifecycleState,
}

/// Deliver a host lifecycle event
pub async fn lifecycle_event(
    State(state): State<Arc<AppState>>,
    Path(event): Path<String>,
) -> Response {
    let event: LifecycleEvent = match event.parse() {
        Ok(event) => event,
        Err(message) => {
            return (StatusCode::NOT_FOUND, ApiResponse::<()>::error(&message)).into_response();
        }
    };

    match state.coordinator.lifecycle(event).await {
        Ok(Ok(lifecycle)) => {
            ApiResponse::success(LifecycleResponse { state: lifecycle }).into_response()
        }
        Ok(Err(e)) => unavailable(&e.to_string()),
        Err(e) => unavailable(&e.to_string()),
    }
}

fn unavailable(message: &str) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        ApiResponse::<()>::error(message),
    )
        .into_response()
}

/// Status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub pipeline: PipelineStatus,
    pub inference_enabled: bool,
    pub detector_mode: DetectorMode,
}

/// Get current status
pub async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = state.config.read().await;

    ApiResponse::success(StatusResponse {
        version: crate::VERSION.to_string(),
        pipeline: state.coordinator.status(),
        inference_enabled: config.inference.enabled,
        detector_mode: config.inference.mode,
    })
}

/// Get current configuration
pub async fn get_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = state.config.read().await;
    Json(config.clone())
}

/// Optional view size override for overlay queries
#[derive(Debug, Default, Deserialize)]
pub struct ViewQuery {
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

/// Overlay response
#[derive(Debug, Serialize)]
pub struct OverlayResponse {
    pub view_width: u32,
    pub view_height: u32,
    pub state: Option<OverlayFrameState>,
    pub commands: Vec<DrawCommand>,
}

async fn view_size(state: &AppState, query: &ViewQuery) -> (u32, u32) {
    let config = state.config.read().await;
    (
        query.width.unwrap_or(config.renderer.view_width),
        query.height.unwrap_or(config.renderer.view_height),
    )
}

/// Current overlay draw commands
pub async fn get_overlay(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ViewQuery>,
) -> Json<ApiResponse<OverlayResponse>> {
    let (view_width, view_height) = view_size(&state, &query).await;

    ApiResponse::success(OverlayResponse {
        view_width,
        view_height,
        state: state.overlay.current(),
        commands: state.overlay.paint(view_width, view_height),
    })
}

/// Annotate the overlay with a raw box, keeping the current label
pub async fn draw_box(
    State(state): State<Arc<AppState>>,
    Json(bbox): Json<BoundingBox>,
) -> impl IntoResponse {
    if state.overlay.draw_bounding_box(bbox) {
        (StatusCode::OK, ApiResponse::<()>::ok())
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            ApiResponse::<()>::error("Overlay is closed"),
        )
    }
}

/// SSE stream of overlay draw commands
pub async fn overlay_stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ViewQuery>,
) -> impl IntoResponse {
    let (view_width, view_height) = view_size(&state, &query).await;
    sse::create_overlay_stream(&state.overlay, view_width, view_height)
}
