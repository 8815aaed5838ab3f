//! Shared state and service-level handlers (health, metrics, panic response).

use crate::api::models::HealthResponse;
use crate::core::error::{AppError, Result};
use crate::core::metrics::{HttpMetrics, METRICS_CONTENT_TYPE};
use crate::services::ItemService;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::any::Any;
use std::sync::Arc;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub items: ItemService,
    pub metrics: HttpMetrics,
}

impl AppState {
    pub fn new(items: ItemService, metrics: HttpMetrics) -> Self {
        Self { items, metrics }
    }
}

/// `GET /health`
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// `GET /metrics`: Prometheus text exposition of the injected registry.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Result<Response> {
    let body = state
        .metrics
        .render()
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(([(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)], body).into_response())
}

/// Response produced by the panic-catching layer.
///
/// The panic itself was already logged by the correlation middleware.
pub fn panic_response(_payload: Box<dyn Any + Send + 'static>) -> Response {
    let body = Json(json!({
        "error": {
            "message": "Internal server error",
            "type": "api_error",
            "code": 500
        }
    }));
    (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
}
