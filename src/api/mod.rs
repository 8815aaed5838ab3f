//! API layer for the items service.
//!
//! This module contains the HTTP handlers, request/response models and the
//! router assembly with the observability middleware stack.

pub mod handlers;
pub mod items;
pub mod models;

// Re-export commonly used types
pub use handlers::{health, metrics_handler, panic_response, AppState};
pub use models::{HealthResponse, Item, ItemCreate, ItemUpdate, ListItemsQuery, Status};

use crate::core::config::{AppConfig, MiddlewareOrder};
use crate::core::metrics::HttpMetrics;
use crate::core::middleware::{correlation_middleware, propagate_request_id, MetricsMiddleware};
use axum::{
    http::{HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

/// Routes without middleware.
pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/items", get(items::list_items).post(items::create_item))
        .route(
            "/items/:id",
            get(items::get_item)
                .put(items::update_item)
                .delete(items::delete_item),
        )
        .with_state(state)
}

/// Wrap a router in the observability stack.
///
/// Outermost first: CORS, request-id propagation, panic catching, the
/// correlation and metrics middlewares nested as configured, then tracing.
pub fn apply_middleware(router: Router, metrics: HttpMetrics, config: &AppConfig) -> Router {
    let track = from_fn_with_state(metrics, MetricsMiddleware::track_metrics);
    let correlate = from_fn(correlation_middleware);

    // Inside the correlation scope so trace events carry the request id
    let router = router.layer(TraceLayer::new_for_http());

    // The layer added last wraps all the others
    let router = match config.middleware_order {
        MiddlewareOrder::CorrelationFirst => router.layer(track).layer(correlate),
        MiddlewareOrder::MetricsFirst => router.layer(correlate).layer(track),
    };

    router
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(from_fn(propagate_request_id))
        .layer(cors_layer(&config.cors_allowed_origins))
}

/// Build the full application router.
pub fn build_router(state: Arc<AppState>, config: &AppConfig) -> Router {
    let metrics = state.metrics.clone();
    apply_middleware(routes(state), metrics, config)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    if origins.iter().any(|origin| origin == "*") {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    cors.allow_origin(AllowOrigin::list(origins))
}
