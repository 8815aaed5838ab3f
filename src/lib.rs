//! Items API - a small CRUD service with a production-style observability layer
//!
//! This library provides:
//!
//! - **Structured Logging**: every `tracing` event rendered as a normalized JSON record
//! - **Log Shipping**: non-blocking, batched delivery to an OpenSearch `_bulk` endpoint
//!   with requeue and exponential backoff
//! - **Request Correlation**: `X-Request-ID` propagation and one access-log record per request
//! - **Metrics & Monitoring**: Prometheus counters, histograms and gauges per route
//!
//! # Architecture
//!
//! The codebase is organized into three main layers:
//!
//! - [`core`]: Observability pipeline (config, errors, logging, shipper, metrics, middleware)
//! - [`api`]: HTTP handlers, request/response models and router assembly
//! - [`services`]: Business logic (in-memory item store)
//!
//! # Configuration
//!
//! All settings come from environment variables; none are required.
//! - `API_HOST` / `API_PORT`: Server bind address (default: 127.0.0.1:8000)
//! - `OPENSEARCH_ENABLED`: Ship logs to OpenSearch (default: false)
//! - `OPENSEARCH_HOST` / `OPENSEARCH_PORT` / `OPENSEARCH_SCHEME`: Backend location
//! - `LOG_STDOUT`: Write JSON log lines to stdout (default: true)
//! - `MIDDLEWARE_ORDER`: `correlation_first` (default) or `metrics_first`

pub mod api;
pub mod core;
pub mod services;

// Re-export commonly used types for convenience
pub use api::{build_router, AppState};
pub use core::{AppConfig, AppError, HttpMetrics, LogShipper, Result};
pub use services::ItemService;
