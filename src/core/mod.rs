//! Core functionality for the items service.
//!
//! This module contains the observability pipeline and the fundamental
//! components used throughout the application:
//! - Configuration management
//! - Error handling
//! - Structured logging and log shipping
//! - Metrics collection
//! - HTTP middleware

pub mod config;
pub mod error;
pub mod formatter;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod opensearch;
pub mod shipper;

// Re-export commonly used types
pub use config::{AppConfig, LoggingConfig, MiddlewareOrder, ServerConfig, ShipperConfig};
pub use error::{AppError, Result};
pub use formatter::{format_event, LogEvent, LogLevel, LogRecord};
pub use logging::{
    generate_request_id, get_request_id, init_logging, RecordSink, RequestId, StdoutSink,
    StructuredLayer, ACCESS_LOGGER, ERROR_LOGGER, REQUEST_ID,
};
pub use metrics::HttpMetrics;
pub use middleware::{
    correlation_middleware, propagate_request_id, MetricsMiddleware, REQUEST_ID_HEADER,
};
pub use opensearch::OpenSearchClient;
pub use shipper::{BulkBackend, BulkSummary, LogShipper, ShipperError, ShipperStats};
