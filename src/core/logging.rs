//! Structured logging with request correlation.
//!
//! Every `tracing` event is normalized into a [`LogRecord`] by
//! [`StructuredLayer`] and handed to a set of [`RecordSink`]s (stdout and the
//! log shipper). The current request ID lives in task-local storage so that
//! any log emitted while serving a request carries it without being passed
//! through every function call.

use crate::core::config::LoggingConfig;
use crate::core::formatter::{format_event, LogEvent, LogLevel, LogRecord};
use crate::core::shipper::LogShipper;
use serde_json::{Map, Value};
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Logger name for per-request access records.
pub const ACCESS_LOGGER: &str = "http.access";

/// Logger name for unhandled handler failures.
pub const ERROR_LOGGER: &str = "http.error";

/// Targets whose events never reach the log shipper, so the shipper and its
/// HTTP client cannot feed their own logs back into the queue.
const SHIPPER_EXCLUDED_TARGETS: &[&str] = &[
    "items_api::core::shipper",
    "items_api::core::opensearch",
    "reqwest",
    "hyper",
    "h2",
];

tokio::task_local! {
    /// Task-local storage for the current request ID.
    ///
    /// Set by the correlation middleware for the duration of one request.
    pub static REQUEST_ID: String;
}

/// Get the current request ID from context, if set.
pub fn get_request_id() -> Option<String> {
    REQUEST_ID.try_with(|id| id.clone()).ok()
}

/// Generate a new unique request ID using UUID v4.
pub fn generate_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Request extension carrying the correlation ID assigned to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Destination for formatted log records.
pub trait RecordSink: Send + Sync + 'static {
    fn accept(&self, record: &LogRecord);

    /// Whether events from `target` should be delivered to this sink.
    fn accepts_target(&self, _target: &str) -> bool {
        true
    }
}

/// Writes one JSON line per record to stdout.
pub struct StdoutSink;

impl RecordSink for StdoutSink {
    fn accept(&self, record: &LogRecord) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{}", record.to_json_line());
    }
}

impl RecordSink for LogShipper {
    fn accept(&self, record: &LogRecord) {
        self.emit(record.clone());
    }

    fn accepts_target(&self, target: &str) -> bool {
        !SHIPPER_EXCLUDED_TARGETS
            .iter()
            .any(|excluded| target.starts_with(excluded))
    }
}

/// `tracing` layer that formats events into [`LogRecord`]s.
#[derive(Default)]
pub struct StructuredLayer {
    sinks: Vec<Arc<dyn RecordSink>>,
}

impl StructuredLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl<S: Subscriber> Layer<S> for StructuredLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let target = metadata.target();

        let sinks: Vec<&Arc<dyn RecordSink>> = self
            .sinks
            .iter()
            .filter(|sink| sink.accepts_target(target))
            .collect();
        if sinks.is_empty() {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let mut log_event = LogEvent::new(
            LogLevel::from(metadata.level()),
            target,
            visitor.message.unwrap_or(Value::Null),
        );
        log_event.extras = visitor.fields;
        if !log_event.extras.contains_key("request_id") {
            if let Some(id) = get_request_id() {
                log_event.extras.insert("request_id".to_string(), Value::String(id));
            }
        }

        let record = format_event(log_event);
        for sink in sinks {
            sink.accept(&record);
        }
    }
}

/// Collects event fields into JSON values.
#[derive(Default)]
struct FieldVisitor {
    message: Option<Value>,
    fields: Map<String, Value>,
}

impl FieldVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::Bool(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        let value = serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(value.to_string()));
        self.insert(field, value);
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, Value::String(format!("{:?}", value)));
    }
}

/// Build the env filter: `RUST_LOG` (or the default) plus forced
/// suppression of noisy HTTP library logs.
pub fn build_filter() -> EnvFilter {
    let base_filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info,items_api=debug".to_string());

    // Appended last so a bare RUST_LOG=trace cannot re-enable them
    EnvFilter::new(format!(
        "{},hyper=warn,hyper::proto=warn,h2=warn,reqwest=warn",
        base_filter
    ))
}

/// Install the global subscriber. Call once at startup.
pub fn init_logging(config: &LoggingConfig, shipper: Arc<LogShipper>) -> anyhow::Result<()> {
    let mut layer = StructuredLayer::new().with_sink(shipper);
    if config.stdout {
        layer = layer.with_sink(Arc::new(StdoutSink));
    }

    tracing_subscriber::registry()
        .with(build_filter())
        .with(layer)
        .try_init()?;

    Ok(())
}
