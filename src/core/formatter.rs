//! Structured log record formatting.
//!
//! Every log line that leaves the process (stdout or the search backend) is a
//! [`LogRecord`] produced by [`format_event`] from a raw [`LogEvent`].

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Canonical log levels carried by a [`LogRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&tracing::Level> for LogLevel {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::ERROR => LogLevel::Error,
            tracing::Level::WARN => LogLevel::Warn,
            tracing::Level::INFO => LogLevel::Info,
            // TRACE has no canonical counterpart
            _ => LogLevel::Debug,
        }
    }
}

/// A raw log event before normalization.
#[derive(Debug, Clone)]
pub struct LogEvent {
    /// Instant the event was created
    pub created: DateTime<Utc>,
    pub level: LogLevel,
    /// Logger name (the `tracing` target)
    pub logger: String,
    /// Message payload, any JSON value
    pub message: Value,
    /// Contextual key-value extras
    pub extras: Map<String, Value>,
}

impl LogEvent {
    /// Create an event stamped with the current time and no extras.
    pub fn new(level: LogLevel, logger: impl Into<String>, message: impl Into<Value>) -> Self {
        Self {
            created: Utc::now(),
            level,
            logger: logger.into(),
            message: message.into(),
            extras: Map::new(),
        }
    }

    /// Attach an extra field.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }
}

/// Normalized JSON log record.
///
/// Optional fields are omitted from the JSON output when absent; any extras
/// without a dedicated field are flattened into the top-level object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: String,
    pub level: LogLevel,
    pub logger: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LogRecord {
    /// Render as a single JSON line. Never fails: the record only holds
    /// JSON-safe values, and a failure falls back to an empty object.
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Format a timestamp as UTC ISO-8601 with an explicit `+00:00` offset.
pub fn iso_timestamp(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Coerce an arbitrary JSON value into a message string.
fn coerce_message(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn take_string(extras: &mut Map<String, Value>, key: &str) -> Option<String> {
    match extras.remove(key)? {
        Value::String(s) => Some(s),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn take_int(extras: &mut Map<String, Value>, key: &str) -> Option<i64> {
    let value = extras.get(key)?;
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        _ => None,
    };
    // Values that are not integers stay in the extras map untouched
    if parsed.is_some() {
        extras.remove(key);
    }
    parsed
}

/// Normalize a raw event into a [`LogRecord`].
///
/// Pure and infallible: non-string messages are stringified, a missing
/// timestamp is derived from the event's creation instant.
pub fn format_event(event: LogEvent) -> LogRecord {
    let LogEvent {
        created,
        level,
        logger,
        message,
        mut extras,
    } = event;

    let timestamp = take_string(&mut extras, "timestamp").unwrap_or_else(|| iso_timestamp(&created));

    // Canonical fields always come from the event itself
    extras.remove("level");
    extras.remove("logger");
    extras.remove("message");

    LogRecord {
        timestamp,
        level,
        logger,
        message: coerce_message(message),
        request_id: take_string(&mut extras, "request_id"),
        method: take_string(&mut extras, "method"),
        path: take_string(&mut extras, "path"),
        status_code: take_int(&mut extras, "status_code"),
        duration_ms: take_int(&mut extras, "duration_ms"),
        client_ip: take_string(&mut extras, "client_ip"),
        user_agent: take_string(&mut extras, "user_agent"),
        extra: extras,
    }
}
