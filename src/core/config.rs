//! Configuration management for the items service.
//!
//! All settings are read from environment variables (a `.env` file is loaded
//! by the binary before this module runs). Unparseable numeric values fall
//! back to their defaults.

use anyhow::{bail, Result};
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Listen address for the HTTP server
    pub server: ServerConfig,

    /// Log shipping to the search backend
    pub shipper: ShipperConfig,

    /// Local logging output
    pub logging: LoggingConfig,

    /// Origins allowed by the CORS layer
    pub cors_allowed_origins: Vec<String>,

    /// Nesting of the correlation and metrics middlewares
    pub middleware_order: MiddlewareOrder,
}

/// Server-specific configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to bind to
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

/// Settings for the OpenSearch log shipper.
#[derive(Debug, Clone)]
pub struct ShipperConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub scheme: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub index: String,
    /// Bounded queue capacity; records beyond it are dropped
    pub queue_capacity: usize,
    /// Maximum records per bulk request
    pub batch_size: usize,
    /// Maximum time spent collecting one batch
    pub batch_timeout: Duration,
    /// Longest single wait on the queue while collecting a batch
    pub poll_interval: Duration,
    pub backoff_floor: Duration,
    pub backoff_ceiling: Duration,
    /// Timeout for one bulk HTTP request
    pub request_timeout: Duration,
    /// How long `close` waits for the worker
    pub close_timeout: Duration,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "opensearch".to_string(),
            port: 9200,
            scheme: "http".to_string(),
            username: None,
            password: None,
            index: "logs-app-v1".to_string(),
            queue_capacity: 10_000,
            batch_size: 500,
            batch_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(200),
            backoff_floor: Duration::from_millis(500),
            backoff_ceiling: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
            close_timeout: Duration::from_secs(1),
        }
    }
}

impl ShipperConfig {
    /// Load shipper settings from `OPENSEARCH_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            enabled: std::env::var("OPENSEARCH_ENABLED")
                .map(|v| str_to_bool(&v))
                .unwrap_or(false),
            host: std::env::var("OPENSEARCH_HOST").unwrap_or(defaults.host),
            port: env_parse("OPENSEARCH_PORT").unwrap_or(defaults.port),
            scheme: std::env::var("OPENSEARCH_SCHEME").unwrap_or(defaults.scheme),
            username: env_non_empty("OPENSEARCH_USER"),
            password: env_non_empty("OPENSEARCH_PASSWORD"),
            index: std::env::var("OPENSEARCH_INDEX").unwrap_or(defaults.index),
            queue_capacity: env_parse("OPENSEARCH_QUEUE_CAPACITY")
                .unwrap_or(defaults.queue_capacity),
            batch_size: env_parse("OPENSEARCH_BATCH_SIZE").unwrap_or(defaults.batch_size),
            batch_timeout: env_parse("OPENSEARCH_BATCH_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.batch_timeout),
            backoff_floor: env_parse("OPENSEARCH_BACKOFF_FLOOR_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff_floor),
            backoff_ceiling: env_parse("OPENSEARCH_BACKOFF_CEILING_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff_ceiling),
            ..defaults
        }
    }

    /// Base URL of the search backend.
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    /// Basic-auth credentials, only when both halves are configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }

    /// Validate configuration when enabled.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            bail!("OPENSEARCH_QUEUE_CAPACITY must be greater than zero");
        }
        if self.batch_size == 0 {
            bail!("OPENSEARCH_BATCH_SIZE must be greater than zero");
        }
        if self.backoff_floor.is_zero() {
            bail!("OPENSEARCH_BACKOFF_FLOOR_MS must be greater than zero");
        }
        if self.backoff_floor > self.backoff_ceiling {
            bail!(
                "backoff floor ({:?}) exceeds backoff ceiling ({:?})",
                self.backoff_floor,
                self.backoff_ceiling
            );
        }
        if !matches!(self.scheme.as_str(), "http" | "https") {
            bail!("OPENSEARCH_SCHEME must be http or https, got '{}'", self.scheme);
        }
        Ok(())
    }
}

/// Local (stdout) logging settings.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Write one JSON line per event to stdout
    pub stdout: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { stdout: true }
    }
}

/// Which request middleware sits on the outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MiddlewareOrder {
    /// Correlation wraps metrics (access-log latency includes metrics bookkeeping)
    #[default]
    CorrelationFirst,
    /// Metrics wraps correlation
    MetricsFirst,
}

impl MiddlewareOrder {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "correlation_first" | "correlation" => Some(Self::CorrelationFirst),
            "metrics_first" | "metrics" => Some(Self::MetricsFirst),
            _ => None,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            shipper: ShipperConfig::default(),
            logging: LoggingConfig::default(),
            cors_allowed_origins: vec!["http://localhost:8501".to_string()],
            middleware_order: MiddlewareOrder::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let mut server = defaults.server;
        if let Ok(host) = std::env::var("API_HOST") {
            server.host = host;
        }
        if let Ok(port_str) = std::env::var("API_PORT") {
            match port_str.parse::<u16>() {
                Ok(port) => server.port = port,
                Err(_) => bail!("API_PORT must be a valid port number, got '{}'", port_str),
            }
        }

        let logging = LoggingConfig {
            stdout: std::env::var("LOG_STDOUT")
                .map(|v| str_to_bool(&v))
                .unwrap_or(true),
        };

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or(defaults.cors_allowed_origins);

        let middleware_order = match std::env::var("MIDDLEWARE_ORDER") {
            Ok(value) => match MiddlewareOrder::parse(&value) {
                Some(order) => order,
                None => bail!(
                    "MIDDLEWARE_ORDER must be correlation_first or metrics_first, got '{}'",
                    value
                ),
            },
            Err(_) => MiddlewareOrder::default(),
        };

        let config = Self {
            server,
            shipper: ShipperConfig::from_env(),
            logging,
            cors_allowed_origins,
            middleware_order,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject inconsistent settings.
    pub fn validate(&self) -> Result<()> {
        if self.shipper.enabled {
            self.shipper.validate()?;
        }
        Ok(())
    }

    /// `host:port` to bind the listener to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

/// Convert string to boolean.
///
/// Accepts: "true", "1", "yes", "on" (case-insensitive)
fn str_to_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}
