//! Prometheus metrics for HTTP traffic.
//!
//! [`HttpMetrics`] owns its own registry and is injected into the router
//! state, so every app instance (and every test) gets isolated series.

use anyhow::Context;
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Request latency buckets in seconds.
pub const LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5];

/// Content type of the Prometheus text exposition format.
pub const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Container for all HTTP metrics. Cheap to clone.
#[derive(Clone)]
pub struct HttpMetrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,

    /// Total requests by method, path and status code
    requests_total: IntCounterVec,

    /// Request latency histogram in seconds
    request_duration: HistogramVec,

    /// Requests currently being processed
    requests_in_progress: GaugeVec,

    /// Unhandled handler failures by kind
    exceptions_total: IntCounterVec,
}

impl HttpMetrics {
    /// Create a fresh registry with the HTTP collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if a collector cannot be created or registered.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total HTTP requests"),
            &["method", "path", "status_code"],
        )?;
        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request latency in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["method", "path"],
        )?;
        let requests_in_progress = GaugeVec::new(
            Opts::new(
                "http_requests_in_progress",
                "HTTP requests currently being processed",
            ),
            &["method", "path"],
        )?;
        let exceptions_total = IntCounterVec::new(
            Opts::new(
                "http_exceptions_total",
                "Unhandled failures raised while serving HTTP requests",
            ),
            &["method", "path", "exception_type"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(requests_in_progress.clone()))?;
        registry.register(Box::new(exceptions_total.clone()))?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                requests_total,
                request_duration,
                requests_in_progress,
                exceptions_total,
            }),
        })
    }

    pub fn request_started(&self, method: &str, path: &str) {
        self.inner
            .requests_in_progress
            .with_label_values(&[method, path])
            .inc();
    }

    /// Record a finished request (successful or not) and release its
    /// in-progress slot.
    pub fn request_finished(&self, method: &str, path: &str, status_code: u16, seconds: f64) {
        self.inner
            .request_duration
            .with_label_values(&[method, path])
            .observe(seconds);
        self.inner
            .requests_total
            .with_label_values(&[method, path, &status_code.to_string()])
            .inc();
        self.inner
            .requests_in_progress
            .with_label_values(&[method, path])
            .dec();
    }

    pub fn exception_raised(&self, method: &str, path: &str, kind: &str) {
        self.inner
            .exceptions_total
            .with_label_values(&[method, path, kind])
            .inc();
    }

    pub fn requests_total(&self, method: &str, path: &str, status_code: u16) -> u64 {
        self.inner
            .requests_total
            .with_label_values(&[method, path, &status_code.to_string()])
            .get()
    }

    pub fn requests_in_progress(&self, method: &str, path: &str) -> f64 {
        self.inner
            .requests_in_progress
            .with_label_values(&[method, path])
            .get()
    }

    pub fn exceptions_total(&self, method: &str, path: &str, kind: &str) -> u64 {
        self.inner
            .exceptions_total
            .with_label_values(&[method, path, kind])
            .get()
    }

    /// Number of latency observations for a route.
    pub fn duration_count(&self, method: &str, path: &str) -> u64 {
        self.inner
            .request_duration
            .with_label_values(&[method, path])
            .get_sample_count()
    }

    /// Render the registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded.
    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .context("failed to encode Prometheus metrics")?;
        String::from_utf8(buffer).context("metrics output was not valid UTF-8")
    }
}
