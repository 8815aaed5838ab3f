//! HTTP middleware for request correlation and metrics.
//!
//! Both middlewares observe handler panics, record their own bookkeeping and
//! then resume unwinding; converting a panic into a response is left to the
//! `CatchPanicLayer` that sits outside them. Bookkeeping lives in drop
//! guards so a request future dropped on client disconnect is still logged
//! and counted (with status 500).

use crate::core::logging::{generate_request_id, RequestId, ACCESS_LOGGER, ERROR_LOGGER, REQUEST_ID};
use crate::core::metrics::HttpMetrics;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use futures::FutureExt;
use std::any::Any;
use std::backtrace::Backtrace;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

/// Correlation header, lower-case as stored by `http`.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Placeholder for client attributes that cannot be determined.
const UNKNOWN_CLIENT: &str = "-";

/// Shared cell through which the correlation middleware reports the request
/// ID to [`propagate_request_id`].
#[derive(Clone, Default, Debug)]
pub struct RequestIdSlot(Arc<OnceLock<String>>);

impl RequestIdSlot {
    pub fn get(&self) -> Option<&str> {
        self.0.get().map(String::as_str)
    }

    fn fill(&self, request_id: &str) {
        let _ = self.0.set(request_id.to_string());
    }
}

/// Outermost layer: guarantees the correlation header on every response,
/// including the 500 produced by the panic-catching layer.
pub async fn propagate_request_id(mut request: Request, next: Next) -> Response {
    let slot = RequestIdSlot::default();
    request.extensions_mut().insert(slot.clone());

    let mut response = next.run(request).await;

    if let Some(request_id) = slot.get() {
        set_header_if_absent(response.headers_mut(), request_id);
    }
    response
}

fn set_header_if_absent(headers: &mut HeaderMap, request_id: &str) {
    if headers.contains_key(REQUEST_ID_HEADER) {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
}

/// Inbound request ID, or a fresh UUID v4 when the header is missing or empty.
/// Non-ASCII bytes are kept, with invalid UTF-8 replaced by U+FFFD.
fn resolve_request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(generate_request_id)
}

fn client_ip(request: &Request) -> String {
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}

fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}

/// Human-readable panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Exception kind label for a panic payload.
pub fn panic_kind(payload: &(dyn Any + Send)) -> &'static str {
    if payload.is::<&str>() || payload.is::<String>() {
        "panic"
    } else {
        "unknown"
    }
}

/// Emits the access-log record when the request finishes or is dropped.
struct AccessLog {
    request_id: String,
    method: String,
    path: String,
    client_ip: String,
    user_agent: String,
    start: Instant,
    status_code: Option<u16>,
}

impl Drop for AccessLog {
    fn drop(&mut self) {
        let duration_ms = (self.start.elapsed().as_secs_f64() * 1000.0).round() as u64;

        tracing::info!(
            target: ACCESS_LOGGER,
            request_id = %self.request_id,
            method = %self.method,
            path = %self.path,
            status_code = self.status_code.unwrap_or(500),
            duration_ms,
            client_ip = %self.client_ip,
            user_agent = %self.user_agent,
            "HTTP access"
        );
    }
}

/// Assign or propagate a request ID and write one access-log record per
/// request.
///
/// The handler runs inside a [`REQUEST_ID`] scope and receives the ID as a
/// [`RequestId`] extension. The response gets an `X-Request-ID` header unless
/// the handler already set one.
pub async fn correlation_middleware(mut request: Request, next: Next) -> Response {
    let start = Instant::now();
    let request_id = resolve_request_id(request.headers());

    let mut access = AccessLog {
        request_id: request_id.clone(),
        method: request.method().to_string(),
        path: request.uri().path().to_string(),
        client_ip: client_ip(&request),
        user_agent: user_agent(request.headers()),
        start,
        status_code: None,
    };

    if let Some(slot) = request.extensions().get::<RequestIdSlot>() {
        slot.fill(&request_id);
    }
    request.extensions_mut().insert(RequestId(request_id.clone()));

    let outcome = REQUEST_ID
        .scope(
            request_id.clone(),
            AssertUnwindSafe(next.run(request)).catch_unwind(),
        )
        .await;

    match outcome {
        Ok(mut response) => {
            access.status_code = Some(response.status().as_u16());
            set_header_if_absent(response.headers_mut(), &request_id);
            response
        }
        Err(payload) => {
            access.status_code = Some(500);
            tracing::error!(
                target: ERROR_LOGGER,
                request_id = %request_id,
                method = %access.method,
                path = %access.path,
                error = %panic_message(payload.as_ref()),
                backtrace = %Backtrace::capture(),
                "Unhandled exception"
            );
            drop(access);
            std::panic::resume_unwind(payload)
        }
    }
}

/// Updates the in-progress gauge, latency histogram and request counter
/// when the request finishes or is dropped.
struct InFlight {
    metrics: HttpMetrics,
    method: String,
    path: String,
    start: Instant,
    status_code: Option<u16>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.metrics.request_finished(
            &self.method,
            &self.path,
            self.status_code.unwrap_or(500),
            self.start.elapsed().as_secs_f64(),
        );
    }
}

/// Metrics middleware for tracking request statistics.
///
/// Series are keyed by the raw request path, so routes with path
/// parameters (`/items/<uuid>`) create one series per distinct value.
/// Prefer templated paths before exposing this to unbounded traffic.
pub struct MetricsMiddleware;

impl MetricsMiddleware {
    /// Track metrics for incoming requests.
    ///
    /// This middleware:
    /// - Increments the in-progress gauge before calling the handler
    /// - Counts handler panics by kind, then resumes unwinding
    /// - Records duration and status (500 if no response was produced)
    pub async fn track_metrics(
        State(metrics): State<HttpMetrics>,
        request: Request,
        next: Next,
    ) -> Response {
        let method = request.method().to_string();
        let path = request.uri().path().to_string();

        metrics.request_started(&method, &path);
        let mut in_flight = InFlight {
            metrics: metrics.clone(),
            method,
            path,
            start: Instant::now(),
            status_code: None,
        };

        match AssertUnwindSafe(next.run(request)).catch_unwind().await {
            Ok(response) => {
                in_flight.status_code = Some(response.status().as_u16());
                response
            }
            Err(payload) => {
                metrics.exception_raised(
                    &in_flight.method,
                    &in_flight.path,
                    panic_kind(payload.as_ref()),
                );
                drop(in_flight);
                std::panic::resume_unwind(payload)
            }
        }
    }
}
