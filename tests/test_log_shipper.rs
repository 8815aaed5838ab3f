//! Tests for the asynchronous log shipper.
//!
//! These tests drive the shipper against scripted in-memory backends to
//! check queueing, batching, retry/backoff and shutdown behavior.

use axum::{body::Body, http::Request, routing::get, Router};
use items_api::{
    api::apply_middleware,
    core::{
        format_event, AppConfig, BulkBackend, BulkSummary, HttpMetrics, LogEvent, LogLevel,
        LogRecord, LogShipper, ShipperConfig, ShipperError, StructuredLayer, ACCESS_LOGGER,
    },
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tower::ServiceExt;
use tracing_subscriber::layer::SubscriberExt;

/// Backend that records every call and fails the first `failures` of them.
#[derive(Clone, Default)]
struct ScriptedBackend {
    batches: Arc<Mutex<Vec<Vec<LogRecord>>>>,
    calls: Arc<Mutex<Vec<Instant>>>,
    failures: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    fn failing_first(failures: usize) -> Self {
        let backend = Self::default();
        backend.failures.store(failures, Ordering::SeqCst);
        backend
    }

    fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().iter().map(Vec::len).collect()
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Every record the backend has been handed, including failed attempts.
    fn received(&self) -> Vec<LogRecord> {
        self.batches.lock().unwrap().iter().flatten().cloned().collect()
    }
}

impl BulkBackend for ScriptedBackend {
    async fn bulk(&self, _index: &str, records: &[LogRecord]) -> Result<BulkSummary, ShipperError> {
        self.calls.lock().unwrap().push(Instant::now());
        self.batches.lock().unwrap().push(records.to_vec());

        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ShipperError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }

        Ok(BulkSummary {
            items: records.len(),
            failed: 0,
        })
    }
}

/// Backend whose requests never complete. `alive` is shared with the test so
/// it can tell when the worker owning the backend has been dropped.
#[derive(Default)]
struct HangingBackend {
    alive: Arc<()>,
}

impl BulkBackend for HangingBackend {
    async fn bulk(&self, _index: &str, _records: &[LogRecord]) -> Result<BulkSummary, ShipperError> {
        std::future::pending().await
    }
}

fn record(n: usize) -> LogRecord {
    format_event(LogEvent::new(LogLevel::Info, "shipper.test", format!("record {}", n)))
}

fn test_config() -> ShipperConfig {
    ShipperConfig {
        enabled: true,
        ..ShipperConfig::default()
    }
}

/// Poll `condition` every 20ms until it holds or `limit` elapses.
async fn wait_for(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

#[tokio::test]
async fn test_overflow_drops_without_blocking() {
    let config = ShipperConfig {
        queue_capacity: 100,
        ..test_config()
    };
    let shipper = LogShipper::spawn(&config, ScriptedBackend::default());

    let start = Instant::now();
    for n in 0..150 {
        shipper.emit(record(n));
    }
    assert!(start.elapsed() < Duration::from_secs(1));

    let stats = shipper.stats();
    assert_eq!(stats.accepted, 100);
    assert_eq!(stats.dropped, 50);

    shipper.close().await;
}

#[tokio::test]
async fn test_large_burst_is_split_into_batches() {
    let backend = ScriptedBackend::default();
    let shipper = LogShipper::spawn(&test_config(), backend.clone());

    for n in 0..600 {
        shipper.emit(record(n));
    }

    assert!(wait_for(Duration::from_secs(5), || shipper.stats().shipped == 600).await);

    let sizes = backend.batch_sizes();
    assert!(sizes.len() >= 2, "expected at least two batches, got {:?}", sizes);
    assert!(sizes[0] <= 500);
    assert_eq!(sizes.iter().sum::<usize>(), 600);

    shipper.close().await;
}

#[tokio::test]
async fn test_batches_preserve_enqueue_order() {
    let backend = ScriptedBackend::default();
    let shipper = LogShipper::spawn(&test_config(), backend.clone());

    for n in 0..20 {
        shipper.emit(record(n));
    }
    assert!(wait_for(Duration::from_secs(3), || shipper.stats().shipped == 20).await);

    let messages: Vec<String> = backend
        .batches
        .lock()
        .unwrap()
        .iter()
        .flatten()
        .map(|r| r.message.clone())
        .collect();
    let expected: Vec<String> = (0..20).map(|n| format!("record {}", n)).collect();
    assert_eq!(messages, expected);

    shipper.close().await;
}

#[tokio::test]
async fn test_failed_batch_is_requeued_after_backoff() {
    let backend = ScriptedBackend::failing_first(1);
    let shipper = LogShipper::spawn(&test_config(), backend.clone());

    for n in 0..5 {
        shipper.emit(record(n));
    }

    assert!(wait_for(Duration::from_secs(5), || backend.call_count() >= 2).await);

    let calls = backend.calls.lock().unwrap().clone();
    let gap = calls[1] - calls[0];
    assert!(gap >= Duration::from_millis(500), "backoff too short: {:?}", gap);
    assert!(gap <= Duration::from_secs(10), "backoff too long: {:?}", gap);

    let batches = backend.batches.lock().unwrap().clone();
    assert_eq!(batches[0], batches[1]);

    let stats = shipper.stats();
    assert_eq!(stats.failed_batches, 1);
    assert_eq!(stats.shipped, 5);
    assert_eq!(stats.dropped, 0);

    shipper.close().await;
}

#[tokio::test]
async fn test_backoff_doubles_between_failures() {
    let backend = ScriptedBackend::failing_first(2);
    let config = ShipperConfig {
        backoff_floor: Duration::from_millis(200),
        backoff_ceiling: Duration::from_secs(5),
        ..test_config()
    };
    let shipper = LogShipper::spawn(&config, backend.clone());

    shipper.emit(record(0));
    assert!(wait_for(Duration::from_secs(5), || backend.call_count() >= 3).await);

    let calls = backend.calls.lock().unwrap().clone();
    assert!(calls[1] - calls[0] >= Duration::from_millis(200));
    assert!(calls[2] - calls[1] >= Duration::from_millis(400));

    shipper.close().await;
}

#[tokio::test]
async fn test_close_flushes_pending_records() {
    let backend = ScriptedBackend::default();
    let shipper = LogShipper::spawn(&test_config(), backend.clone());

    for n in 0..3 {
        shipper.emit(record(n));
    }
    shipper.close().await;

    assert_eq!(shipper.stats().shipped, 3);
    assert_eq!(backend.batch_sizes().iter().sum::<usize>(), 3);
}

#[tokio::test]
async fn test_close_is_bounded_when_backend_hangs() {
    let config = ShipperConfig {
        close_timeout: Duration::from_millis(100),
        ..test_config()
    };
    let backend = HangingBackend::default();
    let alive = backend.alive.clone();
    let shipper = LogShipper::spawn(&config, backend);

    shipper.emit(record(0));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let start = Instant::now();
    shipper.close().await;
    assert!(start.elapsed() < Duration::from_secs(2));

    // The hung worker is aborted, not left running detached
    assert!(wait_for(Duration::from_secs(1), || Arc::strong_count(&alive) == 1).await);

    // A second close has nothing left to wait for
    shipper.close().await;
}

#[tokio::test]
async fn test_close_interrupts_backoff() {
    let backend = ScriptedBackend::failing_first(usize::MAX);
    let config = ShipperConfig {
        backoff_floor: Duration::from_secs(5),
        backoff_ceiling: Duration::from_secs(10),
        close_timeout: Duration::from_secs(2),
        ..test_config()
    };
    let shipper = LogShipper::spawn(&config, backend.clone());

    shipper.emit(record(0));
    assert!(wait_for(Duration::from_secs(3), || backend.call_count() >= 1).await);

    let start = Instant::now();
    shipper.close().await;
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_emit_after_close_is_harmless() {
    let shipper = LogShipper::spawn(&test_config(), ScriptedBackend::default());
    shipper.close().await;

    shipper.emit(record(1));
    let stats = shipper.stats();
    assert_eq!(stats.accepted + stats.dropped, 1);
}

#[tokio::test]
async fn test_disabled_shipper_accepts_nothing() {
    let shipper = LogShipper::from_config(&ShipperConfig::default());
    assert!(!shipper.is_enabled());

    for n in 0..10 {
        shipper.emit(record(n));
    }
    assert_eq!(shipper.stats().accepted, 0);
    assert_eq!(shipper.stats().dropped, 0);

    shipper.close().await;
}

async fn app_handler() -> &'static str {
    tracing::info!(target: "app", "handled");
    "ok"
}

#[tokio::test]
async fn test_request_logs_reach_backend_without_shipper_feedback() {
    let backend = ScriptedBackend::failing_first(2);
    let config = ShipperConfig {
        batch_timeout: Duration::from_millis(100),
        backoff_floor: Duration::from_millis(50),
        backoff_ceiling: Duration::from_millis(100),
        ..test_config()
    };
    let shipper = Arc::new(LogShipper::spawn(&config, backend.clone()));

    let subscriber =
        tracing_subscriber::registry().with(StructuredLayer::new().with_sink(shipper.clone()));
    let _guard = tracing::subscriber::set_default(subscriber);

    let routes = Router::new().route("/items", get(app_handler));
    let app = apply_middleware(routes, HttpMetrics::new().unwrap(), &AppConfig::default());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/items")
                .header("X-Request-ID", "e2e")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // Two failed attempts, then the requeued records go through
    let delivered = wait_for(Duration::from_secs(5), || {
        let stats = shipper.stats();
        stats.failed_batches >= 2 && stats.shipped > 0
    })
    .await;
    assert!(delivered);
    shipper.close().await;

    let received = backend.received();
    let access: Vec<&LogRecord> = received
        .iter()
        .filter(|r| r.logger == ACCESS_LOGGER)
        .collect();
    assert!(!access.is_empty());
    assert_eq!(access[0].request_id.as_deref(), Some("e2e"));
    assert_eq!(access[0].status_code, Some(200));

    let app_records: Vec<&LogRecord> = received.iter().filter(|r| r.logger == "app").collect();
    assert!(!app_records.is_empty());
    assert_eq!(app_records[0].request_id.as_deref(), Some("e2e"));

    assert!(received
        .iter()
        .all(|r| !r.logger.starts_with("items_api::core::shipper")));
}
