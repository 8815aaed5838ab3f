//! Non-blocking log shipping to a search backend.
//!
//! Producers call [`LogShipper::emit`], which never blocks: records go into a
//! bounded MPSC channel and are dropped when it is full. A single background
//! task drains the channel in batches (up to `batch_size` records or
//! `batch_timeout`, whichever comes first) and bulk-writes each batch through
//! a [`BulkBackend`]. A failed batch is pushed back onto the queue and the
//! worker backs off exponentially between `backoff_floor` and
//! `backoff_ceiling`.

use crate::core::config::ShipperConfig;
use crate::core::formatter::LogRecord;
use crate::core::opensearch::OpenSearchClient;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Errors raised by a bulk backend. They never reach `emit` callers.
#[derive(Error, Debug)]
pub enum ShipperError {
    /// Connection, timeout or client construction failure
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The bulk endpoint answered with a non-success status
    #[error("bulk request rejected with status {status}: {body}")]
    Status { status: u16, body: String },

    /// A record could not be encoded into the request body
    #[error("failed to encode bulk body: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Outcome of an accepted bulk request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkSummary {
    /// Documents in the request
    pub items: usize,
    /// Documents the backend rejected individually (not retried)
    pub failed: usize,
}

/// A search backend that accepts batches of log records.
pub trait BulkBackend: Send + Sync + 'static {
    /// Index every record into `index` with a single request.
    ///
    /// Per-document failures inside an accepted request are reported in the
    /// summary, not as an error.
    fn bulk(
        &self,
        index: &str,
        records: &[LogRecord],
    ) -> impl Future<Output = Result<BulkSummary, ShipperError>> + Send;
}

/// Snapshot of shipper counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShipperStats {
    /// Records accepted into the queue by `emit`
    pub accepted: u64,
    /// Records dropped because the queue was full (on emit or on requeue)
    pub dropped: u64,
    /// Records handed to the backend in a successful bulk request
    pub shipped: u64,
    /// Bulk requests that failed and were requeued
    pub failed_batches: u64,
}

#[derive(Default)]
struct Counters {
    accepted: AtomicU64,
    dropped: AtomicU64,
    shipped: AtomicU64,
    failed_batches: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ShipperStats {
        ShipperStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            shipped: self.shipped.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
        }
    }
}

enum ShipperState {
    /// Shipping is off or the backend client could not be built
    Disabled,
    Enabled(EnabledShipper),
}

struct EnabledShipper {
    sender: mpsc::Sender<LogRecord>,
    stop: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    close_timeout: Duration,
}

/// Handle used by producers to ship log records.
pub struct LogShipper {
    state: ShipperState,
    counters: Arc<Counters>,
}

impl LogShipper {
    /// A shipper that drops every record.
    pub fn disabled() -> Self {
        Self {
            state: ShipperState::Disabled,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Build a shipper from configuration.
    ///
    /// Falls back to [`LogShipper::disabled`] when shipping is turned off,
    /// the configuration is inconsistent, or the HTTP client cannot be built.
    /// Must be called from within a tokio runtime when enabled.
    pub fn from_config(config: &ShipperConfig) -> Self {
        if !config.enabled {
            tracing::info!("OpenSearch log shipping is disabled");
            return Self::disabled();
        }

        if let Err(e) = config.validate() {
            tracing::error!("OpenSearch shipper configuration error: {:#}", e);
            return Self::disabled();
        }

        match OpenSearchClient::new(config) {
            Ok(client) => {
                tracing::info!(
                    url = %config.base_url(),
                    index = %config.index,
                    queue_capacity = config.queue_capacity,
                    "OpenSearch log shipping enabled"
                );
                Self::spawn(config, client)
            }
            Err(e) => {
                tracing::error!("Failed to build OpenSearch client: {}", e);
                Self::disabled()
            }
        }
    }

    /// Start the background worker for an arbitrary backend.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<B: BulkBackend>(config: &ShipperConfig, backend: B) -> Self {
        let capacity = config.queue_capacity.max(1);
        let (sender, receiver) = mpsc::channel::<LogRecord>(capacity);
        let (stop, stop_rx) = watch::channel(false);
        let counters = Arc::new(Counters::default());

        let worker = Worker {
            receiver,
            requeue: sender.downgrade(),
            backend,
            index: config.index.clone(),
            batch_size: config.batch_size.max(1),
            batch_timeout: config.batch_timeout,
            poll_interval: config.poll_interval,
            backoff_floor: config.backoff_floor,
            backoff_ceiling: config.backoff_ceiling.max(config.backoff_floor),
            stop: stop_rx,
            counters: counters.clone(),
        };
        let handle = tokio::spawn(worker.run());

        Self {
            state: ShipperState::Enabled(EnabledShipper {
                sender,
                stop,
                worker: Mutex::new(Some(handle)),
                close_timeout: config.close_timeout,
            }),
            counters,
        }
    }

    /// Whether records are actually being shipped.
    pub fn is_enabled(&self) -> bool {
        matches!(self.state, ShipperState::Enabled(_))
    }

    /// Enqueue a record without blocking.
    ///
    /// A full queue drops the record; a disabled shipper ignores it.
    pub fn emit(&self, record: LogRecord) {
        let ShipperState::Enabled(inner) = &self.state else {
            return;
        };

        match inner.sender.try_send(record) {
            Ok(()) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                // Logging here would feed straight back into this queue
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Records currently waiting in the queue.
    pub fn pending(&self) -> usize {
        match &self.state {
            ShipperState::Disabled => 0,
            ShipperState::Enabled(inner) => inner.sender.max_capacity() - inner.sender.capacity(),
        }
    }

    pub fn stats(&self) -> ShipperStats {
        self.counters.snapshot()
    }

    /// Stop the worker, waiting at most `close_timeout` for the in-flight
    /// batch. A worker still running after that is aborted and records still
    /// queued are lost.
    pub async fn close(&self) {
        let ShipperState::Enabled(inner) = &self.state else {
            return;
        };

        let _ = inner.stop.send(true);

        let handle = inner.worker.lock().ok().and_then(|mut guard| guard.take());
        let Some(handle) = handle else {
            return;
        };

        let abort = handle.abort_handle();
        if tokio::time::timeout(inner.close_timeout, handle).await.is_err() {
            abort.abort();
            tracing::warn!(
                pending = self.pending(),
                "Log shipper did not stop within {:?}, worker aborted",
                inner.close_timeout
            );
        }
    }
}

/// Background consumer of the shipper queue.
struct Worker<B> {
    receiver: mpsc::Receiver<LogRecord>,
    requeue: mpsc::WeakSender<LogRecord>,
    backend: B,
    index: String,
    batch_size: usize,
    batch_timeout: Duration,
    poll_interval: Duration,
    backoff_floor: Duration,
    backoff_ceiling: Duration,
    stop: watch::Receiver<bool>,
    counters: Arc<Counters>,
}

impl<B: BulkBackend> Worker<B> {
    async fn run(mut self) {
        let mut backoff = self.backoff_floor;

        loop {
            if self.stop_requested() {
                self.final_flush().await;
                break;
            }

            let (batch, closed) = self.collect_batch().await;

            if !batch.is_empty() {
                match self.backend.bulk(&self.index, &batch).await {
                    Ok(summary) => {
                        backoff = self.backoff_floor;
                        self.counters
                            .shipped
                            .fetch_add(batch.len() as u64, Ordering::Relaxed);
                        if summary.failed > 0 {
                            tracing::debug!(
                                items = summary.items,
                                failed = summary.failed,
                                "Bulk request partially failed"
                            );
                        }
                    }
                    Err(e) => {
                        self.counters.failed_batches.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            records = batch.len(),
                            backoff_ms = backoff.as_millis() as u64,
                            "Bulk request failed: {}",
                            e
                        );
                        self.requeue_batch(batch);
                        self.sleep_backoff(backoff).await;
                        backoff = (backoff * 2).min(self.backoff_ceiling);
                    }
                }
            }

            if closed {
                break;
            }
        }

        tracing::debug!("Log shipper worker stopped");
    }

    fn stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    /// Pull records until the batch is full, the batch deadline passes, or a
    /// poll comes back empty. The flag reports a closed channel.
    async fn collect_batch(&mut self) -> (Vec<LogRecord>, bool) {
        let mut batch = Vec::new();
        let deadline = Instant::now() + self.batch_timeout;

        while batch.len() < self.batch_size {
            let now = Instant::now();
            if now >= deadline || self.stop_requested() {
                break;
            }
            let wait = self.poll_interval.min(deadline - now);

            match tokio::time::timeout(wait, self.receiver.recv()).await {
                Ok(Some(record)) => batch.push(record),
                Ok(None) => return (batch, true),
                Err(_) => break,
            }
        }

        (batch, false)
    }

    /// Put a failed batch back at the tail of the queue, dropping whatever
    /// does not fit.
    fn requeue_batch(&self, batch: Vec<LogRecord>) {
        let total = batch.len() as u64;
        let Some(sender) = self.requeue.upgrade() else {
            self.counters.dropped.fetch_add(total, Ordering::Relaxed);
            return;
        };

        let mut requeued = 0u64;
        for record in batch {
            if sender.try_send(record).is_err() {
                break;
            }
            requeued += 1;
        }
        self.counters
            .dropped
            .fetch_add(total - requeued, Ordering::Relaxed);
    }

    /// Sleep for the backoff duration, waking early on shutdown.
    async fn sleep_backoff(&mut self, backoff: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = self.stop.changed() => {}
        }
    }

    /// Send whatever is immediately available as one last batch, no retry.
    async fn final_flush(&mut self) {
        let mut batch = Vec::new();
        while batch.len() < self.batch_size {
            match self.receiver.try_recv() {
                Ok(record) => batch.push(record),
                Err(_) => break,
            }
        }
        if batch.is_empty() {
            return;
        }

        match self.backend.bulk(&self.index, &batch).await {
            Ok(_) => {
                self.counters
                    .shipped
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters
                    .dropped
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
                tracing::warn!(records = batch.len(), "Final bulk flush failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::formatter::{format_event, LogEvent, LogLevel};

    /// Backend that accepts everything and remembers nothing.
    struct NullBackend;

    impl BulkBackend for NullBackend {
        async fn bulk(
            &self,
            _index: &str,
            records: &[LogRecord],
        ) -> Result<BulkSummary, ShipperError> {
            Ok(BulkSummary {
                items: records.len(),
                failed: 0,
            })
        }
    }

    fn record(n: usize) -> LogRecord {
        format_event(LogEvent::new(LogLevel::Info, "test", format!("record {}", n)))
    }

    #[test]
    fn test_disabled_shipper_is_noop() {
        let shipper = LogShipper::disabled();
        assert!(!shipper.is_enabled());

        shipper.emit(record(1));
        assert_eq!(shipper.stats(), ShipperStats::default());
        assert_eq!(shipper.pending(), 0);
    }

    #[test]
    fn test_from_config_disabled_by_default() {
        let shipper = LogShipper::from_config(&ShipperConfig::default());
        assert!(!shipper.is_enabled());
    }

    #[test]
    fn test_from_config_invalid_falls_back_to_disabled() {
        let config = ShipperConfig {
            enabled: true,
            batch_size: 0,
            ..ShipperConfig::default()
        };
        assert!(!LogShipper::from_config(&config).is_enabled());
    }

    #[tokio::test]
    async fn test_emit_beyond_capacity_drops() {
        let config = ShipperConfig {
            queue_capacity: 8,
            ..ShipperConfig::default()
        };
        let shipper = LogShipper::spawn(&config, NullBackend);

        // No await between emits: the worker cannot drain on this runtime
        for n in 0..20 {
            shipper.emit(record(n));
        }

        let stats = shipper.stats();
        assert_eq!(stats.accepted, 8);
        assert_eq!(stats.dropped, 12);
        assert_eq!(shipper.pending(), 8);

        shipper.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let shipper = LogShipper::spawn(&ShipperConfig::default(), NullBackend);
        shipper.close().await;
        shipper.close().await;
        assert!(shipper.is_enabled());
    }
}
