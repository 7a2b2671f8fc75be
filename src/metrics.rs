use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::retry::FailureCategory;

/// Hooks for observing requests, retries and splits made by the engine.
///
/// Implementations are shared by every worker and must be cheap; they run on
/// the request path.
pub trait EngineMetrics: Send + Sync {
    /// A request left for the transport.
    fn request_sent(&self, items: usize);

    /// A task will be re-sent after a failure in `category`.
    fn retry_scheduled(&self, category: FailureCategory);

    /// A task of `items` items was halved.
    fn task_split(&self, items: usize);

    /// A worker is about to sleep before retrying or splitting.
    fn backoff(&self, duration: Duration);

    /// A leaf task succeeded.
    fn task_succeeded(&self, items: usize);

    /// A leaf task failed terminally.
    fn task_failed(&self, items: usize);

    /// Number of tasks currently dispatched by one call.
    fn in_flight(&self, _tasks: usize) {}
}

/// Discards everything.
#[derive(Default)]
pub struct NoopMetrics;

impl EngineMetrics for NoopMetrics {
    fn request_sent(&self, _items: usize) {}
    fn retry_scheduled(&self, _category: FailureCategory) {}
    fn task_split(&self, _items: usize) {}
    fn backoff(&self, _duration: Duration) {}
    fn task_succeeded(&self, _items: usize) {}
    fn task_failed(&self, _items: usize) {}
}

/// Atomic counters for every hook.
#[derive(Default)]
pub struct CounterMetrics {
    /// Requests handed to the transport.
    pub requests: AtomicU64,
    /// Items carried by those requests, retries included.
    pub items_sent: AtomicU64,
    /// Retries after read timeouts.
    pub read_retries: AtomicU64,
    /// Retries after connection failures.
    pub connect_retries: AtomicU64,
    /// Retries after 429/502/503/504, splits included.
    pub status_retries: AtomicU64,
    /// Tasks halved.
    pub splits: AtomicU64,
    /// Backoff sleeps taken.
    pub backoffs: AtomicU64,
    /// Total backoff time in microseconds.
    pub backoff_micros: AtomicU64,
    /// Items in successful leaf tasks.
    pub items_succeeded: AtomicU64,
    /// Items in failed leaf tasks.
    pub items_failed: AtomicU64,
    /// Highest number of tasks dispatched at once.
    pub peak_in_flight: AtomicU64,
}

impl EngineMetrics for CounterMetrics {
    fn request_sent(&self, items: usize) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.items_sent.fetch_add(items as u64, Ordering::Relaxed);
    }

    fn retry_scheduled(&self, category: FailureCategory) {
        let counter = match category {
            FailureCategory::Read => &self.read_retries,
            FailureCategory::Connect => &self.connect_retries,
            FailureCategory::Status => &self.status_retries,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn task_split(&self, _items: usize) {
        self.splits.fetch_add(1, Ordering::Relaxed);
    }

    fn backoff(&self, duration: Duration) {
        self.backoffs.fetch_add(1, Ordering::Relaxed);
        self.backoff_micros
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    fn task_succeeded(&self, items: usize) {
        self.items_succeeded
            .fetch_add(items as u64, Ordering::Relaxed);
    }

    fn task_failed(&self, items: usize) {
        self.items_failed.fetch_add(items as u64, Ordering::Relaxed);
    }

    fn in_flight(&self, tasks: usize) {
        self.peak_in_flight
            .fetch_max(tasks as u64, Ordering::Relaxed);
    }
}

/// Returns [`NoopMetrics`] behind an [`Arc`].
pub fn default_metrics() -> Arc<dyn EngineMetrics> {
    Arc::new(NoopMetrics)
}
