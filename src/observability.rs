//! Logging setup and dispatch counters

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber, honoring `RUST_LOG` (default `info`)
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Metrics handle for recording dispatch counters
#[derive(Debug, Default)]
pub struct Metrics {
    messages_received: AtomicU64,
    messages_discarded: AtomicU64,
    rate_check_failures: AtomicU64,
    backoffs: AtomicU64,
    drains: AtomicU64,
    tasks_dispatched: AtomicU64,
    tasks_updated: AtomicU64,
    tasks_not_modified: AtomicU64,
    tasks_skipped: AtomicU64,
    tasks_failed: AtomicU64,
    peak_in_flight: AtomicUsize,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_discarded(&self) {
        self.messages_discarded.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "messages_discarded", "Metric incremented");
    }

    pub fn rate_check_failed(&self) {
        self.rate_check_failures.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "rate_check_failures", "Metric incremented");
    }

    pub fn backoff(&self) {
        self.backoffs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn drain(&self) {
        self.drains.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a spawned task and the in-flight count right after it started
    pub fn task_dispatched(&self, in_flight: usize) {
        self.tasks_dispatched.fetch_add(1, Ordering::Relaxed);
        self.peak_in_flight.fetch_max(in_flight, Ordering::Relaxed);
    }

    pub fn task_updated(&self) {
        self.tasks_updated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_not_modified(&self) {
        self.tasks_not_modified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_skipped(&self) {
        self.tasks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "tasks_failed", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_discarded: self.messages_discarded.load(Ordering::Relaxed),
            rate_check_failures: self.rate_check_failures.load(Ordering::Relaxed),
            backoffs: self.backoffs.load(Ordering::Relaxed),
            drains: self.drains.load(Ordering::Relaxed),
            tasks_dispatched: self.tasks_dispatched.load(Ordering::Relaxed),
            tasks_updated: self.tasks_updated.load(Ordering::Relaxed),
            tasks_not_modified: self.tasks_not_modified.load(Ordering::Relaxed),
            tasks_skipped: self.tasks_skipped.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            peak_in_flight: self.peak_in_flight.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_received: u64,
    pub messages_discarded: u64,
    pub rate_check_failures: u64,
    pub backoffs: u64,
    pub drains: u64,
    pub tasks_dispatched: u64,
    pub tasks_updated: u64,
    pub tasks_not_modified: u64,
    pub tasks_skipped: u64,
    pub tasks_failed: u64,
    pub peak_in_flight: usize,
}

impl MetricsSnapshot {
    /// Tasks that have signalled completion, whatever the outcome
    pub fn tasks_completed(&self) -> u64 {
        self.tasks_updated + self.tasks_not_modified + self.tasks_skipped + self.tasks_failed
    }
}
