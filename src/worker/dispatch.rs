//! The dispatch loop.
//!
//! One control loop pulls a single message at a time, gates it on the remote
//! rate budget, and launches fetch tasks onto a bounded in-flight set.
//!
//! ```text
//!   POLLING ──msg──► RATE_CHECK ──remaining > 0──► DISPATCHING ──slot free──► spawn, ack, POLLING
//!      ▲   ▲             │   │                         │
//!      │   └──error──────┘   └──remaining <= 0──┐      └──cap reached──► DRAINING ──► RATE_CHECK
//!      │                                        ▼
//!      └─────────── (same item) ◄──────────── BACKOFF (sleep until reset) ──► RATE_CHECK
//! ```
//!
//! A message is acknowledged once its fetch task is spawned, or once it is
//! discarded as malformed. Anything dropped before that (a failed rate check,
//! shutdown while waiting) stays unacknowledged and the queue delivers it again.
//! Items for unsupported hosts skip the rate check, since their task makes no
//! API call.
//!
//! The loop has no terminal state. Cancelling the shutdown token stops intake;
//! [`Dispatcher::run`] then waits for every in-flight task before returning.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use super::fetch::{FetchError, FetchOutcome, FetchWorker};
use super::rate::RateBudget;
use crate::config::Config;
use crate::github::RateState;
use crate::observability::{Metrics, MetricsSnapshot};
use crate::package::WorkItem;
use crate::queue::WorkQueue;

/// Settings the loop needs, taken from [`Config`] once at startup
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Upper bound on concurrently running fetch tasks
    pub max_concurrency: usize,
    /// Wait passed to each queue receive
    pub poll_wait: Duration,
    /// Deadline for a single fetch task
    pub task_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for DispatcherConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_concurrency: config.worker.max_concurrency.max(1),
            poll_wait: config.queue.wait.as_duration(),
            task_timeout: config.worker.task_timeout.as_duration(),
        }
    }
}

/// A decoded message the queue still holds until it is acked
#[derive(Debug)]
struct Pending {
    receipt: u64,
    item: WorkItem,
}

#[derive(Debug)]
enum State {
    Polling,
    RateCheck(Pending),
    Dispatching(Pending),
    Draining(Pending),
    Backoff(Pending, RateState),
}

pub struct Dispatcher {
    config: DispatcherConfig,
    queue: Arc<dyn WorkQueue>,
    budget: RateBudget,
    worker: FetchWorker,
    metrics: Arc<Metrics>,
    in_flight: JoinSet<()>,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        queue: Arc<dyn WorkQueue>,
        budget: RateBudget,
        worker: FetchWorker,
    ) -> Self {
        Self {
            config,
            queue,
            budget,
            worker,
            metrics: Arc::new(Metrics::new()),
            in_flight: JoinSet::new(),
        }
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Run until `shutdown` is cancelled, then drain in-flight tasks
    pub async fn run(&mut self, shutdown: CancellationToken) -> MetricsSnapshot {
        info!(
            max_concurrency = self.config.max_concurrency,
            poll_wait_secs = self.config.poll_wait.as_secs(),
            "Dispatcher started"
        );

        let mut state = State::Polling;
        while !shutdown.is_cancelled() {
            state = match state {
                State::Polling => self.poll(&shutdown).await,
                State::RateCheck(pending) => self.rate_check(pending).await,
                State::Dispatching(pending) => self.dispatch(pending).await,
                State::Draining(pending) => self.drain(pending).await,
                State::Backoff(pending, rate) => self.backoff(pending, rate, &shutdown).await,
            };
        }

        match state {
            State::Polling => {}
            State::RateCheck(pending)
            | State::Dispatching(pending)
            | State::Draining(pending)
            | State::Backoff(pending, _) => {
                warn!(
                    package = %pending.item,
                    id = %pending.item.id,
                    receipt = pending.receipt,
                    "Shutdown before dispatch, item left unacknowledged for redelivery"
                );
            }
        }

        info!(in_flight = self.in_flight.len(), "Shutdown requested, waiting for in-flight fetches");
        self.join_all().await;

        let snapshot = self.metrics.snapshot();
        info!(?snapshot, "Dispatcher stopped");
        snapshot
    }

    async fn poll(&mut self, shutdown: &CancellationToken) -> State {
        let received = tokio::select! {
            _ = shutdown.cancelled() => return State::Polling,
            received = self.queue.receive_one(self.config.poll_wait) => received,
        };

        let delivery = match received {
            Ok(Some(delivery)) => delivery,
            Ok(None) => {
                debug!("Empty receive, polling again");
                return State::Polling;
            }
            Err(e) => {
                warn!(error = %e, "Receive failed");
                return State::Polling;
            }
        };

        self.metrics.message_received();

        match delivery.body.parse::<WorkItem>() {
            Ok(item) => Self::gate(Pending {
                receipt: delivery.receipt,
                item,
            }),
            Err(e) => {
                warn!(error = %e, body = %delivery.body, "Discarding invalid message");
                self.metrics.message_discarded();
                self.ack(delivery.receipt).await;
                State::Polling
            }
        }
    }

    /// Unsupported hosts never reach the API, so they spend no rate budget
    fn gate(pending: Pending) -> State {
        if pending.item.is_supported() {
            State::RateCheck(pending)
        } else {
            debug!(package = %pending.item, "Unsupported host, skipping rate check");
            State::Dispatching(pending)
        }
    }

    async fn rate_check(&mut self, pending: Pending) -> State {
        match self.budget.check().await {
            Ok(rate) if rate.is_exhausted() => State::Backoff(pending, rate),
            Ok(_) => State::Dispatching(pending),
            Err(e) => {
                warn!(
                    package = %pending.item,
                    receipt = pending.receipt,
                    error = %e,
                    "Rate check failed, leaving item for redelivery"
                );
                self.metrics.rate_check_failed();
                State::Polling
            }
        }
    }

    async fn dispatch(&mut self, pending: Pending) -> State {
        self.reap_finished();

        if self.in_flight.len() >= self.config.max_concurrency {
            return State::Draining(pending);
        }

        let Pending { receipt, item } = pending;
        self.spawn_fetch(item);
        self.ack(receipt).await;
        State::Polling
    }

    async fn drain(&mut self, pending: Pending) -> State {
        info!(in_flight = self.in_flight.len(), "Concurrency cap reached, waiting for fetches to finish");
        self.metrics.drain();
        self.join_all().await;

        // Budget may have moved while we waited
        Self::gate(pending)
    }

    async fn backoff(&mut self, pending: Pending, rate: RateState, shutdown: &CancellationToken) -> State {
        let wait = rate.wait_from(Utc::now().timestamp());
        self.metrics.backoff();
        warn!(
            package = %pending.item,
            remaining = rate.remaining,
            reset_at = rate.reset_at,
            wait_secs = wait.as_secs(),
            "Rate limit exceeded, pausing until reset"
        );

        tokio::select! {
            _ = shutdown.cancelled() => return State::Backoff(pending, rate),
            _ = tokio::time::sleep(wait) => {}
        }

        info!("Rate limit reset, resuming");
        State::RateCheck(pending)
    }

    async fn ack(&self, receipt: u64) {
        if let Err(e) = self.queue.ack(receipt).await {
            warn!(receipt, error = %e, "Ack failed, message may be delivered again");
        }
    }

    fn spawn_fetch(&mut self, item: WorkItem) {
        let worker = self.worker.clone();
        let metrics = self.metrics.clone();
        let timeout = self.config.task_timeout;

        let task_id = Uuid::now_v7();
        let span = info_span!("fetch", %task_id, package = %item);

        self.in_flight.spawn(
            async move {
                let result = match tokio::time::timeout(timeout, worker.run(&item)).await {
                    Ok(result) => result,
                    Err(_) => Err(FetchError::Timeout(timeout)),
                };

                match result {
                    Ok(FetchOutcome::Skipped) => metrics.task_skipped(),
                    Ok(FetchOutcome::NotModified) => metrics.task_not_modified(),
                    Ok(FetchOutcome::Updated { .. }) => metrics.task_updated(),
                    Err(e) => {
                        error!(error = %e, "Fetch task failed");
                        metrics.task_failed();
                    }
                }
            }
            .instrument(span),
        );

        let in_flight = self.in_flight.len();
        self.metrics.task_dispatched(in_flight);
        debug!(%task_id, in_flight, "Fetch task started");
    }

    /// Drop handles of tasks that already finished so the set only counts running work
    fn reap_finished(&mut self) {
        while let Some(joined) = self.in_flight.try_join_next() {
            if let Err(e) = joined {
                error!(error = %e, "Fetch task panicked");
            }
        }
    }

    async fn join_all(&mut self) {
        while let Some(joined) = self.in_flight.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Fetch task panicked");
            }
        }
    }
}
