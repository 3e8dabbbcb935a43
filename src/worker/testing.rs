//! In-memory collaborators for dispatcher and worker tests

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::github::{self, FetchResponse, Issue, IssueApi, RateState};
use crate::package::WorkItem;
use crate::queue::{self, Delivery, WorkQueue};
use crate::store::{self, IssueSink, StoreError, TokenStore};

type Responder = Box<dyn Fn(&WorkItem, &str) -> github::Result<FetchResponse> + Send + Sync>;

pub fn healthy_rate() -> RateState {
    RateState {
        remaining: 5000,
        reset_at: chrono::Utc::now().timestamp() + 3600,
    }
}

pub fn test_issue(number: u64) -> Issue {
    Issue {
        api_url: format!("https://api.github.com/repos/pyk/byten/issues/{}", number),
        api_labels_url: String::new(),
        api_comments_url: String::new(),
        api_events_url: String::new(),
        url: format!("https://github.com/pyk/byten/issues/{}", number),
        github_id: 1000 + number,
        number,
        title: format!("bug {}", number),
        state: "open".to_string(),
        user: None,
    }
}

/// Scripted issue API that records every call
pub struct MockApi {
    rates: Mutex<VecDeque<github::Result<RateState>>>,
    responder: Responder,
    delay: Duration,
    rate_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    completed: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    conditions: Mutex<Vec<String>>,
    fetch_started: Mutex<Vec<Instant>>,
}

impl MockApi {
    /// Healthy budget, every fetch returns one issue and a token derived from the repo
    pub fn new() -> Self {
        Self::with_responder(|item, _etag| {
            Ok(FetchResponse::Modified {
                issues: vec![test_issue(1)],
                etag: Some(format!("\"etag-{}\"", item.repo)),
            })
        })
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&WorkItem, &str) -> github::Result<FetchResponse> + Send + Sync + 'static,
    {
        Self {
            rates: Mutex::new(VecDeque::new()),
            responder: Box::new(responder),
            delay: Duration::ZERO,
            rate_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            conditions: Mutex::new(Vec::new()),
            fetch_started: Mutex::new(Vec::new()),
        }
    }

    /// Every fetch sleeps this long before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue a rate-limit answer; once the script runs out the budget is healthy
    pub fn push_rate(&self, rate: github::Result<RateState>) {
        self.rates.lock().unwrap().push_back(rate);
    }

    pub fn rate_calls(&self) -> usize {
        self.rate_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// The `If-None-Match` value of each fetch, empty for unconditional ones
    pub fn conditions(&self) -> Vec<String> {
        self.conditions.lock().unwrap().clone()
    }

    pub fn fetch_started(&self) -> Vec<Instant> {
        self.fetch_started.lock().unwrap().clone()
    }
}

#[async_trait]
impl IssueApi for MockApi {
    async fn rate_limit(&self) -> github::Result<RateState> {
        self.rate_calls.fetch_add(1, Ordering::SeqCst);
        self.rates
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(healthy_rate()))
    }

    async fn fetch_issues(&self, item: &WorkItem, etag: &str) -> github::Result<FetchResponse> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.conditions.lock().unwrap().push(etag.to_string());
        self.fetch_started.lock().unwrap().push(Instant::now());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let response = (self.responder)(item, etag);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        response
    }
}

/// Token store and issue sink backed by hash maps
#[derive(Default)]
pub struct MockStore {
    tokens: Mutex<HashMap<String, String>>,
    issues: Mutex<HashMap<String, Vec<Issue>>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    calls: AtomicUsize,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(self, key: &str, token: &str) -> Self {
        self.tokens.lock().unwrap().insert(key.to_string(), token.to_string());
        self
    }

    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }

    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    pub fn token(&self, key: &str) -> Option<String> {
        self.tokens.lock().unwrap().get(key).cloned()
    }

    pub fn issues(&self, key: &str) -> Option<Vec<Issue>> {
        self.issues.lock().unwrap().get(key).cloned()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn io_error(what: &str) -> StoreError {
        StoreError::Io(std::io::Error::other(format!("{} failed", what)))
    }
}

#[async_trait]
impl TokenStore for MockStore {
    async fn get_token(&self, key: &str) -> store::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::io_error("read"));
        }
        Ok(self.token(key).unwrap_or_default())
    }

    async fn save_token(&self, key: &str, expected: &str, token: &str) -> store::Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::io_error("write"));
        }
        let mut tokens = self.tokens.lock().unwrap();
        let current = tokens.get(key).map(String::as_str).unwrap_or_default();
        if token.is_empty() || current != expected {
            return Ok(false);
        }
        tokens.insert(key.to_string(), token.to_string());
        Ok(true)
    }
}

#[async_trait]
impl IssueSink for MockStore {
    async fn store_issues(&self, item: &WorkItem, issues: &[Issue]) -> store::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.issues.lock().unwrap().insert(item.path(), issues.to_vec());
        Ok(())
    }
}

/// Scripted queue that cancels `shutdown` once it has handed out every message
///
/// Unacked messages come back once the script runs dry, the way a real queue
/// hands them out again after their visibility timeout.
pub struct MockQueue {
    script: Mutex<VecDeque<queue::Result<Option<String>>>>,
    unacked: Mutex<BTreeMap<u64, String>>,
    next_receipt: AtomicU64,
    shutdown: CancellationToken,
    receives: AtomicUsize,
    redeliveries: AtomicUsize,
}

impl MockQueue {
    pub fn new(messages: &[&str], shutdown: CancellationToken) -> Self {
        Self::scripted(
            messages.iter().map(|m| Ok(Some(m.to_string()))).collect(),
            shutdown,
        )
    }

    pub fn scripted(script: Vec<queue::Result<Option<String>>>, shutdown: CancellationToken) -> Self {
        Self {
            script: Mutex::new(script.into()),
            unacked: Mutex::new(BTreeMap::new()),
            next_receipt: AtomicU64::new(0),
            shutdown,
            receives: AtomicUsize::new(0),
            redeliveries: AtomicUsize::new(0),
        }
    }

    pub fn receives(&self) -> usize {
        self.receives.load(Ordering::SeqCst)
    }

    pub fn redeliveries(&self) -> usize {
        self.redeliveries.load(Ordering::SeqCst)
    }

    /// Bodies received but never acked
    pub fn unacked(&self) -> Vec<String> {
        self.unacked.lock().unwrap().values().cloned().collect()
    }

    fn next(&self) -> Option<queue::Result<Option<Delivery>>> {
        let scripted = self.script.lock().unwrap().pop_front();
        match scripted {
            Some(Ok(Some(body))) => {
                let receipt = self.next_receipt.fetch_add(1, Ordering::SeqCst);
                self.unacked.lock().unwrap().insert(receipt, body.clone());
                Some(Ok(Some(Delivery { receipt, body })))
            }
            Some(Ok(None)) => Some(Ok(None)),
            Some(Err(e)) => Some(Err(e)),
            None => {
                let (receipt, body) = self
                    .unacked
                    .lock()
                    .unwrap()
                    .first_key_value()
                    .map(|(receipt, body)| (*receipt, body.clone()))?;
                self.redeliveries.fetch_add(1, Ordering::SeqCst);
                Some(Ok(Some(Delivery { receipt, body })))
            }
        }
    }
}

#[async_trait]
impl WorkQueue for MockQueue {
    async fn receive_one(&self, wait: Duration) -> queue::Result<Option<Delivery>> {
        self.receives.fetch_add(1, Ordering::SeqCst);
        match self.next() {
            Some(result) => result,
            None => {
                self.shutdown.cancel();
                tokio::time::sleep(wait).await;
                Ok(None)
            }
        }
    }

    async fn ack(&self, receipt: u64) -> queue::Result<()> {
        self.unacked.lock().unwrap().remove(&receipt);
        Ok(())
    }
}
