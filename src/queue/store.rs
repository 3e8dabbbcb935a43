use super::{Delivery, Result, WorkQueue};
use crate::lockfile::DirLock;
use async_trait::async_trait;
use chrono::Utc;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How often an empty queue is re-checked during a long-poll receive
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long a received message stays hidden before it is handed out again
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// FjallQueue persists raw queue messages in an embedded Fjall keyspace
///
/// Layout:
/// - `messages` partition: u64 (big-endian) → message body (UTF-8)
/// - `inflight` partition: u64 (big-endian) → visibility deadline (i64 ms, big-endian) + body
/// - `metadata` partition: "next_seq" → u64
///
/// Big-endian keys keep the partition ordered by arrival, so the first key
/// is always the oldest message. A receive moves the message to `inflight`;
/// `ack` deletes it there. Expired in-flight messages move back under their
/// original key, and so does everything in `inflight` when the queue is
/// opened, since only one process can hold the keyspace.
#[derive(Clone)]
pub struct FjallQueue {
    keyspace: Keyspace,
    messages: PartitionHandle,
    inflight: PartitionHandle,
    metadata: PartitionHandle,
    seq_counter: Arc<AtomicU64>,
    visibility_timeout: Duration,
    // Serializes pop (read first + move) across concurrent receivers
    pop_lock: Arc<Mutex<()>>,
    _lock: Arc<DirLock>,
}

impl FjallQueue {
    /// Open or create a queue at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_visibility(path, DEFAULT_VISIBILITY_TIMEOUT)
    }

    /// Open or create a queue whose received messages reappear after `visibility_timeout`
    ///
    /// Fails with [`QueueError::Lock`](super::QueueError::Lock) while another
    /// process has the queue open.
    pub fn open_with_visibility<P: AsRef<Path>>(path: P, visibility_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening FjallQueue at: {}", path.display());

        let lock = DirLock::acquire(path)?;

        let keyspace = Config::new(path).open()?;

        let messages = keyspace.open_partition("messages", PartitionCreateOptions::default())?;
        let inflight = keyspace.open_partition("inflight", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;

        let current_seq = metadata
            .get(b"next_seq")?
            .map(|bytes| u64::from_be_bytes(bytes.as_ref().try_into().unwrap_or([0u8; 8])))
            .unwrap_or(0);

        let queue = Self {
            keyspace,
            messages,
            inflight,
            metadata,
            seq_counter: Arc::new(AtomicU64::new(current_seq)),
            visibility_timeout,
            pop_lock: Arc::new(Mutex::new(())),
            _lock: Arc::new(lock),
        };

        // Whoever received these is gone
        let restored = queue.requeue_inflight(i64::MAX)?;
        if restored > 0 {
            warn!(restored, "Returned unacknowledged messages to the queue");
        }

        info!("FjallQueue opened, current sequence: {}", current_seq);

        Ok(queue)
    }

    /// Append a message and return its sequence number
    pub fn enqueue(&self, body: &str) -> Result<u64> {
        let seq = self.seq_counter.fetch_add(1, Ordering::SeqCst);

        self.messages.insert(seq.to_be_bytes(), body.as_bytes())?;
        self.metadata.insert(b"next_seq", (seq + 1).to_be_bytes())?;

        debug!(seq, "Message enqueued");

        Ok(seq)
    }

    /// Hand out the oldest visible message and hide it until acked or expired
    pub async fn pop(&self) -> Result<Option<Delivery>> {
        let _guard = self.pop_lock.lock().await;

        let now = Utc::now().timestamp_millis();
        let expired = self.requeue_inflight(now)?;
        if expired > 0 {
            debug!(expired, "Visibility timeout lapsed, messages visible again");
        }

        let Some((key, value)) = self.messages.first_key_value()? else {
            return Ok(None);
        };

        let visibility_ms = i64::try_from(self.visibility_timeout.as_millis()).unwrap_or(i64::MAX);
        let deadline = now.saturating_add(visibility_ms);

        let mut batch = self.keyspace.batch();
        batch.insert(&self.inflight, key.clone(), encode_inflight(deadline, &value));
        batch.remove(&self.messages, key.clone());
        batch.commit()?;

        let receipt = decode_seq(&key);
        debug!(receipt, "Message received");

        Ok(Some(Delivery {
            receipt,
            body: String::from_utf8_lossy(&value).into_owned(),
        }))
    }

    /// Delete an in-flight message
    pub fn acknowledge(&self, receipt: u64) -> Result<()> {
        self.inflight.remove(receipt.to_be_bytes())?;
        debug!(receipt, "Message acknowledged");
        Ok(())
    }

    /// Move in-flight messages whose deadline is at or before `now_ms` back to
    /// `messages` under their original key. Returns how many moved.
    fn requeue_inflight(&self, now_ms: i64) -> Result<usize> {
        let mut expired = Vec::new();
        for entry in self.inflight.iter() {
            let (key, value) = entry?;
            let (deadline, body) = decode_inflight(&value);
            if deadline <= now_ms {
                expired.push((key, body.to_vec()));
            }
        }

        if expired.is_empty() {
            return Ok(0);
        }

        let count = expired.len();
        let mut batch = self.keyspace.batch();
        for (key, body) in expired {
            batch.insert(&self.messages, key.clone(), body);
            batch.remove(&self.inflight, key);
        }
        batch.commit()?;

        Ok(count)
    }

    /// Number of messages waiting
    pub fn len(&self) -> Result<usize> {
        Ok(self.messages.len()?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.messages.is_empty()?)
    }

    /// Number of received messages not yet acknowledged
    pub fn inflight_len(&self) -> Result<usize> {
        Ok(self.inflight.len()?)
    }

    /// Get current sequence counter value
    pub fn current_seq(&self) -> u64 {
        self.seq_counter.load(Ordering::SeqCst)
    }

    /// Flush all writes to disk
    pub fn flush(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }
}

fn decode_seq(key: &[u8]) -> u64 {
    u64::from_be_bytes(key.try_into().unwrap_or([0u8; 8]))
}

fn encode_inflight(deadline_ms: i64, body: &[u8]) -> Vec<u8> {
    let mut value = Vec::with_capacity(8 + body.len());
    value.extend_from_slice(&deadline_ms.to_be_bytes());
    value.extend_from_slice(body);
    value
}

/// Entries too short to carry a deadline count as already expired
fn decode_inflight(value: &[u8]) -> (i64, &[u8]) {
    match value.split_first_chunk::<8>() {
        Some((deadline, body)) => (i64::from_be_bytes(*deadline), body),
        None => (i64::MIN, value),
    }
}

#[async_trait]
impl WorkQueue for FjallQueue {
    async fn receive_one(&self, wait: Duration) -> Result<Option<Delivery>> {
        let deadline = Instant::now() + wait;

        loop {
            if let Some(delivery) = self.pop().await? {
                return Ok(Some(delivery));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn ack(&self, receipt: u64) -> Result<()> {
        self.acknowledge(receipt)
    }
}
