//! Work queue intake
//!
//! The dispatcher needs two operations from the queue service: receive a
//! single raw message, waiting up to a bounded time for one to arrive, and
//! acknowledge it once its work has started. A received message that is never
//! acknowledged becomes visible again after the queue's visibility timeout, so
//! delivery is at least once. [`FjallQueue`] is the embedded implementation
//! used by the binary.

pub mod store;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::lockfile::LockError;

pub use store::FjallQueue;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("Receive failed: {0}")]
    Receive(String),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// A received message and the receipt that acknowledges it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub receipt: u64,
    pub body: String,
}

/// Source of raw work messages
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Receive at most one message, waiting up to `wait` for one to arrive.
    /// `Ok(None)` means the wait elapsed with nothing to deliver.
    async fn receive_one(&self, wait: Duration) -> Result<Option<Delivery>>;

    /// Delete a received message for good. Acking an unknown receipt is a no-op.
    async fn ack(&self, receipt: u64) -> Result<()>;
}
