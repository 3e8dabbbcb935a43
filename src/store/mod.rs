/// Durable storage for conditional-request tokens and fetched issues
///
/// Packages are keyed by their import path `host/owner/repo`. The dispatch
/// core talks to storage only through [`TokenStore`] and [`IssueSink`];
/// [`FjallStore`] implements both on an embedded Fjall keyspace.
///
/// ## Token protocol
///
/// A token is read before a fetch and written after a fetch that returned a
/// new one. The write is a compare-and-swap against the token the fetch was
/// conditioned on, so a slow fetch can never replace a newer token with an
/// older one.
///
/// ## Usage
///
/// ```rust,ignore
/// use packagebug::store::FjallStore;
///
/// let store = FjallStore::open("data/store")?;
/// let etag = store.token("github.com/pyk/byten")?;
/// ```
pub mod error;
pub mod ledger;
pub mod partitions;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::github::Issue;
use crate::package::WorkItem;

pub use error::{Result, StoreError};
pub use ledger::FjallStore;

/// Latest issue list fetched for a package
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueSnapshot {
    pub path: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub fetched_at: DateTime<Utc>,
    pub issues: Vec<Issue>,
}

/// Per-package cache token storage
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Stored token for `key`; a miss is an empty string, not an error
    async fn get_token(&self, key: &str) -> Result<String>;

    /// Write `token` for `key` if the stored value still equals `expected`.
    /// Returns `Ok(false)` when the write was refused.
    async fn save_token(&self, key: &str, expected: &str, token: &str) -> Result<bool>;
}

/// Receiver of freshly fetched issue lists
#[async_trait]
pub trait IssueSink: Send + Sync {
    async fn store_issues(&self, item: &WorkItem, issues: &[Issue]) -> Result<()>;
}
