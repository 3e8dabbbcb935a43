//! Remote issue tracker access
//!
//! [`IssueApi`] is the seam between the dispatch core and GitHub: one call to
//! read the rate-limit budget, one conditional call to list a repository's
//! bug issues. [`GithubClient`] is the HTTP implementation.

pub mod client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::package::WorkItem;

pub use client::{Credentials, GithubClient, issues_url, rate_limit_url};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Unexpected HTTP {status} for {path}")]
    Status { status: u16, path: String },

    #[error("Missing response header: {0}")]
    MissingHeader(&'static str),

    #[error("Invalid response header {name}: {value:?}")]
    InvalidHeader { name: &'static str, value: String },

    #[error("Failed to decode issues: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid client configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, ApiError>;

/// Snapshot of the API budget shared by every consumer of our credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateState {
    /// Calls left in the current window
    pub remaining: i64,
    /// Unix timestamp (seconds) at which the window resets
    pub reset_at: i64,
}

impl RateState {
    pub fn is_exhausted(&self) -> bool {
        self.remaining <= 0
    }

    /// Time left until the window resets, never negative
    pub fn wait_from(&self, now: i64) -> Duration {
        Duration::from_secs(self.reset_at.saturating_sub(now).max(0) as u64)
    }
}

/// Outcome of a conditional issue listing
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResponse {
    /// The cached token still matches (HTTP 304)
    NotModified,
    /// A fresh representation (HTTP 200)
    Modified {
        issues: Vec<Issue>,
        etag: Option<String>,
    },
}

/// A bug issue as returned by the issues endpoint
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Issue {
    #[serde(rename = "url")]
    pub api_url: String,
    #[serde(rename = "labels_url", default)]
    pub api_labels_url: String,
    #[serde(rename = "comments_url", default)]
    pub api_comments_url: String,
    #[serde(rename = "events_url", default)]
    pub api_events_url: String,
    #[serde(rename = "html_url")]
    pub url: String,
    #[serde(rename = "id")]
    pub github_id: u64,
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub state: String,
    pub user: Option<IssueCreator>,
}

/// Author of an issue
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct IssueCreator {
    #[serde(rename = "login")]
    pub username: String,
    #[serde(rename = "id")]
    pub github_id: u64,
    #[serde(default)]
    pub avatar_url: String,
    #[serde(default)]
    pub gravatar_id: String,
    #[serde(rename = "url", default)]
    pub api_profile_url: String,
    #[serde(rename = "html_url", default)]
    pub profile_url: String,
}

/// Remote issue tracker
#[async_trait]
pub trait IssueApi: Send + Sync {
    /// Read the current rate-limit budget
    async fn rate_limit(&self) -> Result<RateState>;

    /// List bug issues for `item`, conditioned on `etag` when it is non-empty
    async fn fetch_issues(&self, item: &WorkItem, etag: &str) -> Result<FetchResponse>;
}
