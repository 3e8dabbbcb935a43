use crate::humanize::HumanDuration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Work queue configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Location of the queue keyspace
    #[serde(default = "default_queue_endpoint")]
    pub endpoint: PathBuf,
    /// Region label, reported in logs only
    pub region: Option<String>,
    /// How long a single receive waits for a message
    #[serde(default = "default_wait")]
    pub wait: HumanDuration,
    /// How long a received message stays hidden before it is delivered again
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout: HumanDuration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            endpoint: default_queue_endpoint(),
            region: None,
            wait: default_wait(),
            visibility_timeout: default_visibility_timeout(),
        }
    }
}

fn default_queue_endpoint() -> PathBuf {
    PathBuf::from("data/queue")
}

fn default_wait() -> HumanDuration {
    HumanDuration::from_secs(10)
}

fn default_visibility_timeout() -> HumanDuration {
    HumanDuration::from_secs(30)
}

/// GitHub API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GithubConfig {
    #[serde(default = "default_root_endpoint")]
    pub root_endpoint: String,
    /// OAuth client id (loaded from environment, not from config file)
    #[serde(skip)]
    pub client_id: Option<String>,
    /// OAuth client secret (loaded from environment, not from config file)
    #[serde(skip)]
    pub client_secret: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Applies to the rate-limit check and to every issue fetch
    #[serde(default = "default_request_timeout")]
    pub request_timeout: HumanDuration,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            root_endpoint: default_root_endpoint(),
            client_id: None,
            client_secret: None,
            user_agent: default_user_agent(),
            request_timeout: default_request_timeout(),
        }
    }
}

fn default_root_endpoint() -> String {
    "https://api.github.com".to_string()
}

fn default_user_agent() -> String {
    "packagebug/0.1.0".to_string()
}

fn default_request_timeout() -> HumanDuration {
    HumanDuration::from_secs(30)
}

/// Token and issue store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/store")
}

/// Dispatcher configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Deadline for a single fetch task
    #[serde(default = "default_task_timeout")]
    pub task_timeout: HumanDuration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            task_timeout: default_task_timeout(),
        }
    }
}

fn default_max_concurrency() -> usize {
    10
}

fn default_task_timeout() -> HumanDuration {
    HumanDuration::from_secs(60)
}
