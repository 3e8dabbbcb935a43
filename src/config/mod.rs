//! Configuration management for packagebug
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use packagebug::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Max concurrent fetches: {}", config.worker.max_concurrency);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `PACKAGEBUG__<section>__<key>`
//!
//! Examples:
//! - `PACKAGEBUG__WORKER__MAX_CONCURRENCY=20`
//! - `PACKAGEBUG__QUEUE__WAIT=15s`
//! - `PACKAGEBUG__GITHUB__ROOT_ENDPOINT=https://github.example.com/api/v3`
//!
//! GitHub credentials are only read from `PACKAGEBUG_GITHUB_CLIENT_ID` and
//! `PACKAGEBUG_GITHUB_CLIENT_SECRET`.
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/packagebug.toml`.
//! This can be overridden using the `PACKAGEBUG_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use crate::humanize::HumanDuration;
pub use models::{Config, GithubConfig, QueueConfig, StoreConfig, WorkerConfig};
pub use validation::{MAX_POLL_WAIT, ValidationError};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is malformed or
    /// validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}
