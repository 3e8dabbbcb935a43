//! Rate-limit gate consulted before every dispatch

use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::github::{ApiError, IssueApi, RateState};

#[derive(Debug, Error)]
pub enum RateError {
    #[error("Rate limit unavailable: {0}")]
    Unavailable(#[from] ApiError),
}

/// Reads the remote API budget. One request per call, no retry: retry policy
/// belongs to the dispatcher.
#[derive(Clone)]
pub struct RateBudget {
    api: Arc<dyn IssueApi>,
}

impl RateBudget {
    pub fn new(api: Arc<dyn IssueApi>) -> Self {
        Self { api }
    }

    /// Fetch the current budget. Never cached: other consumers of the same
    /// credentials spend it too.
    pub async fn check(&self) -> Result<RateState, RateError> {
        let state = self.api.rate_limit().await?;
        debug!(remaining = state.remaining, reset_at = state.reset_at, "Rate budget checked");
        Ok(state)
    }
}
