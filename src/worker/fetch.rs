//! One unit of work: conditional fetch of a package's bug issues

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::github::{ApiError, FetchResponse, IssueApi};
use crate::package::WorkItem;
use crate::store::{IssueSink, StoreError, TokenStore};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Failed to read cache token: {0}")]
    TokenRead(#[source] StoreError),

    #[error("Fetch failed: {0}")]
    Api(#[from] ApiError),

    #[error("Failed to store issues: {0}")]
    Issues(#[source] StoreError),

    #[error("Failed to persist cache token: {0}")]
    TokenWrite(#[source] StoreError),

    #[error("Fetch exceeded deadline of {0:?}")]
    Timeout(Duration),
}

pub type Result<T> = std::result::Result<T, FetchError>;

/// How a completed fetch ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Host has no supported issue tracker; nothing was touched
    Skipped,
    /// Remote still matches the cached token
    NotModified,
    /// New issue list stored; `token_saved` is false when the response had
    /// no token or a newer one was already stored
    Updated { issues: usize, token_saved: bool },
}

/// Runs the token/fetch/persist protocol for a single work item
#[derive(Clone)]
pub struct FetchWorker {
    api: Arc<dyn IssueApi>,
    tokens: Arc<dyn TokenStore>,
    sink: Arc<dyn IssueSink>,
}

impl FetchWorker {
    pub fn new(api: Arc<dyn IssueApi>, tokens: Arc<dyn TokenStore>, sink: Arc<dyn IssueSink>) -> Self {
        Self { api, tokens, sink }
    }

    /// Process one item. Errors are returned, never retried; a failure at any
    /// step leaves the stored token as it was.
    pub async fn run(&self, item: &WorkItem) -> Result<FetchOutcome> {
        if !item.is_supported() {
            debug!(package = %item, host = %item.host, "Unsupported host, skipping");
            return Ok(FetchOutcome::Skipped);
        }

        let key = item.path();

        let etag = self
            .tokens
            .get_token(&key)
            .await
            .map_err(FetchError::TokenRead)?;

        let response = self.api.fetch_issues(item, &etag).await?;

        let (issues, new_etag) = match response {
            FetchResponse::NotModified => {
                info!(package = %key, "Not modified");
                return Ok(FetchOutcome::NotModified);
            }
            FetchResponse::Modified { issues, etag } => (issues, etag),
        };

        // Issues first: if the token write then fails, the next cycle
        // refetches with the old token and stores them again
        self.sink
            .store_issues(item, &issues)
            .await
            .map_err(FetchError::Issues)?;

        let token_saved = match new_etag.as_deref() {
            Some(new_etag) if !new_etag.is_empty() => self
                .tokens
                .save_token(&key, &etag, new_etag)
                .await
                .map_err(FetchError::TokenWrite)?,
            _ => {
                warn!(package = %key, "Response carried no cache token");
                false
            }
        };

        info!(package = %key, issues = issues.len(), token_saved, "Fetched issues");

        Ok(FetchOutcome::Updated {
            issues: issues.len(),
            token_saved,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::testing::{MockApi, MockStore, test_issue};

    const PATH: &str = "github.com/pyk/byten";

    fn item(host: &str) -> WorkItem {
        format!("42,{},pyk,byten", host).parse().unwrap()
    }

    fn worker(api: &Arc<MockApi>, store: &Arc<MockStore>) -> FetchWorker {
        FetchWorker::new(api.clone(), store.clone(), store.clone())
    }

    #[tokio::test]
    async fn test_unsupported_host_is_noop() {
        let api = Arc::new(MockApi::new());
        let store = Arc::new(MockStore::new());

        let outcome = worker(&api, &store).run(&item("bitbucket.org")).await.unwrap();

        assert_eq!(outcome, FetchOutcome::Skipped);
        assert_eq!(api.fetch_calls(), 0);
        assert_eq!(api.rate_calls(), 0);
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn test_first_fetch_is_unconditional_and_saves_token() {
        let api = Arc::new(MockApi::new());
        let store = Arc::new(MockStore::new());

        let outcome = worker(&api, &store).run(&item("github.com")).await.unwrap();

        assert_eq!(outcome, FetchOutcome::Updated { issues: 1, token_saved: true });
        assert_eq!(api.conditions(), vec![String::new()]);
        assert_eq!(store.token(PATH).as_deref(), Some("\"etag-byten\""));
        assert_eq!(store.issues(PATH).unwrap(), vec![test_issue(1)]);
    }

    #[tokio::test]
    async fn test_not_modified_leaves_token() {
        let api = Arc::new(MockApi::with_responder(|_, _| Ok(FetchResponse::NotModified)));
        let store = Arc::new(MockStore::new().with_token(PATH, "\"T\""));

        let outcome = worker(&api, &store).run(&item("github.com")).await.unwrap();

        assert_eq!(outcome, FetchOutcome::NotModified);
        assert_eq!(api.conditions(), vec!["\"T\"".to_string()]);
        assert_eq!(store.token(PATH).as_deref(), Some("\"T\""));
        assert!(store.issues(PATH).is_none());
    }

    #[tokio::test]
    async fn test_sequential_runs_never_downgrade_token() {
        // Each response's token is the request token plus one more tick
        let api = Arc::new(MockApi::with_responder(|_, etag| {
            Ok(FetchResponse::Modified {
                issues: vec![],
                etag: Some(format!("{}+", etag)),
            })
        }));
        let store = Arc::new(MockStore::new());
        let worker = worker(&api, &store);

        worker.run(&item("github.com")).await.unwrap();
        let first = store.token(PATH).unwrap();
        worker.run(&item("github.com")).await.unwrap();
        let second = store.token(PATH).unwrap();

        assert_eq!(first, "+");
        assert_eq!(second, "++");
        assert_eq!(api.conditions(), vec![String::new(), "+".to_string()]);
    }

    #[tokio::test]
    async fn test_api_error_leaves_token() {
        let api = Arc::new(MockApi::with_responder(|item, _| {
            Err(ApiError::Status { status: 502, path: item.path() })
        }));
        let store = Arc::new(MockStore::new().with_token(PATH, "\"T\""));

        let result = worker(&api, &store).run(&item("github.com")).await;

        assert!(matches!(result, Err(FetchError::Api(ApiError::Status { status: 502, .. }))));
        assert_eq!(store.token(PATH).as_deref(), Some("\"T\""));
    }

    #[tokio::test]
    async fn test_token_read_failure_skips_fetch() {
        let api = Arc::new(MockApi::new());
        let store = Arc::new(MockStore::new());
        store.fail_reads();

        let result = worker(&api, &store).run(&item("github.com")).await;

        assert!(matches!(result, Err(FetchError::TokenRead(_))));
        assert_eq!(api.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_prior_token() {
        let api = Arc::new(MockApi::new());
        let store = Arc::new(MockStore::new().with_token(PATH, "\"old\""));
        store.fail_writes();

        let result = worker(&api, &store).run(&item("github.com")).await;

        assert!(matches!(result, Err(FetchError::TokenWrite(_))));
        assert_eq!(store.token(PATH).as_deref(), Some("\"old\""));
    }

    #[tokio::test]
    async fn test_missing_response_token_is_not_saved() {
        let api = Arc::new(MockApi::with_responder(|_, _| {
            Ok(FetchResponse::Modified { issues: vec![test_issue(7)], etag: None })
        }));
        let store = Arc::new(MockStore::new().with_token(PATH, "\"T\""));

        let outcome = worker(&api, &store).run(&item("github.com")).await.unwrap();

        assert_eq!(outcome, FetchOutcome::Updated { issues: 1, token_saved: false });
        assert_eq!(store.token(PATH).as_deref(), Some("\"T\""));
        assert_eq!(store.issues(PATH).unwrap()[0].number, 7);
    }
}
