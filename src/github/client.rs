//! HTTP client for the GitHub REST API

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tracing::debug;
use url::form_urlencoded;

use super::{ApiError, FetchResponse, Issue, IssueApi, RateState, Result};
use crate::config::GithubConfig;
use crate::package::WorkItem;

const ACCEPT_V3: &str = "application/vnd.github.v3+json";
const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
const HEADER_RESET: &str = "X-RateLimit-Reset";
const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// OAuth application credentials sent as query parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl Credentials {
    pub fn from_config(config: &GithubConfig) -> Option<Self> {
        match (&config.client_id, &config.client_secret) {
            (Some(id), Some(secret)) => Some(Self {
                client_id: id.clone(),
                client_secret: secret.clone(),
            }),
            _ => None,
        }
    }

    fn append_to(&self, query: &mut form_urlencoded::Serializer<'_, String>) {
        query.append_pair("client_id", &self.client_id);
        query.append_pair("client_secret", &self.client_secret);
    }
}

/// `{root}/rate_limit?client_id=..&client_secret=..`
pub fn rate_limit_url(root: &str, credentials: Option<&Credentials>) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());
    if let Some(credentials) = credentials {
        credentials.append_to(&mut query);
    }
    with_query(format!("{}/rate_limit", root), query.finish())
}

/// `{root}/repos/{owner}/{repo}/issues?client_id=..&client_secret=..&labels=bug&state=all`
///
/// Parameters are emitted in sorted order.
pub fn issues_url(root: &str, owner: &str, repo: &str, credentials: Option<&Credentials>) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());
    if let Some(credentials) = credentials {
        credentials.append_to(&mut query);
    }
    query.append_pair("labels", "bug");
    query.append_pair("state", "all");
    with_query(format!("{}/repos/{}/{}/issues", root, owner, repo), query.finish())
}

fn with_query(base: String, query: String) -> String {
    if query.is_empty() {
        base
    } else {
        format!("{}?{}", base, query)
    }
}

/// GitHub API client
#[derive(Clone)]
pub struct GithubClient {
    client: Client,
    root: String,
    credentials: Option<Credentials>,
}

impl GithubClient {
    /// Create a new client; the request timeout bounds every call
    pub fn new(config: &GithubConfig) -> Result<Self> {
        let timeout = config.request_timeout.as_duration();

        let mut default_headers = HeaderMap::new();
        default_headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT_V3));

        let client = Client::builder()
            .connect_timeout(timeout.min(MAX_CONNECT_TIMEOUT))
            .timeout(timeout)
            .user_agent(&config.user_agent)
            .default_headers(default_headers)
            .build()
            .map_err(|e| ApiError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            client,
            root: config.root_endpoint.trim_end_matches('/').to_string(),
            credentials: Credentials::from_config(config),
        })
    }

    async fn get(&self, url: &str, etag: Option<&str>) -> Result<Response> {
        let mut request = self.client.get(url);
        if let Some(etag) = etag {
            request = request.header(header::IF_NONE_MATCH, etag);
        }

        // Strip the URL from errors: it carries the client secret
        request.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout
            } else {
                ApiError::RequestFailed(e.without_url().to_string())
            }
        })
    }
}

#[async_trait]
impl IssueApi for GithubClient {
    async fn rate_limit(&self) -> Result<RateState> {
        let url = rate_limit_url(&self.root, self.credentials.as_ref());
        let response = self.get(&url, None).await?;

        let remaining = header_i64(&response, HEADER_REMAINING)?;
        let reset_at = header_i64(&response, HEADER_RESET)?;

        debug!(remaining, reset_at, "Rate limit read");

        Ok(RateState { remaining, reset_at })
    }

    async fn fetch_issues(&self, item: &WorkItem, etag: &str) -> Result<FetchResponse> {
        let url = issues_url(&self.root, &item.owner, &item.repo, self.credentials.as_ref());
        let conditional = (!etag.is_empty()).then_some(etag);

        let response = self.get(&url, conditional).await?;
        let status = response.status();

        debug!(package = %item.path(), status = status.as_u16(), conditional = conditional.is_some(), "Fetched issues");

        match status {
            StatusCode::NOT_MODIFIED => Ok(FetchResponse::NotModified),
            StatusCode::OK => {
                let new_etag = response
                    .headers()
                    .get(header::ETAG)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);

                let body = response
                    .bytes()
                    .await
                    .map_err(|e| ApiError::RequestFailed(format!("Failed to read body: {}", e.without_url())))?;

                let issues: Vec<Issue> = serde_json::from_slice(&body)?;

                Ok(FetchResponse::Modified {
                    issues,
                    etag: new_etag,
                })
            }
            other => Err(ApiError::Status {
                status: other.as_u16(),
                path: item.path(),
            }),
        }
    }
}

fn header_i64(response: &Response, name: &'static str) -> Result<i64> {
    let value = response
        .headers()
        .get(name)
        .ok_or(ApiError::MissingHeader(name))?;

    let text = value.to_str().map_err(|_| ApiError::InvalidHeader {
        name,
        value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
    })?;

    text.trim().parse::<i64>().map_err(|_| ApiError::InvalidHeader {
        name,
        value: text.to_string(),
    })
}
