//! Work item decoded from one queue message

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The only host whose issue tracker we know how to query
pub const GITHUB_HOST: &str = "github.com";

const FIELD_COUNT: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid message body: expected {expected} comma-separated fields, got {actual}")]
    FieldCount { expected: usize, actual: usize },
}

/// A package repository to check for bugs
///
/// Identity is `(host, owner, repo)`; `id` is the upstream record id and does
/// not take part in the cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub id: String,
    pub host: String,
    pub owner: String,
    pub repo: String,
}

impl WorkItem {
    /// Import path of the package, also the cache key: `host/owner/repo`
    pub fn path(&self) -> String {
        format!("{}/{}/{}", self.host, self.owner, self.repo)
    }

    pub fn is_supported(&self) -> bool {
        self.host == GITHUB_HOST
    }
}

impl FromStr for WorkItem {
    type Err = ParseError;

    /// Decode `id,host,owner,repo`
    fn from_str(body: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = body.split(',').collect();
        match fields.as_slice() {
            [id, host, owner, repo] => Ok(Self {
                id: id.to_string(),
                host: host.to_string(),
                owner: owner.to_string(),
                repo: repo.to_string(),
            }),
            _ => Err(ParseError::FieldCount {
                expected: FIELD_COUNT,
                actual: fields.len(),
            }),
        }
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}
