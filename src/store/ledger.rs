use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::{debug, info, warn};

use super::error::Result;
use super::partitions::{decode_etag_key, encode_etag_key, encode_issues_key};
use super::{IssueSink, IssueSnapshot, TokenStore};
use crate::github::Issue;
use crate::lockfile::DirLock;
use crate::package::WorkItem;

/// Fjall-backed persistent storage for cache tokens and issue snapshots
#[derive(Clone)]
pub struct FjallStore {
    keyspace: Keyspace,
    etags: PartitionHandle,
    issues: PartitionHandle,
    // Makes the read-compare-write in `save_token` atomic within the process
    swap_lock: Arc<Mutex<()>>,
    _lock: Arc<DirLock>,
}

impl FjallStore {
    /// Open or create a Fjall store at the given path. Fails while another
    /// process has it open.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening Fjall store at: {}", path.display());

        let lock = DirLock::acquire(path)?;

        let keyspace = Config::new(path).open()?;

        let etags = keyspace.open_partition("etags", PartitionCreateOptions::default())?;
        let issues = keyspace.open_partition("issues", PartitionCreateOptions::default())?;

        info!("Fjall store opened successfully");
        Ok(Self {
            keyspace,
            etags,
            issues,
            swap_lock: Arc::new(Mutex::new(())),
            _lock: Arc::new(lock),
        })
    }

    /// Read the stored token for a package path, empty when none
    pub fn token(&self, path: &str) -> Result<String> {
        match self.etags.get(encode_etag_key(path))? {
            Some(value) => Ok(String::from_utf8_lossy(&value).into_owned()),
            None => Ok(String::new()),
        }
    }

    /// Replace the token for `path` only if the stored value still equals
    /// `expected`. Returns whether the write happened.
    pub fn compare_and_swap_token(&self, path: &str, expected: &str, token: &str) -> Result<bool> {
        if token.is_empty() {
            return Ok(false);
        }

        let _guard = self.swap_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let current = self.token(path)?;
        if current != expected {
            warn!(package = path, "Cache token changed since fetch started, keeping newer value");
            return Ok(false);
        }

        self.etags.insert(encode_etag_key(path), token.as_bytes())?;
        debug!(package = path, "Saved cache token");
        Ok(true)
    }

    /// All stored tokens as `(path, token)` pairs
    pub fn tokens(&self) -> Result<Vec<(String, String)>> {
        let mut results = Vec::new();

        for item in self.etags.iter() {
            let (key, value) = item?;
            if let Some(path) = decode_etag_key(&key) {
                results.push((path, String::from_utf8_lossy(&value).into_owned()));
            }
        }

        Ok(results)
    }

    /// Store the latest issue list for a package
    pub fn upsert_issues(&self, path: &str, issues: &[Issue]) -> Result<()> {
        let snapshot = IssueSnapshot {
            path: path.to_string(),
            fetched_at: Utc::now(),
            issues: issues.to_vec(),
        };
        let value = serde_json::to_vec(&snapshot)?;
        self.issues.insert(encode_issues_key(path), value)?;
        debug!(package = path, count = issues.len(), "Upserted issues");
        Ok(())
    }

    /// Get the latest issue snapshot for a package
    pub fn issues(&self, path: &str) -> Result<Option<IssueSnapshot>> {
        match self.issues.get(encode_issues_key(path))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for FjallStore {
    async fn get_token(&self, key: &str) -> Result<String> {
        self.token(key)
    }

    async fn save_token(&self, key: &str, expected: &str, token: &str) -> Result<bool> {
        self.compare_and_swap_token(key, expected, token)
    }
}

#[async_trait]
impl IssueSink for FjallStore {
    async fn store_issues(&self, item: &WorkItem, issues: &[Issue]) -> Result<()> {
        self.upsert_issues(&item.path(), issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use tempfile::TempDir;

    const PATH: &str = "github.com/pyk/byten";

    fn create_test_store() -> (FjallStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FjallStore::open(temp_dir.path().join("test_store")).unwrap();
        (store, temp_dir)
    }

    fn create_test_issue(number: u64) -> Issue {
        Issue {
            api_url: format!("https://api.github.com/repos/pyk/byten/issues/{}", number),
            api_labels_url: String::new(),
            api_comments_url: String::new(),
            api_events_url: String::new(),
            url: format!("https://github.com/pyk/byten/issues/{}", number),
            github_id: 1000 + number,
            number,
            title: format!("bug {}", number),
            state: "open".to_string(),
            user: None,
        }
    }

    #[test]
    fn test_missing_token_is_empty() {
        let (store, _temp) = create_test_store();
        assert_eq!(store.token(PATH).unwrap(), "");
    }

    #[test]
    fn test_first_save_from_empty() {
        let (store, _temp) = create_test_store();

        assert!(store.compare_and_swap_token(PATH, "", "\"v1\"").unwrap());
        assert_eq!(store.token(PATH).unwrap(), "\"v1\"");
    }

    #[test]
    fn test_swap_refused_when_stale() {
        let (store, _temp) = create_test_store();
        store.compare_and_swap_token(PATH, "", "\"v1\"").unwrap();
        store.compare_and_swap_token(PATH, "\"v1\"", "\"v2\"").unwrap();

        // A slow fetch that started from v1 must not roll the key back
        assert!(!store.compare_and_swap_token(PATH, "\"v1\"", "\"v1b\"").unwrap());
        assert_eq!(store.token(PATH).unwrap(), "\"v2\"");
    }

    #[test]
    fn test_empty_token_never_written() {
        let (store, _temp) = create_test_store();
        store.compare_and_swap_token(PATH, "", "\"v1\"").unwrap();

        assert!(!store.compare_and_swap_token(PATH, "\"v1\"", "").unwrap());
        assert_eq!(store.token(PATH).unwrap(), "\"v1\"");
    }

    #[test]
    fn test_keys_are_independent() {
        let (store, _temp) = create_test_store();
        store.compare_and_swap_token(PATH, "", "\"a\"").unwrap();
        store.compare_and_swap_token("github.com/pyk/other", "", "\"b\"").unwrap();

        let mut tokens = store.tokens().unwrap();
        tokens.sort();
        assert_eq!(
            tokens,
            vec![
                ("github.com/pyk/byten".to_string(), "\"a\"".to_string()),
                ("github.com/pyk/other".to_string(), "\"b\"".to_string()),
            ]
        );
    }

    #[test]
    fn test_upsert_and_get_issues() {
        let (store, _temp) = create_test_store();

        store.upsert_issues(PATH, &[create_test_issue(1), create_test_issue(2)]).unwrap();

        let snapshot = store.issues(PATH).unwrap().unwrap();
        assert_eq!(snapshot.path, PATH);
        assert_eq!(snapshot.issues.len(), 2);
        assert_eq!(snapshot.issues[1].number, 2);

        assert!(store.issues("github.com/nobody/nothing").unwrap().is_none());
    }

    #[test]
    fn test_second_open_is_refused_while_held() {
        let (_store, temp_dir) = create_test_store();

        let result = FjallStore::open(temp_dir.path().join("test_store"));

        assert!(matches!(result, Err(StoreError::Lock(ref e)) if e.is_held()));
    }

    #[test]
    fn test_persistence_across_reopens() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test_store");

        {
            let store = FjallStore::open(&path).unwrap();
            store.compare_and_swap_token(PATH, "", "\"v1\"").unwrap();
            store.persist().unwrap();
        }

        let store = FjallStore::open(&path).unwrap();
        assert_eq!(store.token(PATH).unwrap(), "\"v1\"");
    }
}
