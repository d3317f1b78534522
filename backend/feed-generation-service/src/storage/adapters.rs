//! Local-filesystem storage adapters.
//!
//! Artifacts are date-partitioned JSONL files under an `active/` tier, with
//! retired artifacts moved to a sibling `cache/` tier. The same layout is
//! used by the object-store adapters, so keys sort identically in both.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::{FeedStorageAdapter, FeedTtlAdapter, SessionMetadataAdapter, SortField, StorageError};
use crate::models::{PreviousFeeds, SessionAnalytics, StoredFeed};

const FEEDS_PREFIX: &str = "custom_feeds";
const FEED_ANALYTICS_PREFIX: &str = "feed_analytics";
const SESSION_METADATA_FILE: &str = "rank_score_feed_sessions.jsonl";

/// Date component of a session timestamp, used as the partition key.
fn partition_date(session_timestamp: &str) -> &str {
    session_timestamp.get(..10).unwrap_or(session_timestamp)
}

/// Collect every file under `root`, depth-first. Missing roots yield an
/// empty list so callers can treat a fresh data directory as "no artifacts".
pub(crate) async fn collect_files(root: &Path) -> Result<Vec<PathBuf>, StorageError> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }

    Ok(files)
}

async fn write_jsonl_lines(path: &Path, lines: Vec<String>) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut body = lines.join("\n");
    body.push('\n');
    tokio::fs::write(path, body).await?;
    Ok(())
}

/// Feed and analytics writes on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalFeedStorageAdapter {
    root: PathBuf,
}

impl LocalFeedStorageAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn feeds_path(&self, session_timestamp: &str) -> PathBuf {
        self.root
            .join(FEEDS_PREFIX)
            .join("active")
            .join(partition_date(session_timestamp))
            .join(format!("custom_feeds_{session_timestamp}.jsonl"))
    }

    fn analytics_path(&self, session_timestamp: &str) -> PathBuf {
        self.root
            .join(FEED_ANALYTICS_PREFIX)
            .join("active")
            .join(partition_date(session_timestamp))
            .join(format!("feed_analytics_{session_timestamp}.jsonl"))
    }
}

#[async_trait]
impl FeedStorageAdapter for LocalFeedStorageAdapter {
    async fn write_feeds(
        &self,
        feeds: &[StoredFeed],
        session_timestamp: &str,
    ) -> Result<(), StorageError> {
        if feeds.is_empty() {
            warn!("no feeds to write, skipping feed export");
            return Ok(());
        }

        let mut lines = Vec::with_capacity(feeds.len());
        for feed in feeds {
            lines.push(serde_json::to_string(feed)?);
        }
        let path = self.feeds_path(session_timestamp);
        write_jsonl_lines(&path, lines).await?;
        debug!(path = %path.display(), count = feeds.len(), "wrote feed artifact");
        Ok(())
    }

    async fn write_session_analytics(
        &self,
        analytics: &SessionAnalytics,
        session_timestamp: &str,
    ) -> Result<(), StorageError> {
        let line = serde_json::to_string(analytics)?;
        let path = self.analytics_path(session_timestamp);
        write_jsonl_lines(&path, vec![line]).await?;
        debug!(path = %path.display(), "wrote session analytics artifact");
        Ok(())
    }

    async fn load_latest_feeds(&self) -> Result<PreviousFeeds, StorageError> {
        let active_root = self.root.join(FEEDS_PREFIX).join("active");
        let files = collect_files(&active_root).await?;

        // Latest feed per user across every active artifact. The timestamp
        // format is fixed-width, so string comparison is chronological.
        let mut latest: HashMap<String, (String, Vec<String>)> = HashMap::new();
        for file in files {
            let content = tokio::fs::read_to_string(&file).await?;
            for line in content.lines().filter(|l| !l.trim().is_empty()) {
                let feed: StoredFeed = serde_json::from_str(line)?;
                let uris: Vec<String> = feed.feed.into_iter().map(|post| post.item).collect();
                let is_newer = latest
                    .get(&feed.user_did)
                    .map_or(true, |(ts, _)| *ts < feed.feed_generation_timestamp);
                if is_newer {
                    latest.insert(feed.user_did, (feed.feed_generation_timestamp, uris));
                }
            }
        }

        let feeds = latest
            .into_iter()
            .map(|(user_did, (_, uris))| (user_did, uris.into_iter().collect()))
            .collect();
        Ok(PreviousFeeds { feeds })
    }
}

/// TTL on the local filesystem: retains the newest `keep_count` artifacts
/// under `<prefix>/active` and moves the rest to `<prefix>/cache`,
/// preserving their relative paths.
#[derive(Debug, Clone)]
pub struct LocalFeedTtlAdapter {
    root: PathBuf,
}

impl LocalFeedTtlAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl FeedTtlAdapter for LocalFeedTtlAdapter {
    async fn move_to_cache(
        &self,
        prefix: &str,
        keep_count: usize,
        sort_field: SortField,
    ) -> Result<usize, StorageError> {
        let active_root = self.root.join(prefix).join("active");
        let cache_root = self.root.join(prefix).join("cache");

        let files = collect_files(&active_root).await?;
        let mut keyed: Vec<(String, PathBuf)> = Vec::with_capacity(files.len());
        for file in files {
            let relative = file
                .strip_prefix(&active_root)
                .map_err(|e| StorageError::Other(e.to_string()))?
                .to_string_lossy()
                .into_owned();
            let key = match sort_field {
                SortField::Key => relative.clone(),
                SortField::LastModified => {
                    let modified = tokio::fs::metadata(&file).await?.modified()?;
                    let since_epoch = modified
                        .duration_since(std::time::UNIX_EPOCH)
                        .unwrap_or_default();
                    format!("{:020}|{relative}", since_epoch.as_secs())
                }
            };
            keyed.push((key, file));
        }

        // Ascending key order puts the oldest artifacts first.
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        if keyed.len() <= keep_count {
            debug!(prefix, total = keyed.len(), keep_count, "nothing to retire");
            return Ok(0);
        }

        let retire_count = keyed.len() - keep_count;
        for (_, file) in keyed.into_iter().take(retire_count) {
            let relative = file
                .strip_prefix(&active_root)
                .map_err(|e| StorageError::Other(e.to_string()))?
                .to_path_buf();
            let target = cache_root.join(&relative);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::rename(&file, &target).await?;
        }

        debug!(prefix, moved = retire_count, keep_count, "retired artifacts to cache tier");
        Ok(retire_count)
    }
}

/// Appends one metadata row per session to a flat JSONL table.
#[derive(Debug, Clone)]
pub struct LocalSessionMetadataAdapter {
    root: PathBuf,
}

impl LocalSessionMetadataAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn table_path(&self) -> PathBuf {
        self.root.join(SESSION_METADATA_FILE)
    }
}

#[async_trait]
impl SessionMetadataAdapter for LocalSessionMetadataAdapter {
    async fn insert_session_metadata(
        &self,
        analytics: &SessionAnalytics,
    ) -> Result<(), StorageError> {
        let path = self.table_path();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_string(analytics)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
