//! Local-filesystem provider implementations. Each provider reads the batch
//! artifacts its upstream service leaves on the shared data root.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use super::{
    ExclusionProvider, PostProvider, SocialGraphProvider, StudyUserProvider,
    SuperposterProvider, SuperposterSource,
};
use crate::models::{EnrichedPost, ExclusionLists, StudyUser, TIMESTAMP_FORMAT};
use crate::storage::StorageError;

const SUPERPOSTER_FILE_PREFIX: &str = "daily_superposters_";

fn parse_jsonl<T: serde::de::DeserializeOwned>(content: &str) -> Result<Vec<T>, StorageError> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(StorageError::from))
        .collect()
}

async fn read_jsonl_file<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<Vec<T>, StorageError> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_jsonl(&content)
}

/// Reads the participant registry artifact.
#[derive(Debug, Clone)]
pub struct LocalStudyUserProvider {
    path: PathBuf,
}

impl LocalStudyUserProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl StudyUserProvider for LocalStudyUserProvider {
    async fn get_all(&self, test_mode: bool) -> Result<Vec<StudyUser>, StorageError> {
        let users: Vec<StudyUser> = read_jsonl_file(&self.path).await?;
        let users = if test_mode {
            users.into_iter().filter(|u| !u.is_study_user).collect()
        } else {
            users
        };
        info!(count = users.len(), test_mode, "loaded study users");
        Ok(users)
    }
}

#[derive(Debug, Deserialize)]
struct SocialGraphRecord {
    user_did: String,
    follows: Vec<String>,
}

/// Reads the scraped social-network artifact.
#[derive(Debug, Clone)]
pub struct LocalSocialGraphProvider {
    path: PathBuf,
}

impl LocalSocialGraphProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SocialGraphProvider for LocalSocialGraphProvider {
    async fn load(&self) -> Result<HashMap<String, Vec<String>>, StorageError> {
        let records: Vec<SocialGraphRecord> = read_jsonl_file(&self.path).await?;
        let map: HashMap<String, Vec<String>> = records
            .into_iter()
            .map(|record| (record.user_did, record.follows))
            .collect();
        info!(count = map.len(), "loaded social graph entries");
        Ok(map)
    }
}

#[derive(Debug, Deserialize)]
struct SuperposterRecord {
    author_did: String,
    #[allow(dead_code)]
    count: u64,
}

/// Reads the newest superposter batch artifact.
#[derive(Debug, Clone)]
pub struct LocalSuperposterProvider {
    /// Directory holding `daily_superposters_<timestamp>.jsonl` batches.
    batch_dir: PathBuf,
}

impl LocalSuperposterProvider {
    pub fn new(batch_dir: impl Into<PathBuf>) -> Self {
        Self {
            batch_dir: batch_dir.into(),
        }
    }

    /// Timestamp component of a batch file name, if it is one.
    fn batch_timestamp(file_name: &str) -> Option<&str> {
        file_name
            .strip_prefix(SUPERPOSTER_FILE_PREFIX)?
            .strip_suffix(".jsonl")
    }
}

#[async_trait]
impl SuperposterProvider for LocalSuperposterProvider {
    async fn load_latest(
        &self,
        source: SuperposterSource,
        lookback_timestamp: Option<DateTime<Utc>>,
    ) -> Result<HashSet<String>, StorageError> {
        if source == SuperposterSource::Remote {
            return Err(StorageError::Other(
                "remote superposter source requires a warehouse adapter".to_string(),
            ));
        }

        let lookback = lookback_timestamp.map(|ts| ts.format(TIMESTAMP_FORMAT).to_string());

        let mut newest: Option<(String, PathBuf)> = None;
        let mut entries = match tokio::fs::read_dir(&self.batch_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("no superposter batches found");
                return Ok(HashSet::new());
            }
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let Some(timestamp) = Self::batch_timestamp(&file_name) else {
                continue;
            };
            // The timestamp format is fixed-width, so string comparison is
            // chronological.
            if let Some(cutoff) = &lookback {
                if timestamp < cutoff.as_str() {
                    continue;
                }
            }
            let is_newer = newest
                .as_ref()
                .map_or(true, |(best, _)| timestamp > best.as_str());
            if is_newer {
                newest = Some((timestamp.to_string(), entry.path()));
            }
        }

        let Some((timestamp, path)) = newest else {
            warn!("no superposters found in latest batch");
            return Ok(HashSet::new());
        };

        let records: Vec<SuperposterRecord> = read_jsonl_file(&path).await?;
        let dids: HashSet<String> = records.into_iter().map(|r| r.author_did).collect();
        info!(count = dids.len(), batch = %timestamp, "loaded superposters");
        Ok(dids)
    }
}

/// Reads the consolidated enriched-post artifact.
#[derive(Debug, Clone)]
pub struct LocalPostProvider {
    path: PathBuf,
}

impl LocalPostProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PostProvider for LocalPostProvider {
    async fn load_enriched(
        &self,
        lookback_timestamp: DateTime<Utc>,
    ) -> Result<Vec<EnrichedPost>, StorageError> {
        let posts: Vec<EnrichedPost> = read_jsonl_file(&self.path).await?;
        let total = posts.len();
        let posts: Vec<EnrichedPost> = posts
            .into_iter()
            .filter(|post| post.consolidation_timestamp >= lookback_timestamp)
            .collect();
        info!(
            loaded = posts.len(),
            dropped = total - posts.len(),
            "loaded enriched posts within lookback window"
        );
        Ok(posts)
    }
}

/// Reads the manually curated author exclusion lists. A missing file means
/// nobody is excluded.
#[derive(Debug, Clone)]
pub struct LocalExclusionProvider {
    path: PathBuf,
}

impl LocalExclusionProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ExclusionProvider for LocalExclusionProvider {
    async fn load(&self) -> Result<ExclusionLists, StorageError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "no exclusion list found, excluding nobody");
                return Ok(ExclusionLists::default());
            }
            Err(e) => return Err(e.into()),
        };
        let lists: ExclusionLists = serde_json::from_str(&content)?;
        info!(
            handles = lists.handles_excluded.len(),
            dids = lists.dids_excluded.len(),
            "loaded author exclusion lists"
        );
        Ok(lists)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    async fn write_file(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.unwrap();
        }
        tokio::fs::write(path, content).await.unwrap();
    }

    #[tokio::test]
    async fn study_user_provider_filters_test_cohort() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("study_users.jsonl");
        write_file(
            &path,
            concat!(
                r#"{"user_did":"did:plc:a","handle":"a.test","condition":"engagement","is_study_user":true}"#,
                "\n",
                r#"{"user_did":"did:plc:b","handle":"b.test","condition":"reverse_chronological","is_study_user":false}"#,
                "\n",
            ),
        )
        .await;

        let provider = LocalStudyUserProvider::new(&path);
        let all = provider.get_all(false).await.unwrap();
        assert_eq!(all.len(), 2);

        let mocks = provider.get_all(true).await.unwrap();
        assert_eq!(mocks.len(), 1);
        assert_eq!(mocks[0].user_did, "did:plc:b");
    }

    #[tokio::test]
    async fn superposter_provider_picks_newest_batch_within_lookback() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            &dir.path().join("daily_superposters_2024-05-01-00:00:00.jsonl"),
            "{\"author_did\":\"did:plc:old\",\"count\":99}\n",
        )
        .await;
        write_file(
            &dir.path().join("daily_superposters_2024-05-03-00:00:00.jsonl"),
            "{\"author_did\":\"did:plc:new\",\"count\":42}\n",
        )
        .await;

        let provider = LocalSuperposterProvider::new(dir.path());
        let lookback = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap();
        let dids = provider
            .load_latest(SuperposterSource::Local, Some(lookback))
            .await
            .unwrap();

        assert_eq!(dids.len(), 1);
        assert!(dids.contains("did:plc:new"));
    }

    #[tokio::test]
    async fn superposter_provider_returns_empty_set_when_no_batches_match() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalSuperposterProvider::new(dir.path().join("missing"));
        let dids = provider
            .load_latest(SuperposterSource::Local, None)
            .await
            .unwrap();
        assert!(dids.is_empty());
    }

    #[tokio::test]
    async fn superposter_provider_rejects_remote_source() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalSuperposterProvider::new(dir.path());
        let result = provider.load_latest(SuperposterSource::Remote, None).await;
        assert!(matches!(result, Err(StorageError::Other(_))));
    }

    #[tokio::test]
    async fn post_provider_applies_the_lookback_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("consolidated_enriched_post_records.jsonl");
        write_file(
            &path,
            concat!(
                r#"{"uri":"at://p1","author_did":"did:plc:a","author_handle":"a.test","text":"hi","source":"firehose","synctimestamp":"2024-05-03T00:00:00Z","consolidation_timestamp":"2024-05-03T01:00:00Z"}"#,
                "\n",
                r#"{"uri":"at://p2","author_did":"did:plc:b","author_handle":"b.test","text":"old","source":"most_liked","synctimestamp":"2024-04-01T00:00:00Z","consolidation_timestamp":"2024-04-01T01:00:00Z"}"#,
                "\n",
            ),
        )
        .await;

        let provider = LocalPostProvider::new(&path);
        let lookback = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let posts = provider.load_enriched(lookback).await.unwrap();

        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].uri, "at://p1");
    }

    #[tokio::test]
    async fn exclusion_provider_defaults_to_empty_lists() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalExclusionProvider::new(dir.path().join("missing.json"));
        let lists = provider.load().await.unwrap();
        assert!(lists.handles_excluded.is_empty());
        assert!(lists.dids_excluded.is_empty());
    }

    #[tokio::test]
    async fn exclusion_provider_reads_both_lists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("excluded_authors.json");
        write_file(
            &path,
            r#"{"handles_excluded":["bad.bsky.social"],"dids_excluded":["did:plc:spam"]}"#,
        )
        .await;

        let provider = LocalExclusionProvider::new(&path);
        let lists = provider.load().await.unwrap();
        assert!(lists.handles_excluded.contains("bad.bsky.social"));
        assert!(lists.dids_excluded.contains("did:plc:spam"));
    }
}
