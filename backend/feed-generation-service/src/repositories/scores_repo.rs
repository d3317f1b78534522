//! Repository for the per-post score cache.

use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::models::{CachedScoreRecord, PostScoreByAlgorithm, TIMESTAMP_FORMAT};
use crate::storage::adapters::collect_files;
use crate::storage::StorageError;

const SCORES_PREFIX: &str = "post_scores";

/// Score cache contract. Reads degrade to an empty cache on storage
/// failure; writes surface errors.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScoresRepository: Send + Sync {
    /// Cached score pairs within the lookback window, deduplicated by URI
    /// (latest `scored_timestamp` wins), with incomplete rows dropped.
    async fn load_cached_scores(&self, lookback_days: i64) -> Vec<PostScoreByAlgorithm>;

    /// Append newly computed score rows. No-op on empty input.
    async fn save_scores(&self, scores: Vec<CachedScoreRecord>) -> Result<(), StorageError>;
}

/// JSONL-file score cache, date-partitioned like every other artifact.
#[derive(Debug, Clone)]
pub struct JsonlScoresRepository {
    root: PathBuf,
}

impl JsonlScoresRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn active_root(&self) -> PathBuf {
        self.root.join(SCORES_PREFIX).join("active")
    }

    async fn load_cached_scores_inner(
        &self,
        lookback_days: i64,
    ) -> Result<Vec<PostScoreByAlgorithm>, StorageError> {
        let cutoff = Utc::now() - Duration::days(lookback_days);

        let mut records: Vec<CachedScoreRecord> = Vec::new();
        for file in collect_files(&self.active_root()).await? {
            let content = tokio::fs::read_to_string(&file).await?;
            for line in content.lines().filter(|l| !l.trim().is_empty()) {
                let record: CachedScoreRecord = serde_json::from_str(line)?;
                if record.scored_timestamp >= cutoff {
                    records.push(record);
                }
            }
        }

        // Latest row per URI wins; rows missing either score are dropped
        // after deduplication so an incomplete rescore shadows older rows.
        records.sort_by(|a, b| b.scored_timestamp.cmp(&a.scored_timestamp));
        let mut seen: HashSet<String> = HashSet::new();
        let mut scores = Vec::new();
        for record in records {
            if !seen.insert(record.uri.clone()) {
                continue;
            }
            if let (Some(engagement_score), Some(treatment_score)) =
                (record.engagement_score, record.treatment_score)
            {
                scores.push(PostScoreByAlgorithm {
                    uri: record.uri,
                    engagement_score,
                    treatment_score,
                });
            }
        }
        Ok(scores)
    }
}

#[async_trait]
impl ScoresRepository for JsonlScoresRepository {
    async fn load_cached_scores(&self, lookback_days: i64) -> Vec<PostScoreByAlgorithm> {
        match self.load_cached_scores_inner(lookback_days).await {
            Ok(scores) => {
                info!(count = scores.len(), lookback_days, "loaded cached post scores");
                scores
            }
            Err(e) => {
                warn!(error = %e, "failed to load cached scores, continuing with empty cache");
                Vec::new()
            }
        }
    }

    async fn save_scores(&self, scores: Vec<CachedScoreRecord>) -> Result<(), StorageError> {
        if scores.is_empty() {
            warn!("no scores to save, skipping export");
            return Ok(());
        }

        let now = Utc::now();
        let timestamp = now.format(TIMESTAMP_FORMAT).to_string();
        let partition = now.format("%Y-%m-%d").to_string();
        let path = self
            .active_root()
            .join(partition)
            .join(format!("post_scores_{timestamp}.jsonl"));
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut body = String::new();
        for score in &scores {
            body.push_str(&serde_json::to_string(score)?);
            body.push('\n');
        }

        // Append so two saves within the same second both survive.
        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(body.as_bytes()).await?;
        file.flush().await?;

        info!(count = scores.len(), "saved new post scores");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::models::PostSource;

    use super::*;

    fn record(
        uri: &str,
        engagement: Option<f64>,
        treatment: Option<f64>,
        scored_at: chrono::DateTime<Utc>,
    ) -> CachedScoreRecord {
        CachedScoreRecord {
            uri: uri.to_string(),
            text: "text".to_string(),
            source: PostSource::Firehose,
            engagement_score: engagement,
            treatment_score: treatment,
            scored_timestamp: scored_at,
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips_within_the_window() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonlScoresRepository::new(dir.path());

        let now = Utc::now();
        repo.save_scores(vec![
            record("at://p1", Some(1.5), Some(2.5), now),
            record("at://p2", Some(0.5), Some(0.75), now),
        ])
        .await
        .unwrap();

        let scores = repo.load_cached_scores(1).await;
        assert_eq!(scores.len(), 2);
        let p1 = scores.iter().find(|s| s.uri == "at://p1").unwrap();
        assert_eq!(p1.engagement_score, 1.5);
        assert_eq!(p1.treatment_score, 2.5);
    }

    #[tokio::test]
    async fn latest_row_per_uri_wins() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonlScoresRepository::new(dir.path());

        let now = Utc::now();
        repo.save_scores(vec![
            record("at://p1", Some(1.0), Some(1.0), now - Duration::hours(2)),
            record("at://p1", Some(9.0), Some(9.0), now),
        ])
        .await
        .unwrap();

        let scores = repo.load_cached_scores(1).await;
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].engagement_score, 9.0);
    }

    #[tokio::test]
    async fn incomplete_rows_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonlScoresRepository::new(dir.path());

        let now = Utc::now();
        repo.save_scores(vec![
            record("at://p1", Some(1.0), None, now),
            record("at://p2", None, Some(1.0), now),
            record("at://p3", Some(1.0), Some(2.0), now),
        ])
        .await
        .unwrap();

        let scores = repo.load_cached_scores(1).await;
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].uri, "at://p3");
    }

    #[tokio::test]
    async fn rows_outside_the_lookback_window_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonlScoresRepository::new(dir.path());

        let now = Utc::now();
        repo.save_scores(vec![
            record("at://stale", Some(1.0), Some(1.0), now - Duration::days(3)),
            record("at://fresh", Some(2.0), Some(2.0), now),
        ])
        .await
        .unwrap();

        let scores = repo.load_cached_scores(1).await;
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].uri, "at://fresh");
    }

    #[tokio::test]
    async fn empty_save_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonlScoresRepository::new(dir.path());

        repo.save_scores(Vec::new()).await.unwrap();
        assert!(!dir.path().join(SCORES_PREFIX).exists());
    }

    #[tokio::test]
    async fn missing_cache_directory_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonlScoresRepository::new(dir.path().join("nowhere"));
        assert!(repo.load_cached_scores(1).await.is_empty());
    }
}
