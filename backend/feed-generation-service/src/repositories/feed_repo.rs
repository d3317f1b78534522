//! Repository for feed and session-analytics exports.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::models::{FeedWithMetadata, PreviousFeeds, SessionAnalytics, StoredFeed};
use crate::storage::{with_retry, FeedStorageAdapter, RetryPolicy, StorageError};

/// Feed storage operations behind an adapter. Writes are wrapped with
/// bounded retry; exhaustion surfaces the adapter's `StorageError`.
#[derive(Clone)]
pub struct FeedStorageRepository {
    adapter: Arc<dyn FeedStorageAdapter>,
    retry_policy: RetryPolicy,
}

impl FeedStorageRepository {
    pub fn new(adapter: Arc<dyn FeedStorageAdapter>) -> Self {
        Self {
            adapter,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(adapter: Arc<dyn FeedStorageAdapter>, retry_policy: RetryPolicy) -> Self {
        Self {
            adapter,
            retry_policy,
        }
    }

    pub async fn write_feeds(
        &self,
        feeds: &[StoredFeed],
        session_timestamp: &str,
    ) -> Result<(), StorageError> {
        with_retry(&self.retry_policy, "write_feeds", || {
            self.adapter.write_feeds(feeds, session_timestamp)
        })
        .await
    }

    pub async fn write_session_analytics(
        &self,
        analytics: &SessionAnalytics,
        session_timestamp: &str,
    ) -> Result<(), StorageError> {
        with_retry(&self.retry_policy, "write_session_analytics", || {
            self.adapter.write_session_analytics(analytics, session_timestamp)
        })
        .await
    }

    pub async fn load_latest_feeds(&self) -> Result<PreviousFeeds, StorageError> {
        self.adapter.load_latest_feeds().await
    }

    /// Transform finished feeds into the persisted record shape and write
    /// them in one artifact. Output order is by user DID so identical
    /// sessions produce identical artifacts.
    pub async fn export_feeds(
        &self,
        user_to_feed_map: &HashMap<String, FeedWithMetadata>,
        session_timestamp: &str,
    ) -> Result<(), StorageError> {
        let mut stored: Vec<StoredFeed> = user_to_feed_map
            .values()
            .map(|feed| StoredFeed {
                feed_id: format!("{}::{}", feed.user_did, session_timestamp),
                user_did: feed.user_did.clone(),
                bluesky_handle: feed.bluesky_handle.clone(),
                condition: feed.condition,
                feed_statistics: feed.feed_statistics.clone(),
                feed: feed.feed.clone(),
                feed_generation_timestamp: session_timestamp.to_string(),
            })
            .collect();
        stored.sort_by(|a, b| a.user_did.cmp(&b.user_did));

        self.write_feeds(&stored, session_timestamp).await?;
        info!(count = stored.len(), session_timestamp, "exported feeds");
        Ok(())
    }
}
