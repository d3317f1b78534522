pub mod adapters;
pub mod retry;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{PreviousFeeds, SessionAnalytics, StoredFeed};

pub use adapters::{
    LocalFeedStorageAdapter, LocalFeedTtlAdapter, LocalSessionMetadataAdapter,
};
pub use retry::{with_retry, RetryPolicy};

/// Error raised when any storage operation fails.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Field by which TTL candidates are ordered before retention is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    /// Artifact key (path). Keys embed the session timestamp, so key order
    /// is chronological order.
    Key,
    /// Filesystem modification time.
    LastModified,
}

/// Outgoing side effects for feeds and session analytics.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeedStorageAdapter: Send + Sync {
    async fn write_feeds(
        &self,
        feeds: &[StoredFeed],
        session_timestamp: &str,
    ) -> Result<(), StorageError>;

    async fn write_session_analytics(
        &self,
        analytics: &SessionAnalytics,
        session_timestamp: &str,
    ) -> Result<(), StorageError>;

    /// Latest stored feed per user, as URI sets. Empty map when no feed
    /// artifacts exist yet.
    async fn load_latest_feeds(&self) -> Result<PreviousFeeds, StorageError>;
}

/// Retires old artifacts under a prefix to the cache tier.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeedTtlAdapter: Send + Sync {
    /// Keeps the newest `keep_count` artifacts under `prefix`, moves the
    /// rest to the cache tier. Returns the number of artifacts moved.
    async fn move_to_cache(
        &self,
        prefix: &str,
        keep_count: usize,
        sort_field: SortField,
    ) -> Result<usize, StorageError>;
}

/// Records one metadata row per completed session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionMetadataAdapter: Send + Sync {
    async fn insert_session_metadata(
        &self,
        analytics: &SessionAnalytics,
    ) -> Result<(), StorageError>;
}
