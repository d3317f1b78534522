use thiserror::Error;

use crate::storage::StorageError;

/// Errors surfaced at the service boundary.
#[derive(Debug, Error)]
pub enum FeedGenerationError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("storage operation failed: {0}")]
    Storage(#[from] StorageError),

    #[error("invalid candidate pool: {0}")]
    InvalidCandidatePool(String),

    #[error("feed length {actual} is below the required length {expected}")]
    UnderlongFeed { actual: usize, expected: usize },

    #[error("session cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, FeedGenerationError>;
