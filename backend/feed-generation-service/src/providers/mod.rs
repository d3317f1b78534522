//! Capability interfaces for the external collaborators the pipeline
//! consumes. Concrete adapters are wired at the composition root; the
//! pipeline itself only sees these traits.

pub mod local;

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{EnrichedPost, ExclusionLists, StudyUser};
use crate::storage::StorageError;

pub use local::{
    LocalExclusionProvider, LocalPostProvider, LocalSocialGraphProvider,
    LocalStudyUserProvider, LocalSuperposterProvider,
};

/// Where superposter batches are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuperposterSource {
    /// Recent batch artifact on the local data root.
    Local,
    /// Warehouse table.
    Remote,
}

/// Participant registry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StudyUserProvider: Send + Sync {
    /// All participants. With `test_mode`, only the mock cohort
    /// (`is_study_user = false`) is returned.
    async fn get_all(&self, test_mode: bool) -> Result<Vec<StudyUser>, StorageError>;
}

/// Scraped social graph: user DID to the DIDs they follow.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SocialGraphProvider: Send + Sync {
    async fn load(&self) -> Result<HashMap<String, Vec<String>>, StorageError>;
}

/// Superposter detection output.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SuperposterProvider: Send + Sync {
    async fn load_latest(
        &self,
        source: SuperposterSource,
        lookback_timestamp: Option<DateTime<Utc>>,
    ) -> Result<HashSet<String>, StorageError>;
}

/// Enriched post corpus.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PostProvider: Send + Sync {
    /// Posts consolidated at or after `lookback_timestamp`.
    async fn load_enriched(
        &self,
        lookback_timestamp: DateTime<Utc>,
    ) -> Result<Vec<EnrichedPost>, StorageError>;
}

/// Author exclusion lists.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExclusionProvider: Send + Sync {
    async fn load(&self) -> Result<ExclusionLists, StorageError>;
}
