//! Composition root and session driver for the feed generation pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};

use crate::config::FeedConfig;
use crate::error::{FeedGenerationError, Result};
use crate::models::{SessionAnalytics, TIMESTAMP_FORMAT};
use crate::providers::{
    ExclusionProvider, LocalExclusionProvider, LocalPostProvider, LocalSocialGraphProvider,
    LocalStudyUserProvider, LocalSuperposterProvider, PostProvider, SocialGraphProvider,
    StudyUserProvider, SuperposterProvider,
};
use crate::repositories::{FeedStorageRepository, JsonlScoresRepository, ScoresRepository};
use crate::services::{
    CancellationToken, CandidatePoolBuilder, DataLoader, FeedGenerationService,
    ScoringService, SessionAnalyticsCalculator, UserContextService,
};
use crate::storage::{
    FeedTtlAdapter, LocalFeedStorageAdapter, LocalFeedTtlAdapter, LocalSessionMetadataAdapter,
    SessionMetadataAdapter, SortField,
};

const FEEDS_TTL_PREFIX: &str = "custom_feeds";

/// Everything the orchestrator needs injected. Concrete adapters are chosen
/// here and nowhere else.
pub struct FeedGenerationDependencies {
    pub study_user_provider: Arc<dyn StudyUserProvider>,
    pub social_graph_provider: Arc<dyn SocialGraphProvider>,
    pub superposter_provider: Arc<dyn SuperposterProvider>,
    pub post_provider: Arc<dyn PostProvider>,
    pub exclusion_provider: Arc<dyn ExclusionProvider>,
    pub scores_repository: Arc<dyn ScoresRepository>,
    pub feed_storage: FeedStorageRepository,
    pub ttl_adapter: Arc<dyn FeedTtlAdapter>,
    pub session_metadata_adapter: Arc<dyn SessionMetadataAdapter>,
}

impl FeedGenerationDependencies {
    /// Local-filesystem wiring: every provider and adapter reads and writes
    /// the shared data root.
    pub fn local(data_root: impl Into<PathBuf>) -> Self {
        let root = data_root.into();
        Self {
            study_user_provider: Arc::new(LocalStudyUserProvider::new(
                root.join("study_users.jsonl"),
            )),
            social_graph_provider: Arc::new(LocalSocialGraphProvider::new(
                root.join("user_social_networks.jsonl"),
            )),
            superposter_provider: Arc::new(LocalSuperposterProvider::new(
                root.join("daily_superposters"),
            )),
            post_provider: Arc::new(LocalPostProvider::new(
                root.join("consolidated_enriched_post_records.jsonl"),
            )),
            exclusion_provider: Arc::new(LocalExclusionProvider::new(
                root.join("excluded_authors.json"),
            )),
            scores_repository: Arc::new(JsonlScoresRepository::new(root.clone())),
            feed_storage: FeedStorageRepository::new(Arc::new(LocalFeedStorageAdapter::new(
                root.clone(),
            ))),
            ttl_adapter: Arc::new(LocalFeedTtlAdapter::new(root.clone())),
            session_metadata_adapter: Arc::new(LocalSessionMetadataAdapter::new(root)),
        }
    }
}

/// Wires the services together and runs sessions end to end.
pub struct FeedGenerationOrchestrator {
    config: FeedConfig,
    data_loader: DataLoader,
    scoring_service: ScoringService,
    candidate_builder: CandidatePoolBuilder,
    context_service: UserContextService,
    feed_service: Arc<FeedGenerationService>,
    analytics_calculator: SessionAnalyticsCalculator,
    feed_storage: FeedStorageRepository,
    ttl_adapter: Arc<dyn FeedTtlAdapter>,
    session_metadata_adapter: Arc<dyn SessionMetadataAdapter>,
    cancellation: CancellationToken,
}

impl FeedGenerationOrchestrator {
    pub fn new(config: FeedConfig, deps: FeedGenerationDependencies) -> Self {
        let data_loader = DataLoader::new(
            config.clone(),
            deps.study_user_provider,
            deps.social_graph_provider,
            deps.superposter_provider,
            deps.post_provider,
            deps.exclusion_provider,
            deps.feed_storage.clone(),
        );
        let scoring_service = ScoringService::new(deps.scores_repository, config.clone());
        let candidate_builder = CandidatePoolBuilder::new(config.clone());
        let feed_service = Arc::new(FeedGenerationService::new(config.clone()));

        Self {
            config,
            data_loader,
            scoring_service,
            candidate_builder,
            context_service: UserContextService::new(),
            feed_service,
            analytics_calculator: SessionAnalyticsCalculator::new(),
            feed_storage: deps.feed_storage,
            ttl_adapter: deps.ttl_adapter,
            session_metadata_adapter: deps.session_metadata_adapter,
            cancellation: CancellationToken::new(),
        }
    }

    /// Orchestrator with every collaborator on the local filesystem.
    pub fn with_local_storage(config: FeedConfig, data_root: impl Into<PathBuf>) -> Self {
        Self::new(config, FeedGenerationDependencies::local(data_root))
    }

    /// Handle for cancelling the running session from another task.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Run one session end to end. Returns the session analytics after a
    /// successful export.
    pub async fn run(
        &self,
        users_to_create_feeds_for: Option<Vec<String>>,
        export_new_scores: bool,
        test_mode: bool,
    ) -> Result<SessionAnalytics> {
        let session_timestamp = Utc::now().format(TIMESTAMP_FORMAT).to_string();
        info!(session_timestamp = %session_timestamp, test_mode, "starting feed generation session");

        // Step 1: load and prepare every input.
        let loaded_data = self
            .data_loader
            .load_complete_data(test_mode, users_to_create_feeds_for.as_deref())
            .await?;
        self.ensure_not_cancelled()?;

        // Step 2: score posts; new scores are persisted once, centrally.
        let scored_posts = self
            .scoring_service
            .score_posts(
                loaded_data.posts.clone(),
                &loaded_data.superposter_dids,
                export_new_scores,
            )
            .await?;
        self.ensure_not_cancelled()?;

        // Step 3: candidate pools.
        let candidate_post_pools = self
            .candidate_builder
            .generate_candidate_pools(&scored_posts.posts);

        // Step 4: per-user in-network context.
        let in_network_map = self.context_service.build_in_network_context(
            &scored_posts.posts,
            &loaded_data.study_users,
            &loaded_data.social_graph,
        );
        self.ensure_not_cancelled()?;

        // Step 5: per-user feeds (bounded parallelism) plus the default feed.
        let user_to_feed_map = Arc::clone(&self.feed_service)
            .generate_feeds_for_users(
                loaded_data.study_users,
                Arc::new(candidate_post_pools),
                Arc::new(in_network_map),
                Arc::new(loaded_data.previous_feeds),
                self.cancellation.clone(),
            )
            .await?;

        // Step 6: session analytics.
        let session_analytics = self
            .analytics_calculator
            .calculate(&user_to_feed_map, &session_timestamp);
        self.ensure_not_cancelled()?;

        // Step 7: export artifacts.
        self.feed_storage
            .export_feeds(&user_to_feed_map, &session_timestamp)
            .await?;
        self.feed_storage
            .write_session_analytics(&session_analytics, &session_timestamp)
            .await?;

        if !test_mode {
            // Step 8: retire old feed artifacts.
            self.ttl_old_feeds().await?;

            // Step 9: record session metadata.
            self.insert_session_metadata(&session_analytics).await?;
        }

        info!(
            session_timestamp = %session_analytics.session_timestamp,
            total_feeds = session_analytics.total_feeds,
            "feed generation session complete"
        );
        Ok(session_analytics)
    }

    fn ensure_not_cancelled(&self) -> Result<()> {
        if self.cancellation.is_cancelled() {
            return Err(FeedGenerationError::Cancelled);
        }
        Ok(())
    }

    async fn ttl_old_feeds(&self) -> Result<()> {
        self.ttl_adapter
            .move_to_cache(FEEDS_TTL_PREFIX, self.config.keep_count, SortField::Key)
            .await
            .map_err(|e| {
                error!(error = %e, "failed to retire old feeds");
                FeedGenerationError::Storage(e)
            })?;
        Ok(())
    }

    async fn insert_session_metadata(&self, analytics: &SessionAnalytics) -> Result<()> {
        self.session_metadata_adapter
            .insert_session_metadata(analytics)
            .await
            .map_err(|e| {
                error!(error = %e, "failed to insert session metadata");
                FeedGenerationError::Storage(e)
            })?;
        Ok(())
    }
}
