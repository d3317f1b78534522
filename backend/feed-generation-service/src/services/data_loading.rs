//! Loads and prepares every input a session needs.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::info;

use crate::config::FeedConfig;
use crate::error::Result;
use crate::models::{EnrichedPost, ExclusionLists, LoadedData, StudyUser};
use crate::providers::{
    ExclusionProvider, PostProvider, SocialGraphProvider, StudyUserProvider,
    SuperposterProvider, SuperposterSource,
};
use crate::repositories::FeedStorageRepository;

/// Facade over the providers: one call returns everything the pipeline
/// needs, already deduplicated and filtered.
pub struct DataLoader {
    config: FeedConfig,
    study_user_provider: Arc<dyn StudyUserProvider>,
    social_graph_provider: Arc<dyn SocialGraphProvider>,
    superposter_provider: Arc<dyn SuperposterProvider>,
    post_provider: Arc<dyn PostProvider>,
    exclusion_provider: Arc<dyn ExclusionProvider>,
    feed_storage: FeedStorageRepository,
}

impl DataLoader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: FeedConfig,
        study_user_provider: Arc<dyn StudyUserProvider>,
        social_graph_provider: Arc<dyn SocialGraphProvider>,
        superposter_provider: Arc<dyn SuperposterProvider>,
        post_provider: Arc<dyn PostProvider>,
        exclusion_provider: Arc<dyn ExclusionProvider>,
        feed_storage: FeedStorageRepository,
    ) -> Self {
        Self {
            config,
            study_user_provider,
            social_graph_provider,
            superposter_provider,
            post_provider,
            exclusion_provider,
            feed_storage,
        }
    }

    /// Load all session inputs. Posts come back deduplicated by URI and
    /// with excluded authors removed.
    pub async fn load_complete_data(
        &self,
        test_mode: bool,
        users_filter: Option<&[String]>,
    ) -> Result<LoadedData> {
        let study_users = self.study_user_provider.get_all(test_mode).await?;
        let study_users = Self::filter_study_users(study_users, users_filter);

        let lookback = Utc::now() - Duration::days(self.config.default_lookback_days);
        let posts = self.post_provider.load_enriched(lookback).await?;
        let social_graph = self.social_graph_provider.load().await?;
        let superposter_dids = self
            .superposter_provider
            .load_latest(SuperposterSource::Local, Some(lookback))
            .await?;
        let previous_feeds = self.feed_storage.load_latest_feeds().await?;
        let exclusions = self.exclusion_provider.load().await?;

        let posts = Self::deduplicate_and_filter_posts(posts, &exclusions);

        info!(
            users = study_users.len(),
            posts = posts.len(),
            social_graph_entries = social_graph.len(),
            superposters = superposter_dids.len(),
            previous_feeds = previous_feeds.feeds.len(),
            "loaded session input data"
        );

        Ok(LoadedData {
            posts,
            social_graph,
            superposter_dids,
            previous_feeds,
            study_users,
        })
    }

    fn filter_study_users(
        study_users: Vec<StudyUser>,
        users_filter: Option<&[String]>,
    ) -> Vec<StudyUser> {
        let Some(handles) = users_filter else {
            return study_users;
        };
        info!(count = handles.len(), "filtering to explicitly requested users");
        study_users
            .into_iter()
            .filter(|user| handles.iter().any(|handle| handle == &user.handle))
            .collect()
    }

    /// Deduplicate by URI (newest `consolidation_timestamp` wins) and drop
    /// posts from excluded authors.
    pub fn deduplicate_and_filter_posts(
        posts: Vec<EnrichedPost>,
        exclusions: &ExclusionLists,
    ) -> Vec<EnrichedPost> {
        let len_before = posts.len();

        let mut posts = posts;
        posts.sort_by(|a, b| b.consolidation_timestamp.cmp(&a.consolidation_timestamp));

        let mut seen: HashSet<String> = HashSet::with_capacity(posts.len());
        let mut deduplicated: Vec<EnrichedPost> = Vec::with_capacity(posts.len());
        for post in posts {
            if seen.insert(post.uri.clone()) {
                deduplicated.push(post);
            }
        }

        if deduplicated.len() != len_before {
            info!(
                before = len_before,
                after = deduplicated.len(),
                "deduplicated posts"
            );
        }

        deduplicated
            .into_iter()
            .filter(|post| {
                !exclusions.dids_excluded.contains(&post.author_did)
                    && !exclusions.handles_excluded.contains(&post.author_handle)
            })
            .collect()
    }
}
