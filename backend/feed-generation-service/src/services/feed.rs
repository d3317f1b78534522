//! Per-user feed generation: ranking, reranking and statistics, fanned out
//! over a bounded worker pool.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{error, info};

use super::{
    generate_feed_statistics, CancellationToken, RankingService, RerankingService,
    UserInNetworkPostsMap,
};
use crate::config::FeedConfig;
use crate::error::{FeedGenerationError, Result};
use crate::models::{
    CandidatePostPools, Condition, FeedWithMetadata, PreviousFeeds, ScoredPost, StudyUser,
    DEFAULT_FEED_USER,
};

/// Runs the per-user slice of the pipeline. All inputs are read-only by the
/// time feeds are generated, so users are processed concurrently without
/// any shared mutable state.
pub struct FeedGenerationService {
    config: FeedConfig,
    ranking_service: RankingService,
    reranking_service: RerankingService,
}

impl FeedGenerationService {
    pub fn new(config: FeedConfig) -> Self {
        let ranking_service = RankingService::new(config.clone());
        let reranking_service = RerankingService::new(config.clone());
        Self {
            config,
            ranking_service,
            reranking_service,
        }
    }

    /// One user's complete feed: ranking, reranking, statistics.
    pub fn generate_feed_for_user(
        &self,
        user: &StudyUser,
        post_pool: &[ScoredPost],
        in_network_post_uris: &HashSet<String>,
        previous_post_uris: &HashSet<String>,
        rng: &mut StdRng,
    ) -> Result<FeedWithMetadata> {
        let ranked = self.ranking_service.create_ranked_candidate_feed(
            user.condition,
            in_network_post_uris,
            post_pool,
        )?;
        let feed = self
            .reranking_service
            .rerank_feed(ranked, previous_post_uris, rng)?;
        let feed_statistics = generate_feed_statistics(&feed);

        Ok(FeedWithMetadata {
            user_did: user.user_did.clone(),
            bluesky_handle: user.handle.clone(),
            condition: user.condition,
            feed,
            feed_statistics,
        })
    }

    /// Feeds for every study user plus the shared default feed. A failing
    /// user is logged and omitted; cancellation aborts the whole session
    /// before anything is returned.
    pub async fn generate_feeds_for_users(
        self: Arc<Self>,
        study_users: Vec<StudyUser>,
        pools: Arc<CandidatePostPools>,
        in_network_map: Arc<UserInNetworkPostsMap>,
        previous_feeds: Arc<PreviousFeeds>,
        cancellation: CancellationToken,
    ) -> Result<HashMap<String, FeedWithMetadata>> {
        let total_users = study_users.len();
        let base_seed = self
            .config
            .jitter_seed
            .unwrap_or_else(|| rand::thread_rng().gen());

        let mut tasks = stream::iter(study_users.into_iter().map(|user| {
            let service = Arc::clone(&self);
            let pools = Arc::clone(&pools);
            let in_network_map = Arc::clone(&in_network_map);
            let previous_feeds = Arc::clone(&previous_feeds);
            let cancellation = cancellation.clone();

            async move {
                if cancellation.is_cancelled() {
                    return (user.user_did.clone(), Err(FeedGenerationError::Cancelled));
                }

                let join_result = tokio::task::spawn_blocking(move || {
                    let user_did = user.user_did.clone();
                    let in_network_uris: HashSet<String> = in_network_map
                        .get(&user.user_did)
                        .map(|uris| uris.iter().cloned().collect())
                        .unwrap_or_default();
                    let previous_uris = previous_feeds.uris_for(&user.user_did);
                    let mut rng = rng_for_user(base_seed, &user.user_did);

                    let result = service.generate_feed_for_user(
                        &user,
                        pools.for_condition(user.condition),
                        &in_network_uris,
                        &previous_uris,
                        &mut rng,
                    );
                    (user_did, result)
                })
                .await;

                match join_result {
                    Ok(outcome) => outcome,
                    Err(join_error) => (
                        "unknown".to_string(),
                        Err(FeedGenerationError::InvalidCandidatePool(format!(
                            "feed generation task panicked: {join_error}"
                        ))),
                    ),
                }
            }
        }))
        .buffer_unordered(self.config.feed_generation_concurrency);

        let mut user_to_feed_map: HashMap<String, FeedWithMetadata> = HashMap::new();
        let mut failed_users = 0usize;
        while let Some((user_did, result)) = tasks.next().await {
            match result {
                Ok(feed) => {
                    user_to_feed_map.insert(user_did, feed);
                }
                Err(FeedGenerationError::Cancelled) => return Err(FeedGenerationError::Cancelled),
                Err(e) => {
                    failed_users += 1;
                    error!(user_did = %user_did, error = %e, "failed to generate feed for user");
                }
            }
        }
        drop(tasks);

        if cancellation.is_cancelled() {
            return Err(FeedGenerationError::Cancelled);
        }

        // Shared default feed: reverse chronological, no personalization,
        // recycling tracked under its own key.
        let default_user = StudyUser {
            user_did: DEFAULT_FEED_USER.to_string(),
            handle: DEFAULT_FEED_USER.to_string(),
            condition: Condition::ReverseChronological,
            is_study_user: false,
        };
        let mut rng = rng_for_user(base_seed, DEFAULT_FEED_USER);
        match self.generate_feed_for_user(
            &default_user,
            pools.for_condition(Condition::ReverseChronological),
            &HashSet::new(),
            &previous_feeds.uris_for(DEFAULT_FEED_USER),
            &mut rng,
        ) {
            Ok(feed) => {
                user_to_feed_map.insert(DEFAULT_FEED_USER.to_string(), feed);
            }
            Err(e) => {
                failed_users += 1;
                error!(error = %e, "failed to generate the default feed");
            }
        }

        info!(
            requested = total_users,
            generated = user_to_feed_map.len(),
            failed = failed_users,
            "finished per-user feed generation"
        );

        Ok(user_to_feed_map)
    }
}

/// Deterministic per-user RNG: the session seed combined with a stable hash
/// of the user DID, so workers never share an RNG and a fixed seed
/// reproduces every feed.
fn rng_for_user(base_seed: u64, user_did: &str) -> StdRng {
    let mut hasher = DefaultHasher::new();
    user_did.hash(&mut hasher);
    StdRng::seed_from_u64(base_seed ^ hasher.finish())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::models::{EnrichedPost, PostSource, ScoredPost};

    fn scored_post(uri: &str, author_did: &str, source: PostSource, score: f64) -> ScoredPost {
        let now = Utc::now();
        ScoredPost {
            post: EnrichedPost {
                uri: uri.to_string(),
                author_did: author_did.to_string(),
                author_handle: format!("{author_did}.test"),
                text: String::new(),
                source,
                synctimestamp: now - Duration::minutes(score as i64),
                consolidation_timestamp: now,
                like_count: None,
                similarity_score: None,
                sociopolitical_was_successfully_labeled: None,
                is_sociopolitical: None,
                perspective_was_successfully_labeled: None,
                prob_toxic: None,
                prob_constructive: None,
                prob_reasoning: None,
            },
            engagement_score: score,
            treatment_score: score,
        }
    }

    fn study_user(user_did: &str, condition: Condition) -> StudyUser {
        StudyUser {
            user_did: user_did.to_string(),
            handle: format!("{user_did}.test"),
            condition,
            is_study_user: true,
        }
    }

    fn test_config() -> FeedConfig {
        FeedConfig {
            max_feed_length: 3,
            jitter_amount: 0,
            jitter_seed: Some(7),
            ..FeedConfig::default()
        }
        .validated()
        .unwrap()
    }

    fn pools() -> CandidatePostPools {
        let firehose: Vec<ScoredPost> = (0..6)
            .map(|i| {
                scored_post(
                    &format!("at://fh{i}"),
                    &format!("did:plc:author{i}"),
                    PostSource::Firehose,
                    10.0 - i as f64,
                )
            })
            .collect();
        let mut all = firehose.clone();
        all.extend((0..6).map(|i| {
            scored_post(
                &format!("at://ml{i}"),
                &format!("did:plc:popular{i}"),
                PostSource::MostLiked,
                5.0 - i as f64,
            )
        }));

        CandidatePostPools {
            reverse_chronological: firehose,
            engagement: all.clone(),
            treatment: all,
        }
    }

    #[tokio::test]
    async fn generates_feeds_for_every_user_plus_the_default_feed() {
        let service = Arc::new(FeedGenerationService::new(test_config()));
        let users = vec![
            study_user("did:plc:u1", Condition::ReverseChronological),
            study_user("did:plc:u2", Condition::Engagement),
            study_user("did:plc:u3", Condition::RepresentativeDiversification),
        ];

        let feeds = service
            .generate_feeds_for_users(
                users,
                Arc::new(pools()),
                Arc::new(UserInNetworkPostsMap::new()),
                Arc::new(PreviousFeeds::default()),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(feeds.len(), 4);
        assert!(feeds.contains_key(DEFAULT_FEED_USER));
        for feed in feeds.values() {
            assert_eq!(feed.feed.len(), 3);
        }

        let default_feed = &feeds[DEFAULT_FEED_USER];
        assert_eq!(default_feed.condition, Condition::ReverseChronological);
        assert!(default_feed.feed.iter().all(|post| !post.is_in_network));
    }

    #[tokio::test]
    async fn a_failing_user_is_omitted_without_aborting_the_session() {
        let service = Arc::new(FeedGenerationService::new(test_config()));
        let users = vec![
            study_user("did:plc:ok", Condition::ReverseChronological),
            study_user("did:plc:starved", Condition::Engagement),
        ];

        // No most_liked posts at all: the engagement user cannot fill a
        // feed and fails, the reverse-chronological user succeeds.
        let firehose: Vec<ScoredPost> = (0..6)
            .map(|i| {
                scored_post(
                    &format!("at://fh{i}"),
                    &format!("did:plc:author{i}"),
                    PostSource::Firehose,
                    10.0 - i as f64,
                )
            })
            .collect();
        let pools = CandidatePostPools {
            reverse_chronological: firehose.clone(),
            engagement: firehose.clone(),
            treatment: firehose,
        };

        let feeds = service
            .generate_feeds_for_users(
                users,
                Arc::new(pools),
                Arc::new(UserInNetworkPostsMap::new()),
                Arc::new(PreviousFeeds::default()),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(feeds.contains_key("did:plc:ok"));
        assert!(!feeds.contains_key("did:plc:starved"));
        assert!(feeds.contains_key(DEFAULT_FEED_USER));
    }

    #[tokio::test]
    async fn sessions_are_reproducible_for_a_fixed_seed() {
        let users = vec![
            study_user("did:plc:u1", Condition::Engagement),
            study_user("did:plc:u2", Condition::RepresentativeDiversification),
        ];
        let config = FeedConfig {
            max_feed_length: 3,
            jitter_amount: 2,
            jitter_seed: Some(42),
            ..FeedConfig::default()
        }
        .validated()
        .unwrap();

        let mut runs = Vec::new();
        for _ in 0..2 {
            let service = Arc::new(FeedGenerationService::new(config.clone()));
            let feeds = service
                .generate_feeds_for_users(
                    users.clone(),
                    Arc::new(pools()),
                    Arc::new(UserInNetworkPostsMap::new()),
                    Arc::new(PreviousFeeds::default()),
                    CancellationToken::new(),
                )
                .await
                .unwrap();
            let mut flattened: Vec<(String, Vec<String>)> = feeds
                .into_iter()
                .map(|(did, feed)| (did, feed.feed.into_iter().map(|p| p.item).collect()))
                .collect();
            flattened.sort();
            runs.push(flattened);
        }

        assert_eq!(runs[0], runs[1]);
    }

    #[tokio::test]
    async fn cancellation_aborts_the_session() {
        let service = Arc::new(FeedGenerationService::new(test_config()));
        let cancellation = CancellationToken::new();
        cancellation.cancel();

        let result = service
            .generate_feeds_for_users(
                vec![study_user("did:plc:u1", Condition::Engagement)],
                Arc::new(pools()),
                Arc::new(UserInNetworkPostsMap::new()),
                Arc::new(PreviousFeeds::default()),
                cancellation,
            )
            .await;

        assert!(matches!(result, Err(FeedGenerationError::Cancelled)));
    }

    #[tokio::test]
    async fn in_network_posts_are_tagged_and_capped() {
        let config = FeedConfig {
            max_feed_length: 4,
            max_in_network_posts_ratio: 0.5,
            jitter_amount: 0,
            jitter_seed: Some(1),
            ..FeedConfig::default()
        }
        .validated()
        .unwrap();
        let service = Arc::new(FeedGenerationService::new(config));

        let mut in_network_map = UserInNetworkPostsMap::new();
        in_network_map.insert(
            "did:plc:u1".to_string(),
            vec![
                "at://fh0".to_string(),
                "at://fh1".to_string(),
                "at://fh2".to_string(),
            ],
        );

        let feeds = service
            .generate_feeds_for_users(
                vec![study_user("did:plc:u1", Condition::Engagement)],
                Arc::new(pools()),
                Arc::new(in_network_map),
                Arc::new(PreviousFeeds::default()),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let feed = &feeds["did:plc:u1"];
        let in_network_count = feed.feed.iter().filter(|p| p.is_in_network).count();
        assert_eq!(in_network_count, 2);
    }
}
