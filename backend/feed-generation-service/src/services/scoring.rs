//! Post scoring: freshness, likeability and the two per-algorithm scores,
//! with a merge against the persisted score cache.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::FeedConfig;
use crate::error::Result;
use crate::models::{
    CachedScoreRecord, EnrichedPost, FreshnessScoreFunction, PostScoreByAlgorithm, ScoredPost,
};
use crate::repositories::ScoresRepository;

/// Post age in hours, clamped to the freshness horizon. Posts synced in the
/// future count as age zero.
pub fn calculate_post_age_hours(
    post: &EnrichedPost,
    now: DateTime<Utc>,
    lookback_hours: f64,
) -> f64 {
    let age_hours = (now - post.synctimestamp).num_seconds() as f64 / 3600.0;
    age_hours.clamp(0.0, lookback_hours)
}

/// Freshness that decays linearly to zero over the lookback horizon.
pub fn calculate_linear_freshness_score(age_hours: f64, config: &FeedConfig) -> f64 {
    (config.default_max_freshness_score - config.freshness_decay_ratio() * age_hours).max(0.0)
}

/// Freshness that decays exponentially with post age.
pub fn calculate_exponential_freshness_score(age_hours: f64, config: &FeedConfig) -> f64 {
    config.default_max_freshness_score
        * (config.freshness_exponential_base * config.freshness_lambda_factor).powf(age_hours)
}

pub fn score_post_freshness(
    post: &EnrichedPost,
    now: DateTime<Utc>,
    config: &FeedConfig,
    function: FreshnessScoreFunction,
) -> f64 {
    let age_hours = calculate_post_age_hours(post, now, config.freshness_lookback_hours());
    match function {
        FreshnessScoreFunction::Linear => calculate_linear_freshness_score(age_hours, config),
        FreshnessScoreFunction::Exponential => {
            calculate_exponential_freshness_score(age_hours, config)
        }
    }
}

/// Log-scaled likeability. When the real like count is missing, the
/// expected count is estimated from similarity to the popular-post
/// centroid, falling back to the configured default similarity.
pub fn score_post_likeability(post: &EnrichedPost, config: &FeedConfig) -> f64 {
    let effective_likes = match post.like_count {
        Some(like_count) if like_count >= 0 => like_count as f64,
        _ => {
            let similarity = post
                .similarity_score
                .filter(|s| s.is_finite())
                .unwrap_or(config.default_similarity_score);
            config.average_popular_post_like_count * similarity
        }
    };
    (effective_likes + 1.0).ln()
}

/// Multiplier applied to the treatment score only. Superposters are
/// penalized; sociopolitical posts are rescaled by the ratio of
/// constructiveness to toxicity. Posts whose sociopolitical label did not
/// succeed are treated as non-sociopolitical.
pub fn calculate_treatment_multiplier(
    post: &EnrichedPost,
    superposter_dids: &HashSet<String>,
    config: &FeedConfig,
) -> f64 {
    let mut multiplier = 1.0;

    if superposter_dids.contains(&post.author_did) {
        multiplier *= config.superposter_coef;
    }

    let is_sociopolitical = post
        .sociopolitical_was_successfully_labeled
        .unwrap_or(false)
        && post.is_sociopolitical.unwrap_or(false);
    let has_perspective_labels = post.perspective_was_successfully_labeled.unwrap_or(false);

    if is_sociopolitical && has_perspective_labels {
        let prob_reasoning = post.prob_reasoning.filter(|p| p.is_finite()).unwrap_or(0.0);
        // A missing constructiveness probability falls back to the
        // reasoning probability.
        let prob_constructive = post
            .prob_constructive
            .filter(|p| p.is_finite())
            .unwrap_or(prob_reasoning);
        let prob_toxic = post.prob_toxic.filter(|p| p.is_finite()).unwrap_or(0.0);

        let denominator = config.coef_toxicity * prob_toxic;
        let ratio = if denominator == 0.0 {
            1.0
        } else {
            (config.coef_constructiveness * prob_constructive + prob_reasoning) / denominator
        };
        multiplier *= ratio;
    }

    multiplier
}

/// Both algorithm scores for one post.
pub fn calculate_post_score(
    post: &EnrichedPost,
    superposter_dids: &HashSet<String>,
    now: DateTime<Utc>,
    config: &FeedConfig,
) -> PostScoreByAlgorithm {
    let freshness = score_post_freshness(post, now, config, FreshnessScoreFunction::default());
    let likeability = score_post_likeability(post, config);
    let base = likeability + freshness;

    let engagement_score = (base * config.engagement_coef).max(0.0);
    let treatment_score =
        (base * calculate_treatment_multiplier(post, superposter_dids, config)).max(0.0);

    PostScoreByAlgorithm {
        uri: post.uri.clone(),
        engagement_score,
        treatment_score,
    }
}

/// Scoring output: every input post with scores attached, plus the URIs
/// that were not served from cache.
#[derive(Debug, Clone, Default)]
pub struct ScoredPosts {
    pub posts: Vec<ScoredPost>,
    pub new_post_uris: Vec<String>,
}

/// Scores posts with cache reuse, and persists new scores once, centrally.
pub struct ScoringService {
    scores_repo: Arc<dyn ScoresRepository>,
    config: FeedConfig,
}

impl ScoringService {
    pub fn new(scores_repo: Arc<dyn ScoresRepository>, config: FeedConfig) -> Self {
        Self { scores_repo, config }
    }

    pub async fn score_posts(
        &self,
        posts: Vec<EnrichedPost>,
        superposter_dids: &HashSet<String>,
        save_new_scores: bool,
    ) -> Result<ScoredPosts> {
        if posts.is_empty() {
            warn!("no posts to score");
            return Ok(ScoredPosts::default());
        }

        let total_posts = posts.len();
        let cached = self
            .scores_repo
            .load_cached_scores(self.config.default_scoring_lookback_days)
            .await;
        let cache: HashMap<String, (f64, f64)> = cached
            .into_iter()
            .map(|score| (score.uri, (score.engagement_score, score.treatment_score)))
            .collect();

        let now = Utc::now();
        let mut scored: Vec<ScoredPost> = Vec::with_capacity(total_posts);
        let mut new_post_uris: Vec<String> = Vec::new();

        for post in posts {
            match cache.get(&post.uri) {
                Some(&(engagement_score, treatment_score)) => scored.push(ScoredPost {
                    post,
                    engagement_score,
                    treatment_score,
                }),
                None => {
                    let score = calculate_post_score(&post, superposter_dids, now, &self.config);
                    new_post_uris.push(post.uri.clone());
                    scored.push(ScoredPost {
                        post,
                        engagement_score: score.engagement_score,
                        treatment_score: score.treatment_score,
                    });
                }
            }
        }

        if save_new_scores && !new_post_uris.is_empty() {
            let new_set: HashSet<&str> = new_post_uris.iter().map(String::as_str).collect();
            let records: Vec<CachedScoreRecord> = scored
                .iter()
                .filter(|scored_post| new_set.contains(scored_post.uri()))
                .map(|scored_post| CachedScoreRecord {
                    uri: scored_post.post.uri.clone(),
                    text: scored_post.post.text.clone(),
                    source: scored_post.post.source,
                    engagement_score: Some(scored_post.engagement_score),
                    treatment_score: Some(scored_post.treatment_score),
                    scored_timestamp: now,
                })
                .collect();
            self.scores_repo.save_scores(records).await?;
        }

        info!(
            total = total_posts,
            new = new_post_uris.len(),
            cached = total_posts - new_post_uris.len(),
            "scored posts"
        );

        Ok(ScoredPosts {
            posts: scored,
            new_post_uris,
        })
    }
}
