use serde::Deserialize;

use crate::error::{FeedGenerationError, Result};

/// Configuration for the feed generation algorithm.
///
/// All tunables live here; nothing in the pipeline reads the environment
/// directly. Values are validated before use, so a constructed config can be
/// trusted everywhere downstream.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Final length of every generated feed.
    pub max_feed_length: usize,

    /// Per-author cap inside each candidate pool.
    pub max_num_times_user_can_appear_in_feed: usize,

    /// Maximum proportion of a feed that may repeat the user's previous feed.
    pub max_prop_old_posts: f64,

    /// Maximum proportion of in-network posts in a feed.
    pub max_in_network_posts_ratio: f64,

    /// The reranker works on `max_feed_length * this` candidates before the
    /// final truncation.
    pub feed_preprocessing_multiplier: usize,

    /// Toxicity coefficient in the treatment multiplier denominator.
    pub coef_toxicity: f64,

    /// Constructiveness coefficient in the treatment multiplier numerator.
    pub coef_constructiveness: f64,

    /// Multiplicative penalty for posts authored by superposters.
    pub superposter_coef: f64,

    /// Coefficient applied to the engagement score.
    pub engagement_coef: f64,

    /// Freshness score of a brand-new post.
    pub default_max_freshness_score: f64,

    /// Lambda factor for exponential freshness decay.
    pub freshness_lambda_factor: f64,

    /// Base value for exponential freshness decay.
    pub freshness_exponential_base: f64,

    /// Lookback window (days) for loading enriched posts; also bounds the
    /// freshness decay horizon.
    pub default_lookback_days: i64,

    /// Lookback window (days) for the score cache.
    pub default_scoring_lookback_days: i64,

    /// Similarity fallback when a post has no similarity score.
    pub default_similarity_score: f64,

    /// Expected like count of a popular post; used to estimate likeability
    /// when the real like count is missing.
    pub average_popular_post_like_count: f64,

    /// Maximum number of positions a post can shift during jitter.
    pub jitter_amount: i64,

    /// Number of feed artifacts to retain before moving older ones to the
    /// cache tier.
    pub keep_count: usize,

    /// Bound on concurrent per-user feed generation tasks.
    pub feed_generation_concurrency: usize,

    /// Fixed jitter seed. None seeds from entropy; Some makes sessions
    /// reproducible.
    pub jitter_seed: Option<u64>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            max_feed_length: 100,
            max_num_times_user_can_appear_in_feed: 5,
            max_prop_old_posts: 0.6,
            max_in_network_posts_ratio: 0.5,
            feed_preprocessing_multiplier: 2,
            coef_toxicity: 0.965,
            coef_constructiveness: 1.02,
            superposter_coef: 0.95,
            engagement_coef: 1.0,
            default_max_freshness_score: 3.0,
            freshness_lambda_factor: 0.95,
            freshness_exponential_base: 1.0,
            default_lookback_days: 1,
            default_scoring_lookback_days: 1,
            default_similarity_score: 0.8,
            average_popular_post_like_count: 100.0,
            jitter_amount: 2,
            keep_count: 3,
            feed_generation_concurrency: 8,
            jitter_seed: None,
        }
    }
}

impl FeedConfig {
    /// Default configuration, validated.
    pub fn new() -> Result<Self> {
        Self::default().validated()
    }

    /// Load configuration from `FEED_`-prefixed environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let config: FeedConfig = envy::prefixed("FEED_")
            .from_env()
            .map_err(|e| FeedGenerationError::InvalidConfig(e.to_string()))?;
        config.validated()
    }

    /// Validate every constraint and return the config unchanged, or the
    /// first violation as `InvalidConfig`.
    pub fn validated(self) -> Result<Self> {
        fn invalid(msg: impl Into<String>) -> FeedGenerationError {
            FeedGenerationError::InvalidConfig(msg.into())
        }

        if self.max_feed_length == 0 {
            return Err(invalid("max_feed_length must be > 0"));
        }
        if self.max_num_times_user_can_appear_in_feed == 0 {
            return Err(invalid("max_num_times_user_can_appear_in_feed must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.max_prop_old_posts) {
            return Err(invalid("max_prop_old_posts must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.max_in_network_posts_ratio) {
            return Err(invalid("max_in_network_posts_ratio must be within [0, 1]"));
        }
        if self.feed_preprocessing_multiplier == 0 {
            return Err(invalid("feed_preprocessing_multiplier must be > 0"));
        }
        if self.coef_toxicity <= 0.0 {
            return Err(invalid("coef_toxicity must be > 0"));
        }
        if self.coef_constructiveness <= 0.0 {
            return Err(invalid("coef_constructiveness must be > 0"));
        }
        if self.superposter_coef <= 0.0 || self.superposter_coef > 1.0 {
            return Err(invalid("superposter_coef must be within (0, 1]"));
        }
        if self.engagement_coef <= 0.0 {
            return Err(invalid("engagement_coef must be > 0"));
        }
        if self.default_max_freshness_score <= 0.0 {
            return Err(invalid("default_max_freshness_score must be > 0"));
        }
        if self.freshness_lambda_factor <= 0.0 || self.freshness_lambda_factor > 1.0 {
            return Err(invalid("freshness_lambda_factor must be within (0, 1]"));
        }
        if self.freshness_exponential_base <= 0.0 {
            return Err(invalid("freshness_exponential_base must be > 0"));
        }
        if self.default_lookback_days <= 0 {
            return Err(invalid("default_lookback_days must be > 0"));
        }
        if self.default_scoring_lookback_days <= 0 {
            return Err(invalid("default_scoring_lookback_days must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.default_similarity_score) {
            return Err(invalid("default_similarity_score must be within [0, 1]"));
        }
        if self.average_popular_post_like_count <= 0.0 {
            return Err(invalid("average_popular_post_like_count must be > 0"));
        }
        if self.jitter_amount < 0 {
            return Err(invalid("jitter_amount must be >= 0"));
        }
        if self.keep_count == 0 {
            return Err(invalid("keep_count must be > 0"));
        }
        if self.feed_generation_concurrency == 0 {
            return Err(invalid("feed_generation_concurrency must be > 0"));
        }
        Ok(self)
    }

    /// Linear freshness decay per hour of post age.
    pub fn freshness_decay_ratio(&self) -> f64 {
        self.default_max_freshness_score / self.freshness_lookback_hours()
    }

    /// Horizon of the freshness decay, in hours.
    pub fn freshness_lookback_hours(&self) -> f64 {
        self.default_lookback_days as f64 * 24.0
    }

    /// Number of candidates the reranker preprocesses before truncation.
    pub fn feed_preprocessing_length(&self) -> usize {
        self.max_feed_length * self.feed_preprocessing_multiplier
    }

    /// Maximum number of in-network posts in a final feed.
    pub fn max_in_network_posts(&self) -> usize {
        (self.max_feed_length as f64 * self.max_in_network_posts_ratio).floor() as usize
    }

    /// Maximum number of previously seen posts in a final feed.
    pub fn max_num_old_posts(&self) -> usize {
        (self.max_feed_length as f64 * self.max_prop_old_posts).floor() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = FeedConfig::new().unwrap();
        assert_eq!(config.max_feed_length, 100);
        assert_eq!(config.max_num_times_user_can_appear_in_feed, 5);
        assert_eq!(config.keep_count, 3);
    }

    #[test]
    fn derived_values_follow_the_base_fields() {
        let config = FeedConfig::new().unwrap();
        assert!((config.freshness_decay_ratio() - 3.0 / 24.0).abs() < 1e-12);
        assert_eq!(config.feed_preprocessing_length(), 200);
        assert_eq!(config.max_in_network_posts(), 50);
        assert_eq!(config.max_num_old_posts(), 60);
    }

    #[test]
    fn rejects_zero_feed_length() {
        let config = FeedConfig {
            max_feed_length: 0,
            ..FeedConfig::default()
        };
        let err = config.validated().unwrap_err();
        assert!(matches!(err, FeedGenerationError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_out_of_range_proportions() {
        let config = FeedConfig {
            max_prop_old_posts: 1.5,
            ..FeedConfig::default()
        };
        assert!(config.validated().is_err());

        let config = FeedConfig {
            max_in_network_posts_ratio: -0.1,
            ..FeedConfig::default()
        };
        assert!(config.validated().is_err());
    }

    #[test]
    fn rejects_superposter_coef_outside_unit_interval() {
        let config = FeedConfig {
            superposter_coef: 0.0,
            ..FeedConfig::default()
        };
        assert!(config.validated().is_err());

        let config = FeedConfig {
            superposter_coef: 1.2,
            ..FeedConfig::default()
        };
        assert!(config.validated().is_err());
    }

    #[test]
    fn rejects_negative_jitter() {
        let config = FeedConfig {
            jitter_amount: -1,
            ..FeedConfig::default()
        };
        assert!(config.validated().is_err());
    }

    #[test]
    fn error_message_names_the_field() {
        let config = FeedConfig {
            keep_count: 0,
            ..FeedConfig::default()
        };
        let err = config.validated().unwrap_err();
        assert!(err.to_string().contains("keep_count"));
    }
}
