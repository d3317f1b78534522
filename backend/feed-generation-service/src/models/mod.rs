use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp format used for session identifiers and artifact keys.
/// Fixed-width so lexicographic order equals chronological order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H:%M:%S";

/// Where a post was captured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostSource {
    /// Event-stream posts from accounts followed by at least one study user.
    Firehose,
    /// Popular posts sampled from anywhere on the network.
    MostLiked,
}

impl PostSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostSource::Firehose => "firehose",
            PostSource::MostLiked => "most_liked",
        }
    }
}

/// Experimental arm assigned to a study participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    ReverseChronological,
    Engagement,
    RepresentativeDiversification,
}

impl Condition {
    pub const ALL: [Condition; 3] = [
        Condition::ReverseChronological,
        Condition::Engagement,
        Condition::RepresentativeDiversification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::ReverseChronological => "reverse_chronological",
            Condition::Engagement => "engagement",
            Condition::RepresentativeDiversification => "representative_diversification",
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A consolidated, enriched post record as produced by the enrichment
/// pipeline. ML labels are optional; absence means the enrichment step did
/// not run or did not succeed for this post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedPost {
    pub uri: String,
    pub author_did: String,
    pub author_handle: String,
    pub text: String,
    pub source: PostSource,
    pub synctimestamp: DateTime<Utc>,
    pub consolidation_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub like_count: Option<i64>,
    #[serde(default)]
    pub similarity_score: Option<f64>,
    #[serde(default)]
    pub sociopolitical_was_successfully_labeled: Option<bool>,
    #[serde(default)]
    pub is_sociopolitical: Option<bool>,
    #[serde(default)]
    pub perspective_was_successfully_labeled: Option<bool>,
    #[serde(default)]
    pub prob_toxic: Option<f64>,
    #[serde(default)]
    pub prob_constructive: Option<f64>,
    #[serde(default)]
    pub prob_reasoning: Option<f64>,
}

/// A post with both algorithm scores attached.
#[derive(Debug, Clone)]
pub struct ScoredPost {
    pub post: EnrichedPost,
    pub engagement_score: f64,
    pub treatment_score: f64,
}

impl ScoredPost {
    pub fn uri(&self) -> &str {
        &self.post.uri
    }

    pub fn author_did(&self) -> &str {
        &self.post.author_did
    }
}

/// A study participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyUser {
    pub user_did: String,
    pub handle: String,
    pub condition: Condition,
    /// False for mock users used to smoke-test the pipeline.
    #[serde(default = "default_true")]
    pub is_study_user: bool,
}

fn default_true() -> bool {
    true
}

/// The three candidate pools feeds are drawn from, each sorted per its
/// algorithm and per-author capped.
#[derive(Debug, Clone, Default)]
pub struct CandidatePostPools {
    pub reverse_chronological: Vec<ScoredPost>,
    pub engagement: Vec<ScoredPost>,
    pub treatment: Vec<ScoredPost>,
}

impl CandidatePostPools {
    pub fn for_condition(&self, condition: Condition) -> &[ScoredPost] {
        match condition {
            Condition::ReverseChronological => &self.reverse_chronological,
            Condition::Engagement => &self.engagement,
            Condition::RepresentativeDiversification => &self.treatment,
        }
    }
}

/// One element of a generated feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedPost {
    /// Post URI.
    pub item: String,
    pub is_in_network: bool,
}

/// A finished feed for one user, ready for export.
#[derive(Debug, Clone)]
pub struct FeedWithMetadata {
    pub user_did: String,
    pub bluesky_handle: String,
    pub condition: Condition,
    pub feed: Vec<FeedPost>,
    /// JSON-encoded per-feed statistics.
    pub feed_statistics: String,
}

/// The persisted feed record. This is the bit-level contract consumed by
/// downstream services; field names must not change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFeed {
    pub feed_id: String,
    pub user_did: String,
    pub bluesky_handle: String,
    pub condition: Condition,
    pub feed_statistics: String,
    pub feed: Vec<FeedPost>,
    pub feed_generation_timestamp: String,
}

/// Key under which the shared default feed is stored.
pub const DEFAULT_FEED_USER: &str = "default";

/// A cached score pair for one post.
#[derive(Debug, Clone, PartialEq)]
pub struct PostScoreByAlgorithm {
    pub uri: String,
    pub engagement_score: f64,
    pub treatment_score: f64,
}

/// The persisted score row. Scores are optional on the wire; rows missing
/// either score are dropped when the cache is read back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedScoreRecord {
    pub uri: String,
    pub text: String,
    pub source: PostSource,
    pub engagement_score: Option<f64>,
    pub treatment_score: Option<f64>,
    pub scored_timestamp: DateTime<Utc>,
}

/// Which freshness decay curve the scorer applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FreshnessScoreFunction {
    Linear,
    #[default]
    Exponential,
}

/// Latest-feed URIs per user, keyed by user DID. The `"default"` key holds
/// the shared default feed.
#[derive(Debug, Clone, Default)]
pub struct PreviousFeeds {
    pub feeds: HashMap<String, HashSet<String>>,
}

impl PreviousFeeds {
    pub fn uris_for(&self, user_did: &str) -> HashSet<String> {
        self.feeds.get(user_did).cloned().unwrap_or_default()
    }
}

/// Author exclusion lists maintained by trust & safety.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExclusionLists {
    pub handles_excluded: HashSet<String>,
    pub dids_excluded: HashSet<String>,
}

/// Everything the pipeline needs for one session, loaded up front.
#[derive(Debug, Clone)]
pub struct LoadedData {
    pub posts: Vec<EnrichedPost>,
    pub social_graph: HashMap<String, Vec<String>>,
    pub superposter_dids: HashSet<String>,
    pub previous_feeds: PreviousFeeds,
    pub study_users: Vec<StudyUser>,
}

/// Aggregate analytics for one feed-generation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionAnalytics {
    pub total_feeds: usize,
    pub total_posts: usize,
    pub total_in_network_posts: usize,
    pub total_in_network_posts_prop: f64,
    pub total_unique_engagement_uris: usize,
    pub total_unique_treatment_uris: usize,
    pub prop_overlap_treatment_uris_in_engagement_uris: f64,
    pub prop_overlap_engagement_uris_in_treatment_uris: f64,
    pub total_feeds_per_condition: HashMap<String, usize>,
    pub session_timestamp: String,
}
