//! Builds the three per-condition candidate pools.

use std::cmp::Ordering;
use std::collections::HashMap;

use tracing::warn;

use crate::config::FeedConfig;
use crate::models::{CandidatePostPools, PostSource, ScoredPost};

/// Produces sorted, per-author-capped candidate pools from the scored
/// corpus.
pub struct CandidatePoolBuilder {
    config: FeedConfig,
}

impl CandidatePoolBuilder {
    pub fn new(config: FeedConfig) -> Self {
        Self { config }
    }

    pub fn generate_candidate_pools(&self, posts: &[ScoredPost]) -> CandidatePostPools {
        let mut reverse_chronological: Vec<ScoredPost> = posts
            .iter()
            .filter(|p| p.post.source == PostSource::Firehose)
            .cloned()
            .collect();
        reverse_chronological.sort_by(|a, b| b.post.synctimestamp.cmp(&a.post.synctimestamp));

        let mut engagement: Vec<ScoredPost> = posts.to_vec();
        engagement.sort_by(|a, b| descending(a.engagement_score, b.engagement_score));

        let mut treatment: Vec<ScoredPost> = posts.to_vec();
        treatment.sort_by(|a, b| descending(a.treatment_score, b.treatment_score));

        let pools = CandidatePostPools {
            reverse_chronological: self.enforce_per_author_cap(reverse_chronological),
            engagement: self.enforce_per_author_cap(engagement),
            treatment: self.enforce_per_author_cap(treatment),
        };

        if pools.reverse_chronological.is_empty() {
            warn!("reverse chronological candidate pool is empty");
        }

        pools
    }

    /// Keep at most `max_num_times_user_can_appear_in_feed` posts per
    /// author, walking the pool in sort order.
    fn enforce_per_author_cap(&self, pool: Vec<ScoredPost>) -> Vec<ScoredPost> {
        let cap = self.config.max_num_times_user_can_appear_in_feed;
        let mut author_counts: HashMap<String, usize> = HashMap::new();

        pool.into_iter()
            .filter(|post| {
                let count = author_counts
                    .entry(post.author_did().to_string())
                    .or_insert(0);
                *count += 1;
                *count <= cap
            })
            .collect()
    }
}

/// Descending score order; NaN compares equal so a bad score cannot panic
/// the sort.
fn descending(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}
