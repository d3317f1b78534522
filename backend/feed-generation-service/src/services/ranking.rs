//! Initial per-user ranking: candidate pool + in-network set to an ordered
//! candidate feed.

use std::collections::HashSet;

use crate::config::FeedConfig;
use crate::error::{FeedGenerationError, Result};
use crate::models::{Condition, FeedPost, PostSource, ScoredPost};

/// Builds a per-user ordered candidate list from a condition's pool.
/// In-network posts come first, then out-of-network posts, both keeping
/// the pool's sort order.
pub struct RankingService {
    config: FeedConfig,
}

impl RankingService {
    pub fn new(config: FeedConfig) -> Self {
        Self { config }
    }

    pub fn create_ranked_candidate_feed(
        &self,
        condition: Condition,
        in_network_post_uris: &HashSet<String>,
        post_pool: &[ScoredPost],
    ) -> Result<Vec<FeedPost>> {
        if post_pool.is_empty() {
            return Err(FeedGenerationError::InvalidCandidatePool(format!(
                "empty candidate pool for condition {condition}"
            )));
        }

        let out_of_network_source = match condition {
            Condition::Engagement | Condition::RepresentativeDiversification => {
                PostSource::MostLiked
            }
            Condition::ReverseChronological => PostSource::Firehose,
        };

        let out_of_network: Vec<&ScoredPost> = post_pool
            .iter()
            .filter(|post| {
                !in_network_post_uris.contains(post.uri())
                    && post.post.source == out_of_network_source
            })
            .collect();

        if in_network_post_uris.is_empty() {
            return Ok(out_of_network
                .into_iter()
                .map(|post| FeedPost {
                    item: post.uri().to_string(),
                    is_in_network: false,
                })
                .collect());
        }

        let in_network: Vec<&ScoredPost> = post_pool
            .iter()
            .filter(|post| in_network_post_uris.contains(post.uri()))
            .collect();
        let allowed_in_network = in_network.len().min(self.config.max_in_network_posts());

        let mut feed: Vec<FeedPost> = Vec::with_capacity(allowed_in_network + out_of_network.len());
        feed.extend(in_network.into_iter().take(allowed_in_network).map(|post| FeedPost {
            item: post.uri().to_string(),
            is_in_network: true,
        }));
        feed.extend(out_of_network.into_iter().map(|post| FeedPost {
            item: post.uri().to_string(),
            is_in_network: false,
        }));

        Ok(feed)
    }
}
