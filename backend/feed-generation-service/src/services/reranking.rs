//! Re-ranking with business rules: preprocessing clip, fresh-content
//! enforcement, truncation, jitter and the final length check.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::Rng;

use crate::config::FeedConfig;
use crate::error::{FeedGenerationError, Result};
use crate::models::FeedPost;

/// Applies the post-ranking transforms in a fixed order. Stateless; the
/// jitter RNG is supplied by the caller so every worker owns its own.
pub struct RerankingService {
    config: FeedConfig,
}

impl RerankingService {
    pub fn new(config: FeedConfig) -> Self {
        Self { config }
    }

    pub fn rerank_feed(
        &self,
        feed: Vec<FeedPost>,
        previous_feed_uris: &HashSet<String>,
        rng: &mut StdRng,
    ) -> Result<Vec<FeedPost>> {
        let feed = self.clip_to_preprocessing_window(feed);
        let feed = self.enforce_fresh_content(feed, previous_feed_uris);
        let feed = self.truncate(feed);
        let feed = self.jitter(feed, rng);
        self.validate_feed_length(&feed)?;
        Ok(feed)
    }

    /// Work on a bounded multiple of the final length. The tail of the
    /// ranked candidates is low value anyway, so the later transforms never
    /// need to see it.
    fn clip_to_preprocessing_window(&self, mut feed: Vec<FeedPost>) -> Vec<FeedPost> {
        feed.truncate(self.config.feed_preprocessing_length());
        feed
    }

    /// Admit posts already seen in this user's previous feed only up to the
    /// configured budget; fresh posts always pass. Relative order is
    /// preserved.
    fn enforce_fresh_content(
        &self,
        feed: Vec<FeedPost>,
        previous_feed_uris: &HashSet<String>,
    ) -> Vec<FeedPost> {
        if previous_feed_uris.is_empty() {
            return feed;
        }

        let max_num_old_posts = self.config.max_num_old_posts();
        let mut old_post_count = 0;

        feed.into_iter()
            .filter(|post| {
                if !previous_feed_uris.contains(&post.item) {
                    return true;
                }
                if old_post_count < max_num_old_posts {
                    old_post_count += 1;
                    return true;
                }
                false
            })
            .collect()
    }

    fn truncate(&self, mut feed: Vec<FeedPost>) -> Vec<FeedPost> {
        feed.truncate(self.config.max_feed_length);
        feed
    }

    /// Shift each post by a bounded random offset, walking from the end so
    /// earlier moves do not invalidate later indices.
    fn jitter(&self, mut feed: Vec<FeedPost>, rng: &mut StdRng) -> Vec<FeedPost> {
        let jitter_amount = self.config.jitter_amount;
        if jitter_amount == 0 || feed.is_empty() {
            return feed;
        }

        let n = feed.len() as i64;
        for i in (0..feed.len()).rev() {
            let shift = rng.gen_range(-jitter_amount..=jitter_amount);
            let new_pos = (i as i64 + shift).clamp(0, n - 1) as usize;
            if new_pos != i {
                let post = feed.remove(i);
                feed.insert(new_pos, post);
            }
        }
        feed
    }

    /// The transforms can only shorten the feed, so anything below the
    /// target length means upstream did not supply enough candidates.
    fn validate_feed_length(&self, feed: &[FeedPost]) -> Result<()> {
        if feed.len() < self.config.max_feed_length {
            return Err(FeedGenerationError::UnderlongFeed {
                actual: feed.len(),
                expected: self.config.max_feed_length,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    fn feed_post(uri: &str) -> FeedPost {
        FeedPost {
            item: uri.to_string(),
            is_in_network: false,
        }
    }

    fn feed_of(uris: &[&str]) -> Vec<FeedPost> {
        uris.iter().map(|uri| feed_post(uri)).collect()
    }

    fn config(max_feed_length: usize, max_prop_old_posts: f64, jitter_amount: i64) -> FeedConfig {
        FeedConfig {
            max_feed_length,
            max_prop_old_posts,
            jitter_amount,
            ..FeedConfig::default()
        }
        .validated()
        .unwrap()
    }

    #[test]
    fn produces_a_full_feed_without_jitter() {
        let service = RerankingService::new(config(4, 0.6, 0));
        let feed = feed_of(&["p1", "p2", "p3", "p4", "p5", "p6"]);

        let result = service
            .rerank_feed(feed, &HashSet::new(), &mut StdRng::seed_from_u64(0))
            .unwrap();

        let items: Vec<&str> = result.iter().map(|p| p.item.as_str()).collect();
        assert_eq!(items, vec!["p1", "p2", "p3", "p4"]);
    }

    /// Previous feed {p1, p2, p3} with a budget of floor(4 * 0.5) = 2 old
    /// posts: p1 and p2 are admitted, p3 is dropped, and the feed comes up
    /// one post short of the required length.
    #[test]
    fn recycling_past_the_budget_fails_the_feed() {
        let service = RerankingService::new(config(4, 0.5, 0));
        let feed = feed_of(&["p1", "p2", "p3", "p4"]);
        let previous: HashSet<String> = ["p1", "p2", "p3"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let result = service.rerank_feed(feed, &previous, &mut StdRng::seed_from_u64(0));
        assert!(matches!(
            result,
            Err(FeedGenerationError::UnderlongFeed {
                actual: 3,
                expected: 4
            })
        ));
    }

    #[test]
    fn fresh_posts_backfill_the_recycling_budget() {
        let service = RerankingService::new(config(4, 0.5, 0));
        let feed = feed_of(&["p1", "p2", "p3", "p4", "p5", "p6"]);
        let previous: HashSet<String> = ["p1", "p2", "p3"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let result = service
            .rerank_feed(feed, &previous, &mut StdRng::seed_from_u64(0))
            .unwrap();

        let items: Vec<&str> = result.iter().map(|p| p.item.as_str()).collect();
        assert_eq!(items, vec!["p1", "p2", "p4", "p5"]);
    }

    #[test]
    fn empty_previous_feed_passes_everything_through() {
        let service = RerankingService::new(config(3, 0.0, 0));
        let feed = feed_of(&["p1", "p2", "p3"]);

        let result = service
            .rerank_feed(feed.clone(), &HashSet::new(), &mut StdRng::seed_from_u64(0))
            .unwrap();
        assert_eq!(result, feed);
    }

    #[test]
    fn zero_old_post_budget_drops_every_previous_uri() {
        let service = RerankingService::new(config(2, 0.0, 0));
        let feed = feed_of(&["p1", "p2", "p3", "p4"]);
        let previous: HashSet<String> = ["p1", "p3"].iter().map(|s| s.to_string()).collect();

        let result = service
            .rerank_feed(feed, &previous, &mut StdRng::seed_from_u64(0))
            .unwrap();

        let items: Vec<&str> = result.iter().map(|p| p.item.as_str()).collect();
        assert_eq!(items, vec!["p2", "p4"]);
    }

    #[test]
    fn jitter_keeps_the_same_multiset_of_posts() {
        let service = RerankingService::new(config(6, 0.6, 2));
        let feed = feed_of(&["p1", "p2", "p3", "p4", "p5", "p6"]);

        let result = service
            .rerank_feed(feed.clone(), &HashSet::new(), &mut StdRng::seed_from_u64(17))
            .unwrap();

        assert_eq!(result.len(), feed.len());
        let mut expected: Vec<&str> = feed.iter().map(|p| p.item.as_str()).collect();
        let mut actual: Vec<&str> = result.iter().map(|p| p.item.as_str()).collect();
        expected.sort_unstable();
        actual.sort_unstable();
        assert_eq!(actual, expected);
    }

    #[test]
    fn jitter_is_deterministic_for_a_fixed_seed() {
        let service = RerankingService::new(config(6, 0.6, 2));
        let feed = feed_of(&["p1", "p2", "p3", "p4", "p5", "p6"]);

        let first = service
            .rerank_feed(feed.clone(), &HashSet::new(), &mut StdRng::seed_from_u64(99))
            .unwrap();
        let second = service
            .rerank_feed(feed, &HashSet::new(), &mut StdRng::seed_from_u64(99))
            .unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn jitter_moves_posts_at_most_jitter_amount_positions_per_step() {
        let service = RerankingService::new(config(8, 0.6, 1));
        let feed = feed_of(&["p1", "p2", "p3", "p4", "p5", "p6", "p7", "p8"]);

        let result = service
            .rerank_feed(feed, &HashSet::new(), &mut StdRng::seed_from_u64(3))
            .unwrap();
        assert_eq!(result.len(), 8);
    }

    #[test]
    fn reranking_its_own_output_keeps_the_length() {
        let service = RerankingService::new(config(4, 0.6, 2));
        let feed = feed_of(&["p1", "p2", "p3", "p4", "p5", "p6", "p7", "p8"]);

        let output = service
            .rerank_feed(feed, &HashSet::new(), &mut StdRng::seed_from_u64(5))
            .unwrap();
        let output_uris: HashSet<String> = output.iter().map(|p| p.item.clone()).collect();

        let again = service
            .rerank_feed(output.clone(), &output_uris, &mut StdRng::seed_from_u64(6))
            .unwrap();
        assert_eq!(again.len(), output.len());
    }
}
