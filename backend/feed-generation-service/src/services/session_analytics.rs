//! Aggregate analytics over one feed-generation session.

use std::collections::{HashMap, HashSet};

use super::round_prop;
use crate::models::{Condition, FeedWithMetadata, SessionAnalytics};

/// Computes the per-session analytics row.
pub struct SessionAnalyticsCalculator;

impl SessionAnalyticsCalculator {
    pub fn new() -> Self {
        Self
    }

    pub fn calculate(
        &self,
        user_to_feed_map: &HashMap<String, FeedWithMetadata>,
        session_timestamp: &str,
    ) -> SessionAnalytics {
        let total_feeds = user_to_feed_map.len();
        let total_posts: usize = user_to_feed_map.values().map(|f| f.feed.len()).sum();
        let total_in_network_posts: usize = user_to_feed_map
            .values()
            .map(|f| f.feed.iter().filter(|post| post.is_in_network).count())
            .sum();
        let total_in_network_posts_prop = if total_posts > 0 {
            round_prop(total_in_network_posts as f64 / total_posts as f64, 2)
        } else {
            0.0
        };

        let engagement_uris = Self::unique_uris_for_condition(user_to_feed_map, Condition::Engagement);
        let treatment_uris = Self::unique_uris_for_condition(
            user_to_feed_map,
            Condition::RepresentativeDiversification,
        );
        let overlap = engagement_uris.intersection(&treatment_uris).count();

        let prop_overlap_treatment_uris_in_engagement_uris = if treatment_uris.is_empty() {
            0.0
        } else {
            round_prop(overlap as f64 / treatment_uris.len() as f64, 3)
        };
        let prop_overlap_engagement_uris_in_treatment_uris = if engagement_uris.is_empty() {
            0.0
        } else {
            round_prop(overlap as f64 / engagement_uris.len() as f64, 3)
        };

        let mut total_feeds_per_condition: HashMap<String, usize> = Condition::ALL
            .iter()
            .map(|condition| (condition.as_str().to_string(), 0))
            .collect();
        for feed in user_to_feed_map.values() {
            if let Some(count) = total_feeds_per_condition.get_mut(feed.condition.as_str()) {
                *count += 1;
            }
        }

        SessionAnalytics {
            total_feeds,
            total_posts,
            total_in_network_posts,
            total_in_network_posts_prop,
            total_unique_engagement_uris: engagement_uris.len(),
            total_unique_treatment_uris: treatment_uris.len(),
            prop_overlap_treatment_uris_in_engagement_uris,
            prop_overlap_engagement_uris_in_treatment_uris,
            total_feeds_per_condition,
            session_timestamp: session_timestamp.to_string(),
        }
    }

    fn unique_uris_for_condition(
        user_to_feed_map: &HashMap<String, FeedWithMetadata>,
        condition: Condition,
    ) -> HashSet<String> {
        user_to_feed_map
            .values()
            .filter(|feed| feed.condition == condition)
            .flat_map(|feed| feed.feed.iter().map(|post| post.item.clone()))
            .collect()
    }
}

impl Default for SessionAnalyticsCalculator {
    fn default() -> Self {
        Self::new()
    }
}
