//! Per-feed statistics, JSON-encoded for external storage.

use serde::{Deserialize, Serialize};

use super::round_prop;
use crate::models::FeedPost;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedStatistics {
    pub feed_length: usize,
    pub total_in_network: usize,
    pub prop_in_network: f64,
}

/// Statistics for one finished feed, as the JSON string stored alongside
/// the feed record.
pub fn generate_feed_statistics(feed: &[FeedPost]) -> String {
    let feed_length = feed.len();
    let total_in_network = feed.iter().filter(|post| post.is_in_network).count();
    let prop_in_network = if feed_length > 0 {
        round_prop(total_in_network as f64 / feed_length as f64, 3)
    } else {
        0.0
    };

    let statistics = FeedStatistics {
        feed_length,
        total_in_network,
        prop_in_network,
    };
    serde_json::to_string(&statistics).unwrap_or_else(|_| "{}".to_string())
}
