//! Per-user personalization context: which posts are in-network.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::models::{PostSource, ScoredPost, StudyUser};

/// User DID to the URIs of posts authored inside that user's network,
/// preserving corpus order.
pub type UserInNetworkPostsMap = HashMap<String, Vec<String>>;

/// Joins the scored corpus against the social graph.
pub struct UserContextService;

impl UserContextService {
    pub fn new() -> Self {
        Self
    }

    /// In-network URIs per study user. Only firehose posts qualify: the
    /// sync pipeline stores posts from followed accounts in the firehose
    /// source, so a popular followed account's posts appear there too and
    /// the most-liked copy can be ignored.
    pub fn build_in_network_context(
        &self,
        scored_posts: &[ScoredPost],
        study_users: &[StudyUser],
        social_graph: &HashMap<String, Vec<String>>,
    ) -> UserInNetworkPostsMap {
        let baseline: Vec<&ScoredPost> = scored_posts
            .iter()
            .filter(|p| p.post.source == PostSource::Firehose)
            .collect();
        if baseline.is_empty() {
            warn!("no firehose posts available as in-network candidates");
        }

        study_users
            .iter()
            .map(|user| {
                (
                    user.user_did.clone(),
                    self.in_network_uris_for_user(user, &baseline, social_graph),
                )
            })
            .collect()
    }

    fn in_network_uris_for_user(
        &self,
        user: &StudyUser,
        baseline: &[&ScoredPost],
        social_graph: &HashMap<String, Vec<String>>,
    ) -> Vec<String> {
        // An absent entry means the user's network was never synced, or
        // they genuinely follow nobody. Either way the feed degrades to
        // out-of-network content.
        let followed: HashSet<&str> = match social_graph.get(&user.user_did) {
            Some(dids) => dids.iter().map(String::as_str).collect(),
            None => {
                warn!(user_did = %user.user_did, "no social graph entry for user");
                HashSet::new()
            }
        };

        baseline
            .iter()
            .filter(|post| followed.contains(post.author_did()))
            .map(|post| post.uri().to_string())
            .collect()
    }
}

impl Default for UserContextService {
    fn default() -> Self {
        Self::new()
    }
}
