pub mod candidate;
pub mod context;
pub mod data_loading;
pub mod feed;
pub mod feed_statistics;
pub mod ranking;
pub mod reranking;
pub mod scoring;
pub mod session_analytics;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use candidate::CandidatePoolBuilder;
pub use context::{UserContextService, UserInNetworkPostsMap};
pub use data_loading::DataLoader;
pub use feed::FeedGenerationService;
pub use feed_statistics::generate_feed_statistics;
pub use ranking::RankingService;
pub use reranking::RerankingService;
pub use scoring::{ScoredPosts, ScoringService};
pub use session_analytics::SessionAnalyticsCalculator;

/// Cooperative cancellation handle for a session. Cheap to clone; workers
/// poll it between units of work.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Round a proportion to a fixed number of decimal digits, matching how the
/// analytics rows are stored.
pub(crate) fn round_prop(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}
