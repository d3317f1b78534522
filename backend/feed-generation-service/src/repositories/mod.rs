pub mod feed_repo;
pub mod scores_repo;

pub use feed_repo::FeedStorageRepository;
pub use scores_repo::{JsonlScoresRepository, ScoresRepository};
