pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod providers;
pub mod repositories;
pub mod services;
pub mod storage;

pub use config::FeedConfig;
pub use error::{FeedGenerationError, Result};
pub use orchestrator::{FeedGenerationDependencies, FeedGenerationOrchestrator};
pub use services::CancellationToken;
