use anyhow::Context;
use feed_generation_service::{FeedConfig, FeedGenerationOrchestrator};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    // Load config
    let config = FeedConfig::from_env().context("Failed to load config")?;

    let data_root =
        std::env::var("FEED_DATA_ROOT").unwrap_or_else(|_| "./data".to_string());
    let test_mode = std::env::var("FEED_TEST_MODE")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let export_new_scores = std::env::var("FEED_EXPORT_NEW_SCORES")
        .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
        .unwrap_or(true);

    info!(data_root = %data_root, test_mode, "starting feed-generation-service");

    let orchestrator = FeedGenerationOrchestrator::with_local_storage(config, data_root);
    let analytics = orchestrator
        .run(None, export_new_scores, test_mode)
        .await
        .context("Feed generation session failed")?;

    info!(
        total_feeds = analytics.total_feeds,
        total_posts = analytics.total_posts,
        "session finished"
    );
    Ok(())
}
