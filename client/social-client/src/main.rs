/// Community client - command line entry point
///
/// Restores the saved session, loads the current user and the first feed
/// page, and prints a short summary. Cache counters go to
/// `COMMUNITY_METRICS_PATH` when it is set.
use anyhow::{Context, Result};
use social_client::logging::init_tracing;
use social_client::metrics;
use social_client::{ClientConfig, PageLoad, SocialClient};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let config = ClientConfig::from_env().context("Failed to load configuration")?;
    init_tracing(config.logging.format)?;

    info!(base_url = %config.api.base_url, "Starting community client");
    let registry = metrics::cache_registry()?;

    let client = SocialClient::from_config(&config).context("Failed to build client")?;
    if !client.session().is_authenticated() {
        warn!(
            path = %config.session.credentials_path.display(),
            "No saved session, log in first"
        );
        return Ok(());
    }

    let summary = show_summary(&client).await;
    if let Some(path) = &config.metrics.textfile_path {
        metrics::write_textfile(&registry, path)?;
    }
    summary
}

async fn show_summary(client: &SocialClient) -> Result<()> {
    let user = client
        .fetch_current_user()
        .await
        .context("Failed to load current user")?;
    let load = client.refresh_feed().await.context("Failed to load feed")?;

    println!(
        "Signed in as {} ({} friends, {} posts)",
        user.profile.name, user.friends_count, user.posts_count
    );
    for post in client.feed() {
        println!(
            "#{} {} likes, {} comments: {}",
            post.id, post.likes_count, post.comments_count, post.content
        );
    }
    if let PageLoad::Appended { has_next: true, .. } = load {
        println!("More posts available");
    }

    Ok(())
}
