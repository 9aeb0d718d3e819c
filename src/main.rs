use anyhow::Context as AnyhowContext;
use survey_archiver::config::Config;
use survey_archiver::media::{AttachmentMaterializer, HttpDownloader};
use survey_archiver::source::DiscordSource;
use survey_archiver::store::StateStore;
use survey_archiver::sync::{Archiver, SyncOptions};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = Config::from_env()?;
    config.prepare_directories()?;
    info!("Starting archive run with {:?}", config);

    let source = DiscordSource::new(&config.discord_token);
    let bot = source
        .current_user()
        .await
        .context("Failed to authenticate with Discord")?;
    info!("Logged in as {}", bot);

    let mut store = StateStore::new(&config.store_root);
    store
        .load_all()
        .with_context(|| format!("Failed to read {}", config.store_root.display()))?;

    let materializer =
        AttachmentMaterializer::new(&config.media_root, HttpDownloader::new(reqwest::Client::new()));
    let mut archiver = Archiver::new(source, store, materializer, SyncOptions::from(&config));

    let summary = archiver.run().await;
    info!(
        "Collected {} surveys and {} assets into {}",
        summary.total_surveys,
        summary.total_assets,
        config.store_root.display()
    );

    Ok(())
}
