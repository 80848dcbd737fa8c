use std::sync::Arc;

use serenity::http::Http;
use tokio::runtime::Handle;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use giveaway_engine::clock::SystemClock;
use giveaway_engine::config::Config;
use giveaway_engine::discord::{DiscordNotifier, DiscordOriginResolver};
use giveaway_engine::error::Result;
use giveaway_engine::giveaway::{GiveawayEngine, JsonFileStore, Scheduler, recover};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(why) = run().await {
        error!("Giveaway engine error: {}", why);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = Config::from_env()?;
    let http = Arc::new(Http::new(config.require_discord_token()?));

    let store = Arc::new(JsonFileStore::new(&config.data_dir));
    let notifier = Arc::new(DiscordNotifier::new(http.clone(), Handle::current()));
    let engine = Arc::new(GiveawayEngine::new(store, Arc::new(SystemClock), notifier));

    info!("Loading saved giveaways from {}", config.data_dir.display());
    let resolver = DiscordOriginResolver::new(http);
    recover(&engine, &resolver).await?;

    let scheduler = Scheduler::new(engine.clone())
        .with_period(config.sweep_interval)
        .spawn();

    if let Err(why) = tokio::signal::ctrl_c().await {
        error!("Can't listen for the shutdown signal: {}", why);
    }

    info!("Shutting down");
    scheduler.shutdown().await;
    engine.persist_all()
}
