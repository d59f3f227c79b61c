mod config;
mod engine;
mod error;
mod icy;
mod metadata;
mod player;
mod schedule;
mod station;
mod ticker;
mod ui;

use anyhow::{Context, Result};
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::watch;

use crate::config::Config;
use crate::engine::PlaybackEngine;
use crate::metadata::{MetadataResolver, NowPlayingBoard};
use crate::player::FfmpegBackend;
use crate::station::StationCatalog;
use crate::ticker::{CoinGeckoFeed, PriceSnapshot, PriceTicker, ASSETS};

fn init_logging(config: &Config) -> Result<()> {
    let log_path = &config.logging.file;
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("cannot open log file {}", log_path.display()))?;

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.filter.clone());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(filter.as_str())
        .with_ansi(false)
        .init();

    // the TUI owns the terminal, so point the operator at the log instead
    eprintln!("web3radio log: {}", log_path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let (config, config_error) = match Config::load() {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };
    init_logging(&config)?;
    if let Some(e) = config_error {
        tracing::warn!(error = %e, path = %Config::config_path().display(), "config unreadable, using defaults");
    }
    tracing::info!("web3radio starting");

    let client = Client::builder()
        .user_agent(config.player.user_agent.as_str())
        .connect_timeout(config.connect_timeout())
        .build()?;

    let board = NowPlayingBoard::new();
    let resolver = Arc::new(MetadataResolver::standard(client.clone()));

    let (prices_rx, price_task) = if config.prices.enabled {
        let feed = CoinGeckoFeed::new(client.clone(), config.prices.endpoint.clone());
        let ticker = Arc::new(PriceTicker::new(Box::new(feed), &ASSETS));
        let rx = ticker.subscribe();
        (rx, Some(ticker.spawn(config.price_interval())))
    } else {
        let (_tx, rx) = watch::channel(PriceSnapshot::default());
        (rx, None)
    };

    let backend = FfmpegBackend::new(
        client.clone(),
        config.player.ffmpeg_path.clone(),
        config.connect_timeout(),
    )
    .map_err(|e| {
        eprintln!("Failed to start audio player: {}", e);
        eprintln!("Make sure you have audio drivers installed and working");
        e
    })?;

    let mut engine = PlaybackEngine::new(
        backend,
        StationCatalog::new(&config.stations),
        resolver,
        board.clone(),
        config.player.default_station,
        config.player.volume,
        config.metadata_interval(),
    );

    let ui_result = ui::run_ui(&mut engine, board.subscribe(), prices_rx).await;

    engine.shutdown();
    if let Some(task) = price_task {
        task.cancel();
    }

    if let Err(e) = ui_result {
        tracing::error!(error = %e, "ui exited with an error");
        eprintln!("UI error: {:?}", e);
    } else {
        println!("Thanks for listening to Web3 Radio!");
    }

    Ok(())
}
