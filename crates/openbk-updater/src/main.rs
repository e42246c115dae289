// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of OpenBK Updater.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! OpenBK Updater - entry point

use anyhow::Context;
use clap::Parser;
use openbk_updater::downloader::FirmwareDownloader;
use openbk_updater::firmware_url::ServerUrlResolver;
use openbk_updater::mqtt;
use openbk_updater::store::ArtifactStore;
use openbk_updater::web::{self, AppState};
use openbk_updater::{
    DeviceRegistry, EventBus, GithubReleaseFeed, ReleaseCache, StatusIngest, UpdateOrchestrator,
    UpdaterConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "openbk-updater")]
#[command(about = "Firmware update service for OpenBK devices", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "OPENBK_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,openbk_updater=debug")),
        )
        .init();

    let cli = Cli::parse();
    let config = UpdaterConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    info!(
        "Starting OpenBK Updater (interval {}s, firmware dir {})",
        config.feed.update_interval_secs,
        config.serving.firmware_dir.display()
    );

    let events = EventBus::new();
    let registry = Arc::new(DeviceRegistry::new());
    let feed = GithubReleaseFeed::new(&config.feed).context("Failed to build release feed client")?;
    let cache = Arc::new(ReleaseCache::new(Arc::new(feed), events.clone()));

    if let Err(e) = cache.refresh().await {
        warn!("Initial release fetch failed: {e}");
    }
    let refresh_task = tokio::spawn(cache.clone().run_periodic(config.update_interval()));

    let (client, eventloop) = mqtt::connect(&config.mqtt);
    let ingest = StatusIngest::new(registry.clone(), events.clone());
    let mqtt_task = tokio::spawn(mqtt::run_status_loop(client.clone(), eventloop, ingest));

    let store = ArtifactStore::new(config.serving.firmware_dir.clone());
    let downloader = FirmwareDownloader::new(config.request_timeout())?;
    let orchestrator = UpdateOrchestrator::new(
        registry,
        cache,
        store.clone(),
        downloader,
        ServerUrlResolver::from_config(&config),
        Arc::new(client.clone()),
        events,
    )
    .with_install_timeout(config.install_timeout());

    let (shutdown, _) = watch::channel(false);
    let app = web::router(AppState {
        orchestrator: Arc::new(orchestrator),
        store,
        shutdown: shutdown.clone(),
    });

    let addr = format!("{}:{}", config.http.bind_address, config.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Serving firmware and API on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
            shutdown.send_replace(true);
        })
        .await?;

    refresh_task.abort();
    mqtt_task.abort();
    let _ = client.disconnect().await;
    info!("Shutting down");

    Ok(())
}
