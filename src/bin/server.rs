//! HTTP server entrypoint: loads configuration, opens the block store,
//! optionally loads a pre-built classifier ensemble, spawns the ingest
//! workers, and serves the HTTP surface — the same shape as the teacher's
//! `tinyzkp_api::main` (init tracing, build shared state, spawn the server
//! future), generalized to multiple long-lived background tasks.

use std::sync::Arc;

use clientprint::api::{build_router, AppState};
use clientprint::config::Config;
use clientprint::ensemble::MultiRangeEnsemble;
use clientprint::graffiti::GraffitiTable;
use clientprint::ingest::{run_backfiller, run_listener, BeaconClient};
use clientprint::store::BlockStore;

const DEFAULT_PORT: u16 = 3030;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .compact()
        .init();

    let config = Config::from_env();
    tracing::info!(bn_url = %config.bn_url, data_dir = %config.data_dir.display(), "starting clientprint server");

    let store = Arc::new(BlockStore::open(&config.block_db).await?);

    let ensemble = if config.disable_classifier {
        tracing::warn!("DISABLE_CLASSIFIER set: classification endpoints will return 503");
        None
    } else {
        match &config.model_path {
            Some(path) => {
                let ensemble = MultiRangeEnsemble::load_from_dir(path, &GraffitiTable::default())?;
                tracing::info!(ranges = ensemble.ranges().len(), "loaded classifier ensemble");
                Some(Arc::new(ensemble))
            }
            None => {
                tracing::warn!("MODEL_PATH not set: classification endpoints will return 503");
                None
            }
        }
    };

    if let Some(ensemble) = ensemble.clone() {
        let beacon = Arc::new(BeaconClient::new(config.bn_url.clone()));
        tokio::spawn(run_listener(beacon.clone(), ensemble.clone(), store.clone()));
        tokio::spawn(run_backfiller(beacon, ensemble, store.clone()));
    }

    let state = AppState { ensemble, store };
    let router = build_router(state);

    let port = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
