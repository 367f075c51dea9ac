//! skylarkd — Skylark gateway daemon.

use std::sync::Arc;

use anyhow::{Context, Result};

use skylark_core::config::SkylarkConfig;
use skylark_services::{GatewayControl, LocalObjectStore};
use skylarkd::Gateway;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = SkylarkConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = SkylarkConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        SkylarkConfig::default()
    });
    tracing::info!(
        region = %config.gateway.region,
        workers = config.gateway.worker_count(),
        "skylarkd starting"
    );

    // Object store
    let objects = LocalObjectStore::new(&config.storage.root).with_context(|| {
        format!(
            "failed to create object store root: {}",
            config.storage.root.display()
        )
    })?;
    tracing::info!(root = %config.storage.root.display(), "local object store ready");

    let api_port = config.gateway.api_port;
    let gateway = Gateway::start(config, Arc::new(objects))
        .await
        .context("failed to start gateway")?;

    // Control API
    let api_task = {
        let state = skylark_api::ApiState::new(Arc::new(gateway.clone()) as Arc<dyn GatewayControl>);
        tokio::spawn(async move {
            if let Err(e) = skylark_api::serve(state, api_port).await {
                tracing::error!(error = %e, "control API failed");
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            if let Err(e) = r {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("shutdown signal received");
        }
        r = api_task => tracing::error!("control API exited: {:?}", r),
    }

    gateway.shutdown().await;
    Ok(())
}
