//! MJPEG Relay
//!
//! Serves one upstream MJPEG camera to many browsers, connecting to the camera
//! only while somebody is watching.
//!
//! Usage: `relay [config.toml]`. Environment overrides:
//! `MJPEG_RELAY_UPSTREAM_URL`, `MJPEG_RELAY_BOUNDARY`, `MJPEG_RELAY_HOST`,
//! `MJPEG_RELAY_PORT`.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mjpeg_relay::{
    capture::{HttpUpstream, UpstreamCapture},
    config::{RelayConfig, ENV_CONFIG_PATH},
    stream::FrameBroadcaster,
    ui::{AppState, WebServer},
    viewers::ViewerRegistry,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting MJPEG relay");

    let config = load_config()?;
    tracing::info!(
        "Upstream {} (boundary {}), retry backoff {:?}",
        config.upstream.url,
        config.upstream.boundary,
        config.upstream.retry_backoff()
    );

    let registry = Arc::new(ViewerRegistry::new());
    let broadcaster = Arc::new(FrameBroadcaster::new());

    let upstream = HttpUpstream::new(&config.upstream.url, config.upstream.connect_timeout())?;
    let capture = UpstreamCapture::new(upstream, &config.upstream, broadcaster.clone(), &registry);
    let capture_stats = capture.stats();
    let capture_handle = capture.spawn();

    let state = Arc::new(AppState::new(&config, registry, broadcaster, capture_stats));
    let web_server = WebServer::new(config.server.clone(), state);

    web_server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    capture_handle.abort();
    tracing::info!("Relay stopped");
    Ok(())
}

/// Config file from argv[1], then `MJPEG_RELAY_CONFIG`, then the platform config dir
fn load_config() -> Result<RelayConfig> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(ENV_CONFIG_PATH).ok())
        .map(PathBuf::from)
        .or_else(RelayConfig::default_path);

    let mut config = match &path {
        Some(path) => {
            let config = RelayConfig::load_or_default(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            tracing::info!("Config path: {}", path.display());
            config
        }
        None => RelayConfig::default(),
    };

    config.apply_env()?;
    config.validate()?;
    Ok(config)
}
