//! axum web server for viewers

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::capture::CaptureStats;
use crate::config::{RelayConfig, ServerConfig};
use crate::error::{Error, Result};
use crate::stream::SharedBroadcaster;
use crate::ui::handlers;
use crate::viewers::SharedRegistry;

/// Shared state handed to every request handler
pub struct AppState {
    pub registry: SharedRegistry,
    pub broadcaster: SharedBroadcaster,
    pub capture_stats: Arc<CaptureStats>,
    pub boundary: Arc<str>,
    pub disabled_poll: Duration,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: &RelayConfig,
        registry: SharedRegistry,
        broadcaster: SharedBroadcaster,
        capture_stats: Arc<CaptureStats>,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            capture_stats,
            boundary: Arc::from(config.upstream.boundary.as_str()),
            disabled_poll: config.viewer.disabled_poll(),
            started_at: Instant::now(),
        }
    }
}

/// HTTP front end serving the page, the MJPEG feed and status
pub struct WebServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(config: ServerConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// Routes without a listener, also used by tests
    pub fn router(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/", get(handlers::index))
            .route("/video_feed", get(handlers::video_feed))
            .route("/api/status", get(handlers::get_status))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Serve until `shutdown` resolves.
    ///
    /// Open feeds are endless, so shutdown drops them instead of draining.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let bind_address = self.config.bind_address();
        let listener = TcpListener::bind(&bind_address)
            .await
            .map_err(|e| Error::Server(format!("cannot bind {bind_address}: {e}")))?;
        tracing::info!("Viewer page available at http://{}", bind_address);

        let app = Self::router(self.state);
        tokio::select! {
            served = axum::serve(listener, app) => {
                served.map_err(|e| Error::Server(e.to_string()))
            }
            _ = shutdown => {
                tracing::info!("Web server shutting down");
                Ok(())
            }
        }
    }
}
