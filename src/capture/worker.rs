//! Upstream capture worker
//!
//! Runs for the lifetime of the process. While no viewer is attached it idles,
//! polling the streaming state. Once enabled it connects, parses frames and
//! publishes them until streaming is disabled or the connection fails. Failures
//! are logged and retried after a fixed backoff; the loop never exits.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::capture::parser::FrameParser;
use crate::capture::upstream::UpstreamSource;
use crate::config::UpstreamConfig;
use crate::error::CaptureError;
use crate::stream::SharedBroadcaster;
use crate::viewers::{SharedRegistry, StreamingState};

/// Counters updated by the capture worker
#[derive(Debug, Default)]
pub struct CaptureStats {
    connect_attempts: AtomicU64,
    connections: AtomicU64,
    frames_published: AtomicU64,
    errors: AtomicU64,
}

impl CaptureStats {
    pub fn snapshot(&self) -> CaptureStatsSnapshot {
        CaptureStatsSnapshot {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
            frames_published: self.frames_published.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`CaptureStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CaptureStatsSnapshot {
    pub connect_attempts: u64,
    pub connections: u64,
    pub frames_published: u64,
    pub errors: u64,
}

/// Background task feeding the broadcaster from the upstream source
pub struct UpstreamCapture<S> {
    source: S,
    boundary: String,
    max_frame_bytes: usize,
    retry_backoff: Duration,
    idle_poll: Duration,
    broadcaster: SharedBroadcaster,
    state_rx: watch::Receiver<StreamingState>,
    stats: Arc<CaptureStats>,
}

impl<S: UpstreamSource> UpstreamCapture<S> {
    pub fn new(
        source: S,
        config: &UpstreamConfig,
        broadcaster: SharedBroadcaster,
        registry: &SharedRegistry,
    ) -> Self {
        Self {
            source,
            boundary: config.boundary.clone(),
            max_frame_bytes: config.max_frame_bytes,
            retry_backoff: config.retry_backoff(),
            idle_poll: config.idle_poll(),
            broadcaster,
            state_rx: registry.subscribe(),
            stats: Arc::new(CaptureStats::default()),
        }
    }

    /// Shared counters, readable while the worker runs
    pub fn stats(&self) -> Arc<CaptureStats> {
        self.stats.clone()
    }

    /// Run the worker on the tokio runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Worker loop; never returns
    pub async fn run(mut self) {
        tracing::info!(upstream = %self.source.describe(), "Upstream capture idle");
        loop {
            self.wait_until_enabled().await;

            match self.stream_once().await {
                Ok(()) => {
                    tracing::info!("Streaming disabled, upstream connection closed");
                }
                Err(e) => {
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    if e.is_truncation() {
                        tracing::warn!("Upstream stream interrupted: {}", e);
                    } else {
                        tracing::warn!("Upstream error: {}", e);
                    }
                    tracing::info!("Retrying in {:?}", self.retry_backoff);
                    tokio::time::sleep(self.retry_backoff).await;
                }
            }
        }
    }

    async fn wait_until_enabled(&mut self) {
        loop {
            if self.state_rx.borrow_and_update().is_enabled() {
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.idle_poll) => {}
                changed = self.state_rx.changed() => {
                    if changed.is_err() {
                        tokio::time::sleep(self.idle_poll).await;
                    }
                }
            }
        }
    }

    /// Stream until disabled (`Ok`) or until the connection fails
    async fn stream_once(&mut self) -> Result<(), CaptureError> {
        self.stats.connect_attempts.fetch_add(1, Ordering::Relaxed);
        tracing::info!(upstream = %self.source.describe(), "Connecting to upstream");

        let reader = self.source.connect().await?;
        self.stats.connections.fetch_add(1, Ordering::Relaxed);
        tracing::info!("Upstream connected");

        let mut parser = FrameParser::new(reader, &self.boundary, self.max_frame_bytes);
        loop {
            if !self.state_rx.borrow_and_update().is_enabled() {
                return Ok(());
            }

            let frame = {
                let next = parser.next_frame();
                tokio::pin!(next);
                loop {
                    tokio::select! {
                        frame = &mut next => break frame?,
                        changed = self.state_rx.changed() => {
                            if changed.is_err() || !self.state_rx.borrow_and_update().is_enabled() {
                                return Ok(());
                            }
                        }
                    }
                }
            };

            let size = frame.len();
            let generation = self.broadcaster.publish(frame);
            self.stats.frames_published.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(generation, size, "Frame published");
        }
    }
}
