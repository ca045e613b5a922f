//! # MJPEG Relay
//!
//! On-demand relay of a single upstream MJPEG camera to any number of HTTP viewers.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────┐
//! │  Upstream camera (HTTP)  │   multipart/x-mixed-replace
//! └────────────┬─────────────┘
//!              │ only while viewers > 0
//!              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │            UpstreamCapture (capture::worker)                │
//! │   Idle ──(Enabled)──▶ Connecting/Streaming ──(error)──▶     │
//! │     ▲                        │            backoff + retry   │
//! │     └──────(Disabled)────────┘                              │
//! │                 FrameParser (capture::parser)               │
//! └────────────────────────────┬────────────────────────────────┘
//!                              │ publish(frame)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │        FrameBroadcaster (stream::broadcaster)               │
//! │        latest-wins slot + generation counter                │
//! └──────┬──────────────────────┬──────────────────────┬────────┘
//!        │ wait_for_next        │                      │
//!        ▼                      ▼                      ▼
//! ┌─────────────┐        ┌─────────────┐        ┌─────────────┐
//! │ViewerSession│        │ViewerSession│        │ViewerSession│
//! └──────┬──────┘        └──────┬──────┘        └──────┬──────┘
//!        │  ViewerHandle (attach/detach) ──▶ ViewerRegistry
//!        ▼                      ▼                      ▼      │
//!   GET /video_feed        GET /video_feed       GET /video_feed
//!                                                             │
//!          ViewerRegistry gates UpstreamCapture ◀─────────────┘
//! ```

pub mod capture;
pub mod config;
pub mod error;
pub mod stream;
pub mod ui;
pub mod viewers;

pub use error::{CaptureError, Error, Result};

/// Application-wide constants
pub mod constants {
    /// Boundary token agreed with the upstream camera firmware
    pub const DEFAULT_BOUNDARY: &str = "123456789000000000000987654321";

    /// Default upstream camera URL
    pub const DEFAULT_UPSTREAM_URL: &str = "http://192.168.0.105/";

    /// Default bind host for the viewer-facing HTTP server
    pub const DEFAULT_HOST: &str = "0.0.0.0";

    /// Default HTTP port for viewers
    pub const DEFAULT_HTTP_PORT: u16 = 5000;

    /// Upstream connect + response head timeout
    pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

    /// Pause after an upstream failure before reconnecting
    pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 5_000;

    /// Streaming state poll interval while no viewers are attached
    pub const DEFAULT_IDLE_POLL_MS: u64 = 1_000;

    /// Snapshot re-send interval for sessions while streaming is disabled
    pub const DEFAULT_DISABLED_POLL_MS: u64 = 500;

    /// Largest accepted upstream part
    pub const DEFAULT_MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

    /// Longest accepted boundary/header line from upstream
    pub const MAX_LINE_BYTES: usize = 8 * 1024;

    /// Read buffer for the upstream socket
    pub const UPSTREAM_READ_BUFFER: usize = 64 * 1024;
}
