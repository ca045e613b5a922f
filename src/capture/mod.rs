//! Upstream capture: connection, multipart parsing and the background worker

pub mod parser;
pub mod upstream;
pub mod worker;

pub use parser::FrameParser;
pub use upstream::{HttpUpstream, UpstreamSource};
pub use worker::{CaptureStats, CaptureStatsSnapshot, UpstreamCapture};
