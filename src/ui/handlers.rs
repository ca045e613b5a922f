//! HTTP handlers

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;

use crate::capture::CaptureStatsSnapshot;
use crate::ui::server::AppState;
use crate::viewers::{StreamingState, ViewerSession};

/// API response wrapper
#[derive(serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
        }
    }
}

/// Relay status
#[derive(serde::Serialize)]
pub struct RelayStatus {
    pub streaming: StreamingState,
    pub viewers: usize,
    pub generation: u64,
    pub last_frame_bytes: Option<usize>,
    pub last_frame_at: Option<DateTime<Utc>>,
    pub bytes_published: u64,
    pub capture: CaptureStatsSnapshot,
    pub uptime_seconds: u64,
}

/// Query options for the feed
#[derive(serde::Deserialize, Default)]
#[serde(default)]
pub struct FeedParams {
    /// Watch without keeping the upstream connection alive
    pub passive: bool,
}

/// Full-screen viewer page
pub async fn index() -> Html<&'static str> {
    Html(include_str!("index.html"))
}

/// Endless multipart/x-mixed-replace stream for one viewer
pub async fn video_feed(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FeedParams>,
) -> Response {
    let session = if params.passive {
        ViewerSession::passive(
            &state.registry,
            state.broadcaster.clone(),
            state.boundary.clone(),
            state.disabled_poll,
        )
    } else {
        ViewerSession::attach(
            &state.registry,
            state.broadcaster.clone(),
            state.boundary.clone(),
            state.disabled_poll,
        )
    };
    tracing::debug!(viewer = %session.id(), passive = params.passive, "Feed requested");

    let content_type = format!("multipart/x-mixed-replace; boundary={}", state.boundary);
    let body = Body::from_stream(session.into_stream().map(Ok::<_, Infallible>));

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "no-store, must-revalidate".to_string()),
            (header::PRAGMA, "no-cache".to_string()),
            (header::EXPIRES, "0".to_string()),
        ],
        body,
    )
        .into_response()
}

/// Get relay status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<RelayStatus>> {
    let (viewers, streaming) = state.registry.snapshot();
    let latest = state.broadcaster.latest();

    let status = RelayStatus {
        streaming,
        viewers,
        generation: latest.as_ref().map(|(_, generation)| *generation).unwrap_or(0),
        last_frame_bytes: latest.as_ref().map(|(frame, _)| frame.len()),
        last_frame_at: state.broadcaster.published_at(),
        bytes_published: state.broadcaster.bytes_published(),
        capture: state.capture_stats.snapshot(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    };

    Json(ApiResponse::ok(status))
}
