//! Per-connection viewer stream
//!
//! A session turns broadcaster frames into multipart chunks for one HTTP client.
//! Dropping the session (client gone, response cancelled) drops its
//! [`ViewerHandle`], which detaches the viewer.

use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use futures_util::stream::{self, Stream};
use tokio::sync::watch;
use uuid::Uuid;

use crate::stream::{Frame, SharedBroadcaster};
use crate::viewers::registry::{SharedRegistry, StreamingState, ViewerHandle};

/// Serialize one frame as a multipart part
pub fn encode_chunk(boundary: &str, frame: &Frame) -> Bytes {
    let header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        boundary,
        frame.len()
    );
    let mut chunk = BytesMut::with_capacity(header.len() + frame.len() + 2);
    chunk.put_slice(header.as_bytes());
    chunk.put_slice(frame.data());
    chunk.put_slice(b"\r\n");
    chunk.freeze()
}

/// Output side of one viewer connection
pub struct ViewerSession {
    id: Uuid,
    /// `None` for passive sessions that never wake the upstream
    _handle: Option<ViewerHandle>,
    broadcaster: SharedBroadcaster,
    state_rx: watch::Receiver<StreamingState>,
    boundary: Arc<str>,
    disabled_poll: Duration,
    last_generation: u64,
    sent_initial: bool,
    pause_before_next: bool,
}

impl ViewerSession {
    /// Attach a new viewer; streaming is enabled while the session lives
    pub fn attach(
        registry: &SharedRegistry,
        broadcaster: SharedBroadcaster,
        boundary: Arc<str>,
        disabled_poll: Duration,
    ) -> Self {
        let handle = registry.attach();
        Self::build(handle.id(), Some(handle), registry, broadcaster, boundary, disabled_poll)
    }

    /// Watch without counting as a viewer.
    ///
    /// Gets live frames while someone else keeps streaming enabled and the last
    /// known still image otherwise.
    pub fn passive(
        registry: &SharedRegistry,
        broadcaster: SharedBroadcaster,
        boundary: Arc<str>,
        disabled_poll: Duration,
    ) -> Self {
        Self::build(Uuid::new_v4(), None, registry, broadcaster, boundary, disabled_poll)
    }

    fn build(
        id: Uuid,
        handle: Option<ViewerHandle>,
        registry: &SharedRegistry,
        broadcaster: SharedBroadcaster,
        boundary: Arc<str>,
        disabled_poll: Duration,
    ) -> Self {
        Self {
            id,
            _handle: handle,
            broadcaster,
            state_rx: registry.subscribe(),
            boundary,
            disabled_poll,
            last_generation: 0,
            sent_initial: false,
            pause_before_next: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Generation of the last frame handed out
    pub fn last_generation(&self) -> u64 {
        self.last_generation
    }

    /// Next frame for this viewer; never returns an older frame than the previous one
    pub async fn next_frame(&mut self) -> Frame {
        if !self.sent_initial {
            self.sent_initial = true;
            // Late joiners get the last known image straight away
            if let Some((frame, generation)) = self.broadcaster.latest() {
                self.last_generation = generation;
                self.pause_before_next = !self.state_rx.borrow().is_enabled();
                return frame;
            }
        }

        loop {
            let state = *self.state_rx.borrow_and_update();
            if state.is_enabled() {
                self.pause_before_next = false;
                let next = tokio::select! {
                    next = self.broadcaster.wait_for_next(self.last_generation) => Some(next),
                    changed = self.state_rx.changed() => {
                        if changed.is_err() {
                            // Registry gone; keep serving whatever gets published
                            Some(self.broadcaster.wait_for_next(self.last_generation).await)
                        } else {
                            None
                        }
                    }
                };
                if let Some((frame, generation)) = next {
                    self.last_generation = generation;
                    return frame;
                }
                continue;
            }

            if self.pause_before_next {
                self.pause_before_next = false;
                tokio::time::sleep(self.disabled_poll).await;
                continue;
            }

            match self.broadcaster.latest() {
                Some((frame, generation)) => {
                    self.last_generation = generation;
                    self.pause_before_next = true;
                    return frame;
                }
                None => tokio::time::sleep(self.disabled_poll).await,
            }
        }
    }

    /// Next wire chunk for this viewer
    pub async fn next_chunk(&mut self) -> Bytes {
        let frame = self.next_frame().await;
        encode_chunk(&self.boundary, &frame)
    }

    /// Endless chunk stream; dropping it ends the session
    pub fn into_stream(self) -> impl Stream<Item = Bytes> + Send + 'static {
        tracing::debug!(viewer = %self.id, "Viewer stream started");
        stream::unfold(self, |mut session| async move {
            let chunk = session.next_chunk().await;
            Some((chunk, session))
        })
    }
}

impl Drop for ViewerSession {
    fn drop(&mut self) {
        tracing::debug!(viewer = %self.id, frames_up_to = self.last_generation, "Viewer stream closed");
    }
}
