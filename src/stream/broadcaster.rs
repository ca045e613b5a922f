//! Latest-wins frame slot with broadcast wakeups
//!
//! The capture worker is the only writer. Any number of viewer sessions wait
//! for a generation newer than the one they last delivered; frames a slow
//! viewer misses are simply skipped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::stream::frame::Frame;

/// Slot contents; frame and generation are always read together
struct Slot {
    frame: Option<Frame>,
    generation: u64,
    published_at: Option<DateTime<Utc>>,
}

/// Single-slot frame buffer shared by the capture worker and all viewers
pub struct FrameBroadcaster {
    slot: Mutex<Slot>,
    notify: Notify,
    bytes_published: AtomicU64,
}

impl FrameBroadcaster {
    /// Create an empty broadcaster at generation 0
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                frame: None,
                generation: 0,
                published_at: None,
            }),
            notify: Notify::new(),
            bytes_published: AtomicU64::new(0),
        }
    }

    /// Replace the latest frame and wake every waiter.
    /// Returns the new generation.
    pub fn publish(&self, frame: Frame) -> u64 {
        let size = frame.len() as u64;
        let generation = {
            let mut slot = self.slot.lock();
            slot.frame = Some(frame);
            slot.generation += 1;
            slot.published_at = Some(Utc::now());
            slot.generation
        };
        self.bytes_published.fetch_add(size, Ordering::Relaxed);
        self.notify.notify_waiters();
        generation
    }

    /// Wait until a frame newer than `last_seen` is published.
    ///
    /// Returns immediately if the slot already holds a newer generation.
    pub async fn wait_for_next(&self, last_seen: u64) -> (Frame, u64) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a publish in between is not lost
            notified.as_mut().enable();

            if let Some(latest) = self.newer_than(last_seen) {
                return latest;
            }

            notified.await;
        }
    }

    /// Latest frame without waiting
    pub fn snapshot(&self) -> Option<Frame> {
        self.slot.lock().frame.clone()
    }

    /// Latest frame together with its generation
    pub fn latest(&self) -> Option<(Frame, u64)> {
        let slot = self.slot.lock();
        slot.frame.clone().map(|frame| (frame, slot.generation))
    }

    /// Current generation (0 before the first publish)
    pub fn generation(&self) -> u64 {
        self.slot.lock().generation
    }

    /// Time of the most recent publish
    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        self.slot.lock().published_at
    }

    /// Total payload bytes published since start
    pub fn bytes_published(&self) -> u64 {
        self.bytes_published.load(Ordering::Relaxed)
    }

    fn newer_than(&self, last_seen: u64) -> Option<(Frame, u64)> {
        let slot = self.slot.lock();
        if slot.generation > last_seen {
            slot.frame.clone().map(|frame| (frame, slot.generation))
        } else {
            None
        }
    }
}

impl Default for FrameBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe handle to a broadcaster
pub type SharedBroadcaster = Arc<FrameBroadcaster>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_snapshot_empty_then_latest() {
        let broadcaster = FrameBroadcaster::new();
        assert!(broadcaster.snapshot().is_none());
        assert_eq!(broadcaster.generation(), 0);

        assert_eq!(broadcaster.publish(Frame::from(&b"one"[..])), 1);
        assert_eq!(broadcaster.publish(Frame::from(&b"two"[..])), 2);

        assert_eq!(broadcaster.snapshot().unwrap().as_bytes(), b"two");
        assert_eq!(broadcaster.latest().unwrap().1, 2);
        assert_eq!(broadcaster.bytes_published(), 6);
        assert!(broadcaster.published_at().is_some());
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_behind() {
        let broadcaster = FrameBroadcaster::new();
        broadcaster.publish(Frame::from(&b"jpeg"[..]));

        let (frame, generation) = timeout(Duration::from_millis(50), broadcaster.wait_for_next(0))
            .await
            .unwrap();
        assert_eq!(frame.as_bytes(), b"jpeg");
        assert_eq!(generation, 1);
    }

    #[tokio::test]
    async fn test_no_duplicate_delivery() {
        let broadcaster = Arc::new(FrameBroadcaster::new());
        broadcaster.publish(Frame::from(&b"first"[..]));

        // Already caught up: must block until the next publish
        let pending = timeout(Duration::from_millis(50), broadcaster.wait_for_next(1)).await;
        assert!(pending.is_err());

        let waiter = {
            let broadcaster = broadcaster.clone();
            tokio::spawn(async move { broadcaster.wait_for_next(1).await })
        };
        tokio::task::yield_now().await;
        broadcaster.publish(Frame::from(&b"second"[..]));

        let (frame, generation) = waiter.await.unwrap();
        assert_eq!(frame.as_bytes(), b"second");
        assert_eq!(generation, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_publish_wakes_all_waiters() {
        let broadcaster = Arc::new(FrameBroadcaster::new());
        broadcaster.publish(Frame::from(&b"old"[..]));

        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let broadcaster = broadcaster.clone();
                tokio::spawn(async move { broadcaster.wait_for_next(1).await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        broadcaster.publish(Frame::from(&b"new"[..]));

        for waiter in waiters {
            let (frame, generation) = timeout(Duration::from_secs(1), waiter)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(frame.as_bytes(), b"new");
            assert!(generation > 1);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_generations_are_monotonic_for_a_viewer() {
        let broadcaster = Arc::new(FrameBroadcaster::new());

        let viewer = {
            let broadcaster = broadcaster.clone();
            tokio::spawn(async move {
                let mut last = 0;
                let mut seen = Vec::new();
                while last < 200 {
                    let (frame, generation) = broadcaster.wait_for_next(last).await;
                    assert!(generation > last);
                    seen.push((frame, generation));
                    last = generation;
                }
                seen
            })
        };

        for i in 0..200u32 {
            broadcaster.publish(Frame::from(i.to_be_bytes().to_vec()));
            if i % 16 == 0 {
                tokio::task::yield_now().await;
            }
        }

        let seen = timeout(Duration::from_secs(5), viewer).await.unwrap().unwrap();
        let (last_frame, last_generation) = seen.last().unwrap();
        assert_eq!(*last_generation, 200);
        assert_eq!(last_frame.as_bytes(), &199u32.to_be_bytes());
    }
}
