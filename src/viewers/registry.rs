//! Viewer reference counting
//!
//! The first attached viewer enables streaming, the last one to leave disables it.
//! Count and state are changed under one lock so they never disagree.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

/// Whether the upstream connection should be running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamingState {
    Disabled,
    Enabled,
}

impl StreamingState {
    pub fn is_enabled(self) -> bool {
        self == StreamingState::Enabled
    }
}

/// Counts attached viewers and owns the streaming state
pub struct ViewerRegistry {
    count: Mutex<usize>,
    state_tx: watch::Sender<StreamingState>,
}

impl ViewerRegistry {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(StreamingState::Disabled);
        Self {
            count: Mutex::new(0),
            state_tx,
        }
    }

    /// Register a viewer. Dropping the returned handle detaches it.
    pub fn attach(self: &Arc<Self>) -> ViewerHandle {
        let id = Uuid::new_v4();
        let mut count = self.count.lock();
        *count += 1;
        if *count == 1 {
            self.state_tx.send_replace(StreamingState::Enabled);
            tracing::info!(viewer = %id, "Viewer attached, streaming enabled");
        } else {
            tracing::debug!(viewer = %id, viewers = *count, "Viewer attached");
        }

        ViewerHandle {
            registry: Arc::clone(self),
            id,
        }
    }

    fn detach(&self, id: Uuid) {
        let mut count = self.count.lock();
        debug_assert!(*count > 0, "detach without attach");
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.state_tx.send_replace(StreamingState::Disabled);
            tracing::info!(viewer = %id, "Last viewer detached, streaming disabled");
        } else {
            tracing::debug!(viewer = %id, viewers = *count, "Viewer detached");
        }
    }

    /// Number of attached viewers
    pub fn viewer_count(&self) -> usize {
        *self.count.lock()
    }

    /// Current streaming state
    pub fn state(&self) -> StreamingState {
        *self.state_tx.borrow()
    }

    /// Count and state observed atomically
    pub fn snapshot(&self) -> (usize, StreamingState) {
        let count = self.count.lock();
        (*count, *self.state_tx.borrow())
    }

    /// Receiver notified on every state transition
    pub fn subscribe(&self) -> watch::Receiver<StreamingState> {
        self.state_tx.subscribe()
    }
}

impl Default for ViewerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe handle to the registry
pub type SharedRegistry = Arc<ViewerRegistry>;

/// Scoped viewer registration, detaches exactly once on drop
pub struct ViewerHandle {
    registry: Arc<ViewerRegistry>,
    id: Uuid,
}

impl ViewerHandle {
    /// Identifier used in log events
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn registry(&self) -> &Arc<ViewerRegistry> {
        &self.registry
    }
}

impl Drop for ViewerHandle {
    fn drop(&mut self) {
        self.registry.detach(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn assert_consistent(registry: &ViewerRegistry) {
        let (count, state) = registry.snapshot();
        assert_eq!(count == 0, state == StreamingState::Disabled);
    }

    #[test]
    fn test_first_and_last_viewer_transitions() {
        let registry = Arc::new(ViewerRegistry::new());
        assert_eq!(registry.snapshot(), (0, StreamingState::Disabled));

        let first = registry.attach();
        assert_eq!(registry.snapshot(), (1, StreamingState::Enabled));

        let second = registry.attach();
        assert_ne!(first.id(), second.id());
        drop(first);
        assert_eq!(registry.snapshot(), (1, StreamingState::Enabled));

        drop(second);
        assert_eq!(registry.snapshot(), (0, StreamingState::Disabled));
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let registry = Arc::new(ViewerRegistry::new());
        let mut rx = registry.subscribe();
        assert_eq!(*rx.borrow(), StreamingState::Disabled);

        let handle = registry.attach();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), StreamingState::Enabled);

        drop(handle);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), StreamingState::Disabled);
    }

    #[test]
    fn test_concurrent_attach_detach() {
        let registry = Arc::new(ViewerRegistry::new());

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let handle = registry.attach();
                        assert_eq!(registry.state(), StreamingState::Enabled);
                        drop(handle);
                    }
                })
            })
            .collect();

        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(registry.snapshot(), (0, StreamingState::Disabled));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Attach,
        Detach(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![Just(Op::Attach), any::<usize>().prop_map(Op::Detach)]
    }

    proptest! {
        #[test]
        fn prop_count_matches_state(ops in proptest::collection::vec(op(), 0..200)) {
            let registry = Arc::new(ViewerRegistry::new());
            let mut handles = Vec::new();

            for op in ops {
                match op {
                    Op::Attach => handles.push(registry.attach()),
                    Op::Detach(index) if !handles.is_empty() => {
                        let index = index % handles.len();
                        drop(handles.swap_remove(index));
                    }
                    Op::Detach(_) => {}
                }
                prop_assert_eq!(registry.viewer_count(), handles.len());
                assert_consistent(&registry);
            }

            handles.clear();
            prop_assert_eq!(registry.snapshot(), (0, StreamingState::Disabled));
        }
    }
}
