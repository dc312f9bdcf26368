//! Build messaging channel.
//!
//! Connects the build worker to its controller. The worker emits messages
//! and publishes state; the controller drains messages, reads state and
//! requests cancellation. No operation blocks: a full queue drops its
//! oldest entry and counts the drop.

mod message;
mod state;

pub use message::{BuildMessage, MessageLevel, ProgressPayload};
pub use state::BuildState;

use ffuforge_shared::constants::channel::DEFAULT_CAPACITY;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

/// Channel tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Queued messages kept before the oldest is dropped.
    pub capacity: usize,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

struct Inner {
    queue: Mutex<VecDeque<BuildMessage>>,
    capacity: usize,
    state: AtomicU8,
    cancel_requested: AtomicBool,
    dropped: AtomicU64,
}

/// Shared handle to one build's channel. Cheap to clone.
#[derive(Clone)]
pub struct BuildChannel {
    inner: Arc<Inner>,
}

impl Default for BuildChannel {
    fn default() -> Self {
        Self::new(ChannelOptions::default())
    }
}

impl std::fmt::Debug for BuildChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildChannel")
            .field("state", &self.state())
            .field("queued", &self.len())
            .field("cancel_requested", &self.is_cancellation_requested())
            .finish()
    }
}

impl BuildChannel {
    pub fn new(options: ChannelOptions) -> Self {
        let capacity = options.capacity.max(1);
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
                capacity,
                state: AtomicU8::new(BuildState::NotStarted.as_u8()),
                cancel_requested: AtomicBool::new(false),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Writer side
    // ─────────────────────────────────────────────────────────────────────

    /// Enqueue a message and mirror it into tracing. Never blocks on space.
    pub fn emit(&self, message: BuildMessage) {
        log_message(&message);
        let mut queue = self.inner.queue.lock();
        if queue.len() >= self.inner.capacity {
            queue.pop_front();
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(message);
    }

    pub fn debug(&self, source: &str, message: impl Into<String>) {
        self.emit(BuildMessage::new(MessageLevel::Debug, source, message));
    }

    pub fn info(&self, source: &str, message: impl Into<String>) {
        self.emit(BuildMessage::new(MessageLevel::Info, source, message));
    }

    pub fn progress(&self, source: &str, percent: u8, operation: impl Into<String>) {
        self.emit(BuildMessage::progress(source, percent, operation));
    }

    pub fn success(&self, source: &str, message: impl Into<String>) {
        self.emit(BuildMessage::new(MessageLevel::Success, source, message));
    }

    pub fn warning(&self, source: &str, message: impl Into<String>) {
        self.emit(BuildMessage::new(MessageLevel::Warning, source, message));
    }

    pub fn error(&self, source: &str, message: impl Into<String>) {
        self.emit(BuildMessage::new(MessageLevel::Error, source, message));
    }

    pub fn critical(&self, source: &str, message: impl Into<String>) {
        self.emit(BuildMessage::new(MessageLevel::Critical, source, message));
    }

    /// Publish a new build state.
    ///
    /// Invalid transitions are refused and logged; returns whether the
    /// state changed.
    pub fn request_state(&self, target: BuildState) -> bool {
        let result = self
            .inner
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                BuildState::from_u8(current)
                    .can_transition_to(target)
                    .then_some(target.as_u8())
            });
        match result {
            Ok(previous) => {
                tracing::debug!(from = %BuildState::from_u8(previous), to = %target, "Build state changed");
                true
            }
            Err(current) => {
                tracing::warn!(
                    from = %BuildState::from_u8(current),
                    to = %target,
                    "Refused invalid build state transition"
                );
                false
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reader side
    // ─────────────────────────────────────────────────────────────────────

    /// Remove and return up to `max` of the oldest messages.
    pub fn drain(&self, max: usize) -> Vec<BuildMessage> {
        let mut queue = self.inner.queue.lock();
        let take = max.min(queue.len());
        queue.drain(..take).collect()
    }

    pub fn state(&self) -> BuildState {
        BuildState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Messages discarded because the queue was full.
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ─────────────────────────────────────────────────────────────────────
    // Control
    // ─────────────────────────────────────────────────────────────────────

    /// Ask the worker to stop at its next checkpoint.
    ///
    /// Idempotent; returns true only for the call that set the flag.
    pub fn request_cancellation(&self) -> bool {
        let first = !self.inner.cancel_requested.swap(true, Ordering::AcqRel);
        if first {
            tracing::info!(target: "ffuforge::build", "Cancellation requested");
        }
        first
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.inner.cancel_requested.load(Ordering::Acquire)
    }
}

fn log_message(message: &BuildMessage) {
    let source = message.source.as_str();
    let text = message.message.as_str();
    match message.level {
        MessageLevel::Debug => tracing::debug!(target: "ffuforge::build", source, "{}", text),
        MessageLevel::Info | MessageLevel::Progress | MessageLevel::Success => {
            tracing::info!(target: "ffuforge::build", source, "{}", text)
        }
        MessageLevel::Warning => tracing::warn!(target: "ffuforge::build", source, "{}", text),
        MessageLevel::Error | MessageLevel::Critical => {
            tracing::error!(target: "ffuforge::build", source, "{}", text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_drain_is_fifo_and_bounded() {
        let channel = BuildChannel::default();
        for i in 0..5 {
            channel.info("test", format!("m{i}"));
        }
        let first = channel.drain(3);
        assert_eq!(
            first.iter().map(|m| m.message.as_str()).collect::<Vec<_>>(),
            vec!["m0", "m1", "m2"]
        );
        assert_eq!(channel.drain(10).len(), 2);
        assert!(channel.drain(10).is_empty());
    }

    #[test]
    fn test_full_queue_drops_oldest() {
        let channel = BuildChannel::new(ChannelOptions { capacity: 2 });
        channel.info("test", "a");
        channel.info("test", "b");
        channel.info("test", "c");
        assert_eq!(channel.dropped_count(), 1);
        let messages = channel.drain(10);
        assert_eq!(messages[0].message, "b");
        assert_eq!(messages[1].message, "c");
    }

    #[test]
    fn test_state_transitions_are_validated() {
        let channel = BuildChannel::default();
        assert_eq!(channel.state(), BuildState::NotStarted);
        assert!(!channel.request_state(BuildState::Running));
        assert!(channel.request_state(BuildState::Initializing));
        assert!(channel.request_state(BuildState::Running));
        assert!(channel.request_state(BuildState::Completed));
        assert!(!channel.request_state(BuildState::Failed));
        assert_eq!(channel.state(), BuildState::Completed);
    }

    #[test]
    fn test_clones_share_state() {
        let worker = BuildChannel::default();
        let controller = worker.clone();
        worker.warning("orchestrator", "slow disk");
        assert!(controller.request_cancellation());
        assert!(worker.is_cancellation_requested());
        assert_eq!(controller.drain(1)[0].level, MessageLevel::Warning);
    }

    #[test]
    fn test_concurrent_emit_and_drain() {
        let channel = BuildChannel::new(ChannelOptions { capacity: 100_000 });
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let ch = channel.clone();
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        ch.debug("writer", format!("{w}-{i}"));
                    }
                })
            })
            .collect();
        let mut received = 0;
        while received < 4000 {
            received += channel.drain(64).len();
            if writers.iter().all(|h| h.is_finished()) && channel.is_empty() {
                break;
            }
        }
        for writer in writers {
            writer.join().unwrap();
        }
        received += channel.drain(usize::MAX).len();
        assert_eq!(received, 4000);
        assert_eq!(channel.dropped_count(), 0);
    }

    proptest! {
        #[test]
        fn prop_cancellation_is_idempotent(calls in 1usize..50) {
            let channel = BuildChannel::default();
            let firsts = (0..calls).filter(|_| channel.request_cancellation()).count();
            prop_assert_eq!(firsts, 1);
            prop_assert!(channel.is_cancellation_requested());
            // cancellation never touches build state
            prop_assert_eq!(channel.state(), BuildState::NotStarted);
        }
    }
}
