//! Actor state shared by the sinks, the workflow and the reporter.

use std::sync::Arc;

use hitoe_core::HeartrateSample;
use parking_lot::RwLock;
use tokio::sync::watch;

/// Shared actor state.
#[derive(Debug, Clone)]
pub struct ActorState {
    inner: Arc<ActorStateInner>,
}

#[derive(Debug)]
struct ActorStateInner {
    latest: RwLock<Option<HeartrateSample>>,
    ready: watch::Sender<bool>,
}

impl Default for ActorState {
    fn default() -> Self {
        Self::new()
    }
}

impl ActorState {
    /// Creates state with no sample that is not ready.
    #[must_use]
    pub fn new() -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            inner: Arc::new(ActorStateInner {
                latest: RwLock::new(None),
                ready,
            }),
        }
    }

    /// Stores the newest heartrate sample.
    pub fn record(&self, timestamp_ms: i64, bpm: i32) {
        *self.inner.latest.write() = Some(HeartrateSample { timestamp_ms, bpm });
    }

    /// Newest heartrate sample, if any arrived yet.
    #[must_use]
    pub fn latest(&self) -> Option<HeartrateSample> {
        *self.inner.latest.read()
    }

    /// Marks the sensor as streaming or lost.
    pub fn set_ready(&self, ready: bool) {
        self.inner.ready.send_replace(ready);
    }

    /// Returns `true` while heartrate is streaming.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.inner.ready.borrow()
    }

    /// Watches the ready flag.
    #[must_use]
    pub fn subscribe_ready(&self) -> watch::Receiver<bool> {
        self.inner.ready.subscribe()
    }
}
