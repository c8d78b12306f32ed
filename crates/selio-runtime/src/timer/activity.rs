//! Idle/activity timeout tracking
//!
//! An `ActivityTimer` guards one long-lived operation with an idle
//! timeout. `start()` arms it (and re-arms on every later call, resetting
//! the deadline - call it on each unit of activity); `stop()` disarms it
//! until a subsequent `start()`; `finish()` retires it when the operation
//! completes. Firing invokes the guarded target exactly once per arming -
//! a cancellation, never a silent no-op.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use super::{TimeoutTarget, TimerHandle, TimerService};

struct ActivityState {
    /// Currently armed firing, if any.
    pending: Option<TimerHandle>,
    /// Bumped on every `start()`; an in-flight firing from a superseded
    /// arming compares generations and gives up.
    generation: u64,
    /// Set by `finish()`; suppresses firings that already left the heap.
    finished: bool,
}

struct ActivityInner {
    service: Arc<TimerService>,
    timeout: Duration,
    target: Arc<dyn TimeoutTarget>,
    state: Mutex<ActivityState>,
}

/// Resettable idle-timeout guard for one operation
#[derive(Clone)]
pub struct ActivityTimer {
    inner: Arc<ActivityInner>,
}

/// The entry scheduled on the service; validates its generation before
/// passing the firing through.
struct Firing {
    inner: Weak<ActivityInner>,
    generation: u64,
}

impl TimeoutTarget for Firing {
    fn on_timeout(&self) {
        let inner = match self.inner.upgrade() {
            Some(inner) => inner,
            None => return,
        };
        let fire = {
            let mut state = inner.state.lock().unwrap();
            if state.finished || state.generation != self.generation || state.pending.is_none() {
                false
            } else {
                state.pending = None;
                true
            }
        };
        if fire {
            inner.target.on_timeout();
        }
    }
}

impl ActivityTimer {
    /// Create a disarmed timer; nothing fires until `start()`.
    pub fn new(
        service: Arc<TimerService>,
        timeout: Duration,
        target: Arc<dyn TimeoutTarget>,
    ) -> Self {
        Self {
            inner: Arc::new(ActivityInner {
                service,
                timeout,
                target,
                state: Mutex::new(ActivityState {
                    pending: None,
                    generation: 0,
                    finished: false,
                }),
            }),
        }
    }

    /// Arm, or re-arm with a fresh deadline. Call on every activity.
    pub fn start(&self) {
        let inner = &self.inner;
        let mut state = inner.state.lock().unwrap();
        state.finished = false;
        if let Some(handle) = state.pending.take() {
            inner.service.cancel(handle);
        }
        state.generation += 1;
        let firing = Arc::new(Firing {
            inner: Arc::downgrade(inner),
            generation: state.generation,
        });
        state.pending = Some(inner.service.schedule(inner.timeout, firing));
    }

    /// Disarm. The deadline stops mattering until the next `start()`.
    pub fn stop(&self) {
        let inner = &self.inner;
        let mut state = inner.state.lock().unwrap();
        if let Some(handle) = state.pending.take() {
            inner.service.cancel(handle);
        }
    }

    /// The guarded operation completed; disarm and suppress any firing
    /// already in flight.
    pub fn finish(&self) {
        let inner = &self.inner;
        let mut state = inner.state.lock().unwrap();
        if let Some(handle) = state.pending.take() {
            inner.service.cancel(handle);
        }
        state.finished = true;
    }

    /// True while armed.
    pub fn is_armed(&self) -> bool {
        self.inner.state.lock().unwrap().pending.is_some()
    }
}
