//! Timer subsystem for the selio runtime
//!
//! Deadline tracking with a pluggable backend behind a trait, polled by a
//! dedicated worker thread:
//!
//! ```text
//!            TimerService (API)
//!                  │
//!                  ▼
//!         ┌─────────────────┐
//!         │ dyn TimerBackend │
//!         └─────────────────┘
//!                  │
//!                  ▼
//!             DeadlineHeap
//!                  │
//!   timer thread ──poll_expired()──▶ target.on_timeout()
//! ```
//!
//! A firing timer *cancels the operation it guards* - targets typically
//! resume a parked waiter with a timeout error or cancel a token. The
//! `ActivityTimer` on top implements idle-timeout semantics
//! (start/stop/finish with deadline reset on activity).

pub mod activity;
mod heap;
mod worker;

pub use activity::ActivityTimer;
pub use heap::DeadlineHeap;
pub use worker::{TimerService, TimerServiceConfig};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a firing timer does
///
/// Invoked on the timer thread; implementations must be quick and must
/// not block (resume a waiter, cancel a token, close a channel).
pub trait TimeoutTarget: Send + Sync {
    fn on_timeout(&self);
}

/// Unique handle for timer cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u64);

impl TimerHandle {
    #[inline]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        TimerHandle(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for TimerHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// A scheduled firing
pub struct TimerEntry {
    pub handle: TimerHandle,
    pub deadline: Instant,
    pub target: Arc<dyn TimeoutTarget>,
}

impl TimerEntry {
    pub fn after(delay: Duration, target: Arc<dyn TimeoutTarget>) -> Self {
        Self {
            handle: TimerHandle::new(),
            deadline: Instant::now() + delay,
            target,
        }
    }

    pub fn at(deadline: Instant, target: Arc<dyn TimeoutTarget>) -> Self {
        Self {
            handle: TimerHandle::new(),
            deadline,
            target,
        }
    }
}

/// Deadline-tracking backend
///
/// Implementations must be thread-safe: the timer thread polls while any
/// thread inserts or cancels.
pub trait TimerBackend: Send + Sync {
    /// Insert an entry; its handle is used for cancellation.
    fn insert(&self, entry: TimerEntry) -> TimerHandle;

    /// Best-effort cancel; returns false if unknown or already fired.
    fn cancel(&self, handle: TimerHandle) -> bool;

    /// Remove and return every entry due at `now`.
    fn poll_expired(&self, now: Instant) -> Vec<TimerEntry>;

    /// Earliest pending deadline, for smart sleeping.
    fn next_deadline(&self) -> Option<Instant>;

    /// Number of pending (non-cancelled) entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn name(&self) -> &'static str {
        "unknown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_uniqueness() {
        let handles: Vec<_> = (0..1000).map(|_| TimerHandle::new()).collect();
        let unique: std::collections::HashSet<_> = handles.iter().collect();
        assert_eq!(handles.len(), unique.len());
    }

    #[test]
    fn test_entry_deadline() {
        struct Nop;
        impl TimeoutTarget for Nop {
            fn on_timeout(&self) {}
        }

        let before = Instant::now();
        let entry = TimerEntry::after(Duration::from_millis(100), Arc::new(Nop));
        assert!(entry.deadline >= before + Duration::from_millis(100));
    }
}
