//! One-shot resumption handles for parked waiters
//!
//! A `WaitCell` binds a suspended caller to its eventual resumption. The
//! caller parks on `wait()`; the selector loop (or a timer) delivers
//! exactly one `WakeResult` via `resume()`. The first resume wins - a
//! cell can never be resumed twice, which is what lets the selector
//! dispatch readiness, close, timeout, and shutdown concurrently without
//! double-wake races.

use std::sync::{Condvar, Mutex};
use std::time::Instant;

use crate::error::CancelKind;

/// What a parked waiter is resumed with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeResult {
    /// The watched interest became ready
    Ready,

    /// The operation was cancelled; the reason is carried along
    Cancelled(CancelKind),

    /// The registration itself was refused (caller misuse, e.g. a second
    /// waiter for an interest that already has one)
    Rejected(&'static str),
}

/// One-shot parking cell
///
/// State machine: `Pending` -> `Resumed(result)`, one transition only.
pub struct WaitCell {
    state: Mutex<Option<WakeResult>>,
    cond: Condvar,
}

impl WaitCell {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    /// Deliver the result and wake the parked waiter.
    ///
    /// Returns `true` if this call performed the resume, `false` if the
    /// cell was already resumed (the result is then discarded).
    pub fn resume(&self, result: WakeResult) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.is_some() {
            return false;
        }
        *state = Some(result);
        self.cond.notify_one();
        true
    }

    /// Park the calling thread until resumed.
    pub fn wait(&self) -> WakeResult {
        let mut state = self.state.lock().unwrap();
        while state.is_none() {
            state = self.cond.wait(state).unwrap();
        }
        state.unwrap()
    }

    /// Park until resumed or `deadline` passes.
    ///
    /// A deadline expiry does NOT resume the cell; the caller decides what
    /// to do (typically it asks the owner to cancel, then waits again).
    /// Returns `None` on expiry.
    pub fn wait_until(&self, deadline: Instant) -> Option<WakeResult> {
        let mut state = self.state.lock().unwrap();
        while state.is_none() {
            let now = Instant::now();
            if now >= deadline {
                return *state;
            }
            let (guard, timeout) = self
                .cond
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = guard;
            if timeout.timed_out() && state.is_none() {
                return None;
            }
        }
        *state
    }

    /// Non-blocking peek at the resumption state.
    pub fn result(&self) -> Option<WakeResult> {
        *self.state.lock().unwrap()
    }

    /// True once resumed.
    pub fn is_resumed(&self) -> bool {
        self.result().is_some()
    }
}

impl Default for WaitCell {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WaitCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitCell")
            .field("resumed", &self.is_resumed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_resume_before_wait() {
        let cell = WaitCell::new();
        assert!(cell.resume(WakeResult::Ready));
        assert_eq!(cell.wait(), WakeResult::Ready);
    }

    #[test]
    fn test_first_resume_wins() {
        let cell = WaitCell::new();
        assert!(cell.resume(WakeResult::Cancelled(CancelKind::Closed)));
        assert!(!cell.resume(WakeResult::Ready));
        assert_eq!(cell.wait(), WakeResult::Cancelled(CancelKind::Closed));
    }

    #[test]
    fn test_cross_thread_wake() {
        let cell = Arc::new(WaitCell::new());
        let cell2 = Arc::clone(&cell);

        let handle = thread::spawn(move || cell2.wait());

        thread::sleep(Duration::from_millis(20));
        assert!(cell.resume(WakeResult::Ready));
        assert_eq!(handle.join().unwrap(), WakeResult::Ready);
    }

    #[test]
    fn test_wait_until_expiry() {
        let cell = WaitCell::new();
        let start = Instant::now();
        let result = cell.wait_until(Instant::now() + Duration::from_millis(30));
        assert!(result.is_none());
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_wait_until_resumed() {
        let cell = Arc::new(WaitCell::new());
        let cell2 = Arc::clone(&cell);

        let handle =
            thread::spawn(move || cell2.wait_until(Instant::now() + Duration::from_secs(5)));

        thread::sleep(Duration::from_millis(20));
        cell.resume(WakeResult::Ready);
        assert_eq!(handle.join().unwrap(), Some(WakeResult::Ready));
    }
}
