//! Cancellation token for cooperative cancellation
//!
//! Callers hand a token to long-running transport operations; the
//! selector and channel check it at their suspension points and fail
//! with `Cancelled(Parent)` when a parent scope has been cancelled.
//! Tokens can be linked to form parent-child relationships.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{CancelKind, TransportError, TransportResult};

/// Token for checking and triggering cancellation
///
/// Cancellation propagates from parent to child: cancelling a parent makes
/// every child report cancelled, while cancelling a child leaves the
/// parent untouched.
#[derive(Clone)]
pub struct CancellationToken {
    inner: CancellationInner,
}

#[derive(Clone)]
enum CancellationInner {
    Owned(Arc<OwnedCancellation>),
    /// Token that never cancels, for callers without a cancel scope
    Dummy,
}

struct OwnedCancellation {
    cancelled: AtomicBool,
    parent: Option<CancellationToken>,
}

impl CancellationToken {
    /// Create a new independent cancellation token
    pub fn new() -> Self {
        Self {
            inner: CancellationInner::Owned(Arc::new(OwnedCancellation {
                cancelled: AtomicBool::new(false),
                parent: None,
            })),
        }
    }

    /// Create a token that never cancels
    pub fn dummy() -> Self {
        Self {
            inner: CancellationInner::Dummy,
        }
    }

    /// Create a child token linked to this one
    pub fn child(&self) -> Self {
        Self {
            inner: CancellationInner::Owned(Arc::new(OwnedCancellation {
                cancelled: AtomicBool::new(false),
                parent: Some(self.clone()),
            })),
        }
    }

    /// Check if cancellation was requested, on this token or any ancestor
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        match &self.inner {
            CancellationInner::Owned(arc) => {
                if arc.cancelled.load(Ordering::Acquire) {
                    return true;
                }
                if let Some(ref parent) = arc.parent {
                    return parent.is_cancelled();
                }
                false
            }
            CancellationInner::Dummy => false,
        }
    }

    /// Request cancellation
    ///
    /// Sets only this token's flag; children observe it through the
    /// parent chain on their next check.
    pub fn cancel(&self) {
        if let CancellationInner::Owned(arc) = &self.inner {
            arc.cancelled.store(true, Ordering::Release);
        }
    }

    /// Check and return `Err(Cancelled(Parent))` if cancelled
    #[inline]
    pub fn check(&self) -> TransportResult<()> {
        if self.is_cancelled() {
            Err(TransportError::Cancelled(CancelKind::Parent))
        } else {
            Ok(())
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_cancellation() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());

        token.cancel();
        assert!(token.is_cancelled());
        assert_eq!(
            token.check(),
            Err(TransportError::Cancelled(CancelKind::Parent))
        );
    }

    #[test]
    fn test_parent_propagates_to_child() {
        let parent = CancellationToken::new();
        let child = parent.child();
        assert!(!child.is_cancelled());

        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_child_does_not_affect_parent() {
        let parent = CancellationToken::new();
        let child = parent.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn test_clone_shares_state() {
        let a = CancellationToken::new();
        let b = a.clone();
        a.cancel();
        assert!(b.is_cancelled());
    }

    #[test]
    fn test_dummy_never_cancels() {
        let token = CancellationToken::dummy();
        token.cancel();
        assert!(!token.is_cancelled());
    }
}
