//! Error types for the selio transport layer

use core::fmt;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Why a pending operation was cancelled
///
/// Cancellation is a distinct signal class: a waiter resumed with one of
/// these never confuses it with a data error or with readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelKind {
    /// The selector (or timer service) is shutting down
    Shutdown,

    /// The selectable or channel was closed while the operation was pending
    Closed,

    /// An activity/deadline timer fired for the operation
    Timeout,

    /// A parent cancellation token was cancelled
    Parent,
}

impl fmt::Display for CancelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelKind::Shutdown => write!(f, "selector shutdown"),
            CancelKind::Closed => write!(f, "closed while pending"),
            CancelKind::Timeout => write!(f, "timed out"),
            CancelKind::Parent => write!(f, "parent scope cancelled"),
        }
    }
}

/// Errors that can occur in transport operations
///
/// The enum is `Clone` on purpose: a channel stores its closing cause once
/// and replays a clone of it to every subsequent read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Pending operation cancelled (shutdown, close, timeout, parent scope)
    Cancelled(CancelKind),

    /// Descriptor-level failure, carries the OS errno
    Os(i32),

    /// Write attempted on a channel already closed for writing
    ChannelClosed,

    /// Pool constructed with a zero, negative-equivalent, or oversized capacity
    InvalidCapacity,

    /// Internal invariant violated - programming error, never swallowed
    Invariant(&'static str),

    /// Peer certificate presented no SAN entry matching the expected host
    HostnameMismatch,

    /// No offered cipher suite is usable on this platform
    UnsupportedSuite,

    /// Record-layer cryptographic failure (bad tag, malformed record)
    Crypto(&'static str),
}

impl TransportError {
    /// True for every cancellation-class error, regardless of reason.
    #[inline]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TransportError::Cancelled(_))
    }

    /// Build an `Os` error from the current thread's errno.
    #[cfg(unix)]
    pub fn last_os_error() -> Self {
        TransportError::Os(std::io::Error::last_os_error().raw_os_error().unwrap_or(0))
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Cancelled(kind) => write!(f, "operation cancelled: {}", kind),
            TransportError::Os(errno) => write!(f, "os error {}", errno),
            TransportError::ChannelClosed => write!(f, "channel closed for writing"),
            TransportError::InvalidCapacity => write!(f, "invalid pool capacity"),
            TransportError::Invariant(what) => write!(f, "internal invariant violated: {}", what),
            TransportError::HostnameMismatch => write!(f, "hostname verification failed"),
            TransportError::UnsupportedSuite => write!(f, "no usable cipher suite"),
            TransportError::Crypto(what) => write!(f, "record layer failure: {}", what),
        }
    }
}

impl std::error::Error for TransportError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let e = TransportError::Cancelled(CancelKind::Timeout);
        assert_eq!(format!("{}", e), "operation cancelled: timed out");

        let e = TransportError::Os(104);
        assert_eq!(format!("{}", e), "os error 104");

        let e = TransportError::Invariant("source not fully consumed");
        assert_eq!(
            format!("{}", e),
            "internal invariant violated: source not fully consumed"
        );
    }

    #[test]
    fn test_cancellation_class() {
        assert!(TransportError::Cancelled(CancelKind::Shutdown).is_cancellation());
        assert!(TransportError::Cancelled(CancelKind::Closed).is_cancellation());
        assert!(!TransportError::Os(32).is_cancellation());
        assert!(!TransportError::HostnameMismatch.is_cancellation());
    }

    #[test]
    fn test_cause_replay_is_clone() {
        let cause = TransportError::Os(104);
        let replayed = cause.clone();
        assert_eq!(cause, replayed);
    }
}
