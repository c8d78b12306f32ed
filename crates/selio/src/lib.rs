//! # selio - non-blocking transport building blocks
//!
//! A small stack for event-driven byte transport:
//!
//! - a **selector**: one dedicated thread owning the OS readiness
//!   primitive (epoll on Linux, poll elsewhere), multiplexing any number
//!   of descriptors and resuming parked waiters exactly once per
//!   satisfied interest;
//! - **suspendable byte channels** with write-side backpressure,
//!   connecting producers and consumers across threads;
//! - a **lock-free buffer pool** recycling fixed-size I/O buffers;
//! - **timers**, including a resettable activity timeout that cancels an
//!   idle operation;
//! - a **TLS record layer**: suite negotiation, AEAD record seal/open
//!   over pooled buffers, and SAN-based hostname verification.
//!
//! ## Quick start
//!
//! ```ignore
//! use selio::{Interest, SelectorManager, TcpConn, TcpListener};
//!
//! let selector = SelectorManager::new()?;
//! let listener = TcpListener::bind("127.0.0.1:0".parse()?)?;
//!
//! // Accept suspends the calling thread until a client arrives; the
//! // selector thread wakes it on readiness.
//! let conn = listener.accept(&selector)?;
//! let mut buf = [0u8; 4096];
//! let n = conn.read(&selector, &mut buf)?;
//! conn.write_all(&selector, &buf[..n])?;
//! conn.close(&selector);
//! ```
//!
//! Set `SELIO_LOG_LEVEL=debug` for loop-level diagnostics.

pub use selio_core::{
    ByteBufferPool, ByteChannel, CancelKind, CancellationToken, Interest, InterestSet, IoBuffer,
    PoolGuard, ProgressListener, Recycle, SlotPool, TransportError, TransportResult,
};
pub use selio_runtime::{
    pump_channel_to_socket, pump_socket_to_channel, ActivityTimer, Selectable, SelectorManager,
    TcpConn, TcpListener, TimeoutTarget, TimerService,
};
pub use selio_tls::{
    negotiate, verify_hostname, CipherSuite, CryptoCapability, PeerIdentity, RecordBuf,
    RecordCipher, SanEntry,
};

/// Timer internals for callers that need custom backends or tuning.
pub mod timer {
    pub use selio_runtime::timer::{ActivityTimer, TimerService, TimerServiceConfig};
}
