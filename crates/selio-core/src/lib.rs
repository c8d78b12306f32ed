//! # selio-core
//!
//! Core types for the selio non-blocking transport layer.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! Everything that touches a descriptor or a readiness primitive lives
//! in `selio-runtime`.
//!
//! ## Modules
//!
//! - `interest` - Readiness interest kinds and bit sets
//! - `wake` - One-shot resumption handles for parked waiters
//! - `cancel` - Cancellation token for cooperative cancellation
//! - `pool` - Lock-free fixed-capacity buffer pool
//! - `channel` - Suspendable single-producer/single-consumer byte channel
//! - `error` - Error types
//! - `log` - Leveled stderr logging macros
//! - `env` - Environment variable utilities

pub mod cancel;
pub mod channel;
pub mod env;
pub mod error;
pub mod interest;
pub mod log;
pub mod pool;
pub mod wake;

// Re-exports for convenience
pub use cancel::CancellationToken;
pub use channel::{ByteChannel, ProgressListener};
pub use env::{env_get, env_get_bool, env_get_opt};
pub use error::{CancelKind, TransportError, TransportResult};
pub use interest::{Interest, InterestSet};
pub use pool::{ByteBufferPool, IoBuffer, PoolGuard, Recycle, SlotPool, MAX_CAPACITY};
pub use wake::{WaitCell, WakeResult};
