//! # selio-runtime
//!
//! Platform runtime for the selio transport layer: the selector loop that
//! owns the OS readiness primitive, the timer subsystem, and the
//! non-blocking TCP socket layer built on both.
//!
//! ## Modules
//!
//! - `selector` - `SelectorManager`, `Selectable`, readiness backends
//! - `timer` - deadline heap, timer worker thread, activity timer
//! - `socket` - non-blocking TCP through the selector, channel pumps

pub mod selector;
pub mod socket;
pub mod timer;

pub use selector::{Selectable, SelectorManager};
pub use socket::{pump_channel_to_socket, pump_socket_to_channel, TcpConn, TcpListener};
pub use timer::{ActivityTimer, TimeoutTarget, TimerHandle, TimerService};
