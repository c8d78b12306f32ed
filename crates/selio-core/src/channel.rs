//! Suspendable single-producer/single-consumer byte channel
//!
//! A bounded FIFO byte queue bridging a producer and a consumer that run
//! on different threads. The producer suspends when the buffer is full,
//! the consumer when it is empty - write suspension is the only
//! backpressure mechanism, nothing buffers unboundedly.
//!
//! Lifecycle: Open (both ends live) -> Closing (write end closed, buffered
//! bytes still drain) -> Closed (drained, EOF) - or terminated with a
//! cause, in which case buffered bytes are discarded and every subsequent
//! read replays the cause.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::cancel::CancellationToken;
use crate::error::{TransportError, TransportResult};

/// How often a suspended operation re-checks its cancellation token
const CANCEL_TICK: Duration = Duration::from_millis(5);

/// Observer of cumulative transfer progress
///
/// Notified after each written chunk with the running byte count and the
/// expected total, when one is known. Purely observational: implementations
/// must not block, and nothing they do alters flow control.
pub trait ProgressListener: Send + Sync {
    fn on_progress(&self, transferred: u64, total: Option<u64>);
}

struct ChannelInner {
    buf: VecDeque<u8>,
    capacity: usize,
    /// Producer finished; no further writes accepted.
    write_closed: bool,
    /// Set exactly once, by the first close carrying a cause.
    cause: Option<TransportError>,
    transferred: u64,
    expected_total: Option<u64>,
}

/// Suspendable byte channel
pub struct ByteChannel {
    inner: Mutex<ChannelInner>,
    readable: Condvar,
    writable: Condvar,
    listener: Mutex<Option<Arc<dyn ProgressListener>>>,
}

impl ByteChannel {
    /// Create a channel buffering at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(ChannelInner {
                buf: VecDeque::with_capacity(capacity),
                capacity,
                write_closed: false,
                cause: None,
                transferred: 0,
                expected_total: None,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
            listener: Mutex::new(None),
        }
    }

    /// Attach a progress observer (replaces any previous one).
    pub fn set_listener(&self, listener: Option<Arc<dyn ProgressListener>>) {
        *self.listener.lock().unwrap() = listener;
    }

    /// Declare the total content length, if the producer knows it.
    pub fn set_expected_total(&self, total: Option<u64>) {
        self.inner.lock().unwrap().expected_total = total;
    }

    /// Cumulative bytes written so far.
    pub fn total_transferred(&self) -> u64 {
        self.inner.lock().unwrap().transferred
    }

    /// Bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.inner.lock().unwrap().buf.len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().unwrap().capacity
    }

    pub fn is_closed_for_write(&self) -> bool {
        self.inner.lock().unwrap().write_closed
    }

    /// Write all of `data`, suspending whenever the buffer is full.
    pub fn write_fully(&self, data: &[u8]) -> TransportResult<()> {
        self.write_fully_with(data, &CancellationToken::dummy())
    }

    /// `write_fully` under a cancellation scope.
    pub fn write_fully_with(
        &self,
        mut data: &[u8],
        token: &CancellationToken,
    ) -> TransportResult<()> {
        while !data.is_empty() {
            token.check()?;
            let progress;
            {
                let mut inner = self.inner.lock().unwrap();
                if inner.write_closed {
                    return Err(match inner.cause.clone() {
                        Some(cause) => cause,
                        None => TransportError::ChannelClosed,
                    });
                }
                let free = inner.capacity - inner.buf.len();
                if free == 0 {
                    let (guard, _) = self
                        .writable
                        .wait_timeout(inner, CANCEL_TICK)
                        .unwrap();
                    drop(guard);
                    continue;
                }
                let n = free.min(data.len());
                inner.buf.extend(&data[..n]);
                inner.transferred += n as u64;
                progress = (inner.transferred, inner.expected_total);
                data = &data[n..];
                self.readable.notify_all();
            }
            // Outside the lock: the listener must not interfere with
            // flow control even if it is slow.
            if let Some(listener) = self.listener.lock().unwrap().clone() {
                listener.on_progress(progress.0, progress.1);
            }
        }
        Ok(())
    }

    /// Read whatever is buffered into `dst` without suspending; suspend
    /// only when the channel is empty and still open.
    ///
    /// Returns `Ok(0)` as the end-of-stream sentinel once the channel is
    /// gracefully closed and drained; replays the closing cause when the
    /// channel was terminated abnormally.
    pub fn read_available(&self, dst: &mut [u8]) -> TransportResult<usize> {
        self.read_available_with(dst, &CancellationToken::dummy())
    }

    /// `read_available` under a cancellation scope.
    pub fn read_available_with(
        &self,
        dst: &mut [u8],
        token: &CancellationToken,
    ) -> TransportResult<usize> {
        if dst.is_empty() {
            return Ok(0);
        }
        loop {
            token.check()?;
            let mut inner = self.inner.lock().unwrap();
            if let Some(cause) = inner.cause.clone() {
                return Err(cause);
            }
            if !inner.buf.is_empty() {
                let n = dst.len().min(inner.buf.len());
                for slot in dst[..n].iter_mut() {
                    *slot = inner.buf.pop_front().unwrap();
                }
                self.writable.notify_all();
                return Ok(n);
            }
            if inner.write_closed {
                return Ok(0);
            }
            let (guard, _) = self.readable.wait_timeout(inner, CANCEL_TICK).unwrap();
            drop(guard);
        }
    }

    /// Suspend until content is buffered or the channel closes.
    ///
    /// `Ok(true)` means bytes are readable, `Ok(false)` means EOF;
    /// an abnormal close replays the cause.
    pub fn await_content(&self) -> TransportResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(cause) = inner.cause.clone() {
                return Err(cause);
            }
            if !inner.buf.is_empty() {
                return Ok(true);
            }
            if inner.write_closed {
                return Ok(false);
            }
            inner = self.readable.wait(inner).unwrap();
        }
    }

    /// Close the channel. Idempotent; the first call wins.
    ///
    /// `None` is a graceful EOF: buffered bytes remain readable and the
    /// reader then sees end-of-stream. `Some(cause)` terminates: buffered
    /// bytes are discarded and every subsequent or in-flight read fails
    /// with the cause.
    pub fn close(&self, cause: Option<TransportError>) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.write_closed {
            return false;
        }
        inner.write_closed = true;
        if let Some(cause) = cause {
            inner.cause = Some(cause);
            inner.buf.clear();
        }
        self.readable.notify_all();
        self.writable.notify_all();
        true
    }
}

impl std::fmt::Debug for ByteChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("ByteChannel")
            .field("buffered", &inner.buf.len())
            .field("capacity", &inner.capacity)
            .field("write_closed", &inner.write_closed)
            .field("cause", &inner.cause)
            .finish()
    }
}
