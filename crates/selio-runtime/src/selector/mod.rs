//! Selector: readiness multiplexing on a dedicated loop thread
//!
//! One `SelectorManager` owns one OS readiness primitive and the only
//! thread allowed to touch it. Every other thread talks to the loop
//! through a lock-free request queue plus a wakeup notifier:
//!
//! ```text
//!  caller thread                      selector thread
//!  ─────────────                      ───────────────
//!  select(s, interest)
//!    push Register ──── ArrayQueue ──▶ apply registration
//!    notifier.notify()                 wait on epoll/poll (bounded tick)
//!    park on WaitCell  ◀── resume ──── dispatch readiness / close /
//!                                      deadline / shutdown
//! ```
//!
//! The readiness table is mutated only by the loop thread; external
//! mutation requests are queued, never applied directly. Backends are
//! level-triggered, so an interest registered after the descriptor became
//! ready is still reported by the next wait - no lost wakeups.

pub mod backend;
pub mod notifier;

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;

use selio_core::interest::INTEREST_COUNT;
use selio_core::{
    env_get, sel_debug, sel_error, sel_warn, CancelKind, CancellationToken, Interest, InterestSet,
    TransportError, TransportResult, WaitCell, WakeResult,
};

use backend::{new_platform_backend, ReadinessBackend, ReadyEvent};
use notifier::WakeNotifier;

/// Capacity of the registration/close request queue
const REQUEST_QUEUE_DEPTH: usize = 1024;

/// Bounded retries for submitting a registration before giving up
const SUBMIT_RETRIES: usize = 64;

/// How often a parked `select` caller re-checks for selector shutdown
const ORPHAN_CHECK: Duration = Duration::from_millis(50);

/// A watchable descriptor
///
/// Owns exactly one descriptor handle. The registered-interest mirror is
/// written by the selector thread and read by anyone; the closed flag
/// flips once, before the close request is queued.
pub struct Selectable {
    fd: RawFd,
    closed: AtomicBool,
    interests: AtomicU8,
}

impl Selectable {
    pub fn new(fd: RawFd) -> Arc<Self> {
        Arc::new(Self {
            fd,
            closed: AtomicBool::new(false),
            interests: AtomicU8::new(0),
        })
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Interests currently registered with the selector (loop-maintained).
    pub fn interests(&self) -> InterestSet {
        InterestSet::from_bits(self.interests.load(Ordering::Acquire))
    }

    fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    fn set_interests(&self, set: InterestSet) {
        self.interests.store(set.bits(), Ordering::Release);
    }
}

impl std::fmt::Debug for Selectable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selectable")
            .field("fd", &self.fd)
            .field("closed", &self.is_closed())
            .field("interests", &self.interests())
            .finish()
    }
}

/// A registration in flight to the selector thread
struct EventInfo {
    selectable: Arc<Selectable>,
    interest: Interest,
    cell: Arc<WaitCell>,
    deadline: Option<Instant>,
    token: CancellationToken,
}

enum Request {
    Register(EventInfo),
    Close(Arc<Selectable>),
}

struct SelectorShared {
    requests: ArrayQueue<Request>,
    notifier: WakeNotifier,
    shutdown: AtomicBool,
}

/// Handle to a running selector loop
pub struct SelectorManager {
    shared: Arc<SelectorShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SelectorManager {
    /// Create the manager and spawn its loop thread.
    pub fn new() -> TransportResult<Self> {
        let backend = new_platform_backend()?;
        let shared = Arc::new(SelectorShared {
            requests: ArrayQueue::new(REQUEST_QUEUE_DEPTH),
            notifier: WakeNotifier::new()?,
            shutdown: AtomicBool::new(false),
        });

        let loop_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("selio-select".into())
            .spawn(move || selector_loop(loop_shared, backend))
            .map_err(|_| TransportError::Os(libc::EAGAIN))?;

        Ok(Self {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Suspend until `selectable` is ready for `interest`.
    ///
    /// Fails with a cancellation error if the selectable is closed, the
    /// selector shuts down, or (for the extended variant) the deadline
    /// passes or the token is cancelled.
    pub fn select(
        &self,
        selectable: &Arc<Selectable>,
        interest: Interest,
    ) -> TransportResult<()> {
        self.select_with(selectable, interest, None, &CancellationToken::dummy())
    }

    /// `select` with an optional absolute deadline and cancellation scope.
    pub fn select_with(
        &self,
        selectable: &Arc<Selectable>,
        interest: Interest,
        deadline: Option<Instant>,
        token: &CancellationToken,
    ) -> TransportResult<()> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(TransportError::Cancelled(CancelKind::Shutdown));
        }
        if selectable.is_closed() {
            return Err(TransportError::Cancelled(CancelKind::Closed));
        }
        token.check()?;

        let cell = Arc::new(WaitCell::new());
        let info = EventInfo {
            selectable: Arc::clone(selectable),
            interest,
            cell: Arc::clone(&cell),
            deadline,
            token: token.clone(),
        };
        self.submit(Request::Register(info))?;

        // Park. The periodic re-check covers the narrow race where the
        // loop exits between our shutdown test and the enqueue: resume is
        // first-call-wins, so this can never override a real resumption.
        let result = loop {
            if let Some(result) = cell.wait_until(Instant::now() + ORPHAN_CHECK) {
                break result;
            }
            if self.shared.shutdown.load(Ordering::Acquire) {
                cell.resume(WakeResult::Cancelled(CancelKind::Shutdown));
                break cell.wait();
            }
        };

        match result {
            WakeResult::Ready => Ok(()),
            WakeResult::Cancelled(kind) => Err(TransportError::Cancelled(kind)),
            WakeResult::Rejected(msg) => Err(TransportError::Invariant(msg)),
        }
    }

    /// Report that `selectable` is (being) closed.
    ///
    /// Any waiter still registered for it is woken with
    /// `Cancelled(Closed)`. Call once per selectable lifetime, at or after
    /// the physical descriptor close.
    pub fn notify_closed(&self, selectable: &Arc<Selectable>) {
        if !selectable.mark_closed() {
            return;
        }
        // A close must not be dropped: spin until the queue takes it.
        let mut req = Request::Close(Arc::clone(selectable));
        loop {
            match self.shared.requests.push(req) {
                Ok(()) => break,
                Err(back) => {
                    if self.shared.shutdown.load(Ordering::Acquire) {
                        // Loop shutdown fails all waiters anyway.
                        return;
                    }
                    req = back;
                    let _ = self.shared.notifier.notify();
                    thread::yield_now();
                }
            }
        }
        let _ = self.shared.notifier.notify();
    }

    /// Stop the loop: every pending waiter is failed with
    /// `Cancelled(Shutdown)`, then the thread is joined.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shared.notifier.notify();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn submit(&self, request: Request) -> TransportResult<()> {
        let mut request = request;
        for _ in 0..SUBMIT_RETRIES {
            match self.shared.requests.push(request) {
                Ok(()) => {
                    let _ = self.shared.notifier.notify();
                    return Ok(());
                }
                Err(back) => {
                    request = back;
                    let _ = self.shared.notifier.notify();
                    thread::yield_now();
                }
            }
        }
        sel_warn!("selector request queue saturated");
        Err(TransportError::Os(libc::EAGAIN))
    }
}

impl Drop for SelectorManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ── Loop internals (selector thread only) ────────────────────────────

struct Waiter {
    cell: Arc<WaitCell>,
    deadline: Option<Instant>,
    token: CancellationToken,
}

struct DescriptorEntry {
    selectable: Arc<Selectable>,
    waiters: [Option<Waiter>; INTEREST_COUNT],
}

impl DescriptorEntry {
    fn new(selectable: Arc<Selectable>) -> Self {
        Self {
            selectable,
            waiters: Default::default(),
        }
    }

    fn interest_set(&self) -> InterestSet {
        let mut set = InterestSet::empty();
        for interest in Interest::ALL {
            if self.waiters[interest as usize].is_some() {
                set.insert(interest);
            }
        }
        set
    }
}

fn selector_loop(shared: Arc<SelectorShared>, mut backend: Box<dyn ReadinessBackend>) {
    let tick = Duration::from_millis(env_get("SELIO_SELECT_TICK_MS", 20u64).max(1));
    let mut table: HashMap<RawFd, DescriptorEntry> = HashMap::new();
    let mut events: Vec<ReadyEvent> = Vec::with_capacity(256);

    let wake_fd = shared.notifier.wait_fd();
    let mut wake_set = InterestSet::empty();
    wake_set.insert(Interest::Read);
    if let Err(e) = backend.register(wake_fd, wake_set) {
        sel_error!("cannot watch wakeup descriptor: {}", e);
        fail_all(&shared, &mut table, &mut backend);
        return;
    }
    sel_debug!("selector loop started ({})", backend.name());

    loop {
        while let Some(request) = shared.requests.pop() {
            handle_request(&shared, request, &mut table, &mut backend);
        }

        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }

        let now = Instant::now();
        let nearest = sweep_expired(&mut table, &mut backend, now);

        let mut timeout = tick;
        if let Some(deadline) = nearest {
            timeout = timeout.min(deadline.saturating_duration_since(now));
        }

        events.clear();
        if let Err(e) = backend.wait(&mut events, timeout) {
            sel_warn!("readiness wait failed: {}", e);
        }

        for ev in &events {
            if ev.fd == wake_fd {
                shared.notifier.drain();
                continue;
            }
            dispatch_ready(ev, &mut table, &mut backend);
        }
    }

    fail_all(&shared, &mut table, &mut backend);
    let _ = backend.deregister(wake_fd);
    sel_debug!("selector loop stopped");
}

fn handle_request(
    shared: &SelectorShared,
    request: Request,
    table: &mut HashMap<RawFd, DescriptorEntry>,
    backend: &mut Box<dyn ReadinessBackend>,
) {
    match request {
        Request::Register(info) => {
            if shared.shutdown.load(Ordering::Acquire) {
                info.cell.resume(WakeResult::Cancelled(CancelKind::Shutdown));
                return;
            }
            if info.selectable.is_closed() {
                info.cell.resume(WakeResult::Cancelled(CancelKind::Closed));
                return;
            }
            if info.token.is_cancelled() {
                info.cell.resume(WakeResult::Cancelled(CancelKind::Parent));
                return;
            }

            let fd = info.selectable.fd();
            let idx = info.interest as usize;
            let fresh = !table.contains_key(&fd);
            let entry = table
                .entry(fd)
                .or_insert_with(|| DescriptorEntry::new(Arc::clone(&info.selectable)));

            if entry.waiters[idx].is_some() {
                info.cell
                    .resume(WakeResult::Rejected("interest already has a pending waiter"));
                return;
            }

            entry.waiters[idx] = Some(Waiter {
                cell: info.cell,
                deadline: info.deadline,
                token: info.token,
            });
            let set = entry.interest_set();
            entry.selectable.set_interests(set);

            let outcome = if fresh {
                backend.register(fd, set)
            } else {
                backend.update(fd, set)
            };
            if let Err(e) = outcome {
                sel_warn!("registration for fd {} failed: {}", fd, e);
                if let Some(waiter) = entry.waiters[idx].take() {
                    waiter
                        .cell
                        .resume(WakeResult::Rejected("readiness registration failed"));
                }
                let set = entry.interest_set();
                entry.selectable.set_interests(set);
                if set.is_empty() {
                    table.remove(&fd);
                }
            }
        }
        Request::Close(selectable) => {
            let fd = selectable.fd();
            if let Some(mut entry) = table.remove(&fd) {
                for slot in entry.waiters.iter_mut() {
                    if let Some(waiter) = slot.take() {
                        waiter.cell.resume(WakeResult::Cancelled(CancelKind::Closed));
                    }
                }
                let _ = backend.deregister(fd);
            }
            selectable.set_interests(InterestSet::empty());
        }
    }
}

/// Resume every waiter whose interest bit is satisfied, then clear that
/// interest from the registration.
fn dispatch_ready(
    ev: &ReadyEvent,
    table: &mut HashMap<RawFd, DescriptorEntry>,
    backend: &mut Box<dyn ReadinessBackend>,
) {
    let entry = match table.get_mut(&ev.fd) {
        Some(entry) => entry,
        None => return,
    };

    for interest in Interest::ALL {
        let satisfied =
            (interest.is_input() && ev.readable) || (interest.is_output() && ev.writable);
        if satisfied {
            if let Some(waiter) = entry.waiters[interest as usize].take() {
                waiter.cell.resume(WakeResult::Ready);
            }
        }
    }

    let set = entry.interest_set();
    entry.selectable.set_interests(set);
    if set.is_empty() {
        table.remove(&ev.fd);
        let _ = backend.deregister(ev.fd);
    } else {
        let _ = backend.update(ev.fd, set);
    }
}

/// Fail overdue and parent-cancelled waiters; returns the nearest
/// remaining deadline for the wait-timeout computation.
fn sweep_expired(
    table: &mut HashMap<RawFd, DescriptorEntry>,
    backend: &mut Box<dyn ReadinessBackend>,
    now: Instant,
) -> Option<Instant> {
    let mut nearest: Option<Instant> = None;
    let mut emptied: Vec<RawFd> = Vec::new();

    for (&fd, entry) in table.iter_mut() {
        let mut changed = false;
        for slot in entry.waiters.iter_mut() {
            let expired = match slot {
                Some(waiter) => {
                    if waiter.token.is_cancelled() {
                        Some(CancelKind::Parent)
                    } else if waiter.deadline.is_some_and(|d| d <= now) {
                        Some(CancelKind::Timeout)
                    } else {
                        if let Some(d) = waiter.deadline {
                            nearest = Some(nearest.map_or(d, |n| n.min(d)));
                        }
                        None
                    }
                }
                None => None,
            };
            if let Some(kind) = expired {
                if let Some(waiter) = slot.take() {
                    waiter.cell.resume(WakeResult::Cancelled(kind));
                }
                changed = true;
            }
        }
        if changed {
            let set = entry.interest_set();
            entry.selectable.set_interests(set);
            if set.is_empty() {
                emptied.push(fd);
            } else {
                let _ = backend.update(fd, set);
            }
        }
    }

    for fd in emptied {
        table.remove(&fd);
        let _ = backend.deregister(fd);
    }
    nearest
}

/// Shutdown path: every pending waiter fails with `Cancelled(Shutdown)`.
fn fail_all(
    shared: &SelectorShared,
    table: &mut HashMap<RawFd, DescriptorEntry>,
    backend: &mut Box<dyn ReadinessBackend>,
) {
    for (fd, mut entry) in table.drain() {
        for slot in entry.waiters.iter_mut() {
            if let Some(waiter) = slot.take() {
                waiter
                    .cell
                    .resume(WakeResult::Cancelled(CancelKind::Shutdown));
            }
        }
        entry.selectable.set_interests(InterestSet::empty());
        let _ = backend.deregister(fd);
    }
    while let Some(request) = shared.requests.pop() {
        match request {
            Request::Register(info) => {
                info.cell.resume(WakeResult::Cancelled(CancelKind::Shutdown));
            }
            Request::Close(selectable) => {
                selectable.set_interests(InterestSet::empty());
            }
        }
    }
}
