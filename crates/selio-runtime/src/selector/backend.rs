//! OS readiness backends
//!
//! A `ReadinessBackend` is the blocking wait primitive the selector loop
//! owns. All backends are level-triggered: readiness that already exists
//! when an interest is (re)registered is reported by the very next wait,
//! which is what makes register-after-ready safe without a retry scheme.
//!
//! `EpollBackend` is the Linux implementation; `PollBackend` is the
//! portable fallback for other unix targets. Both satisfy the same
//! contract and are tested against it.

use std::os::unix::io::RawFd;
use std::time::Duration;

use selio_core::{InterestSet, TransportError, TransportResult};

/// One descriptor's readiness as reported by a wait
///
/// Error/hangup conditions are folded into both directions: the waiter is
/// resumed and its next syscall observes the failure.
#[derive(Debug, Clone, Copy)]
pub struct ReadyEvent {
    pub fd: RawFd,
    pub readable: bool,
    pub writable: bool,
}

/// The blocking readiness-wait primitive
///
/// Owned by exactly one thread (the selector loop); none of these methods
/// are called concurrently.
pub trait ReadinessBackend: Send {
    /// Start watching `fd` for the directions implied by `set`.
    fn register(&mut self, fd: RawFd, set: InterestSet) -> TransportResult<()>;

    /// Replace the watched directions for an already-registered `fd`.
    fn update(&mut self, fd: RawFd, set: InterestSet) -> TransportResult<()>;

    /// Stop watching `fd`. Must tolerate an already-closed descriptor.
    fn deregister(&mut self, fd: RawFd) -> TransportResult<()>;

    /// Block until readiness or `timeout`, appending to `events`.
    fn wait(&mut self, events: &mut Vec<ReadyEvent>, timeout: Duration) -> TransportResult<()>;

    fn name(&self) -> &'static str;
}

#[inline]
fn os_err(e: nix::errno::Errno) -> TransportError {
    TransportError::Os(e as i32)
}

#[inline]
fn timeout_millis(timeout: Duration) -> u16 {
    // Both epoll and poll timeouts here are bounded ticks, well under
    // u16::MAX milliseconds; clamp rather than widen.
    timeout.as_millis().min(u16::MAX as u128 - 1) as u16
}

// ── epoll (Linux) ────────────────────────────────────────────────────

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use epoll_impl::EpollBackend;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod epoll_impl {
    use super::*;
    use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
    use std::os::fd::BorrowedFd;

    pub struct EpollBackend {
        epoll: Epoll,
        buf: Vec<EpollEvent>,
    }

    impl EpollBackend {
        pub fn new() -> TransportResult<Self> {
            let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC).map_err(os_err)?;
            Ok(Self {
                epoll,
                buf: vec![EpollEvent::empty(); 256],
            })
        }

        fn flags_for(set: InterestSet) -> EpollFlags {
            let mut flags = EpollFlags::EPOLLRDHUP;
            if set.wants_input() {
                flags |= EpollFlags::EPOLLIN;
            }
            if set.wants_output() {
                flags |= EpollFlags::EPOLLOUT;
            }
            flags
        }
    }

    impl ReadinessBackend for EpollBackend {
        fn register(&mut self, fd: RawFd, set: InterestSet) -> TransportResult<()> {
            let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
            let event = EpollEvent::new(Self::flags_for(set), fd as u64);
            self.epoll.add(borrowed, event).map_err(os_err)
        }

        fn update(&mut self, fd: RawFd, set: InterestSet) -> TransportResult<()> {
            let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
            let mut event = EpollEvent::new(Self::flags_for(set), fd as u64);
            self.epoll.modify(borrowed, &mut event).map_err(os_err)
        }

        fn deregister(&mut self, fd: RawFd) -> TransportResult<()> {
            let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
            match self.epoll.delete(borrowed) {
                Ok(()) => Ok(()),
                // The descriptor may already be closed; the kernel has
                // dropped the registration itself in that case.
                Err(nix::errno::Errno::EBADF) | Err(nix::errno::Errno::ENOENT) => Ok(()),
                Err(e) => Err(os_err(e)),
            }
        }

        fn wait(&mut self, events: &mut Vec<ReadyEvent>, timeout: Duration) -> TransportResult<()> {
            let timeout = EpollTimeout::from(timeout_millis(timeout));
            let n = match self.epoll.wait(&mut self.buf, timeout) {
                Ok(n) => n,
                Err(nix::errno::Errno::EINTR) => 0,
                Err(e) => return Err(os_err(e)),
            };
            for ev in &self.buf[..n] {
                let flags = ev.events();
                let failed = flags
                    .intersects(EpollFlags::EPOLLERR | EpollFlags::EPOLLHUP | EpollFlags::EPOLLRDHUP);
                events.push(ReadyEvent {
                    fd: ev.data() as RawFd,
                    readable: flags.contains(EpollFlags::EPOLLIN) || failed,
                    writable: flags.contains(EpollFlags::EPOLLOUT) || failed,
                });
            }
            Ok(())
        }

        fn name(&self) -> &'static str {
            "epoll"
        }
    }
}

// ── poll (portable unix fallback) ────────────────────────────────────

pub use poll_impl::PollBackend;

mod poll_impl {
    use super::*;
    use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
    use std::collections::HashMap;
    use std::os::fd::BorrowedFd;

    pub struct PollBackend {
        registered: HashMap<RawFd, InterestSet>,
    }

    impl PollBackend {
        pub fn new() -> TransportResult<Self> {
            Ok(Self {
                registered: HashMap::new(),
            })
        }

        fn flags_for(set: InterestSet) -> PollFlags {
            let mut flags = PollFlags::empty();
            if set.wants_input() {
                flags |= PollFlags::POLLIN;
            }
            if set.wants_output() {
                flags |= PollFlags::POLLOUT;
            }
            flags
        }
    }

    impl ReadinessBackend for PollBackend {
        fn register(&mut self, fd: RawFd, set: InterestSet) -> TransportResult<()> {
            self.registered.insert(fd, set);
            Ok(())
        }

        fn update(&mut self, fd: RawFd, set: InterestSet) -> TransportResult<()> {
            self.registered.insert(fd, set);
            Ok(())
        }

        fn deregister(&mut self, fd: RawFd) -> TransportResult<()> {
            self.registered.remove(&fd);
            Ok(())
        }

        fn wait(&mut self, events: &mut Vec<ReadyEvent>, timeout: Duration) -> TransportResult<()> {
            // The interest table is re-evaluated on every wait, so a
            // registration racing prior readiness is picked up here.
            let fds: Vec<RawFd> = self.registered.keys().copied().collect();
            let mut pollfds: Vec<PollFd> = fds
                .iter()
                .map(|&fd| {
                    let set = self.registered[&fd];
                    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
                    PollFd::new(borrowed, Self::flags_for(set))
                })
                .collect();

            let timeout = PollTimeout::from(timeout_millis(timeout));
            match poll(&mut pollfds, timeout) {
                Ok(_) => {}
                Err(nix::errno::Errno::EINTR) => return Ok(()),
                Err(e) => return Err(os_err(e)),
            }

            for (i, pollfd) in pollfds.iter().enumerate() {
                let revents = pollfd.revents().unwrap_or_else(PollFlags::empty);
                if revents.is_empty() {
                    continue;
                }
                let failed = revents.intersects(
                    PollFlags::POLLERR | PollFlags::POLLHUP | PollFlags::POLLNVAL,
                );
                events.push(ReadyEvent {
                    fd: fds[i],
                    readable: revents.contains(PollFlags::POLLIN) || failed,
                    writable: revents.contains(PollFlags::POLLOUT) || failed,
                });
            }
            Ok(())
        }

        fn name(&self) -> &'static str {
            "poll"
        }
    }
}

// Default backend for the target, chosen at build time.
cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        pub type PlatformBackend = EpollBackend;

        pub fn new_platform_backend() -> TransportResult<Box<dyn ReadinessBackend>> {
            Ok(Box::new(EpollBackend::new()?))
        }
    } else {
        pub type PlatformBackend = PollBackend;

        pub fn new_platform_backend() -> TransportResult<Box<dyn ReadinessBackend>> {
            Ok(Box::new(PollBackend::new()?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use selio_core::Interest;
    use std::os::unix::io::RawFd;

    fn pipe_pair() -> (RawFd, RawFd) {
        let mut fds = [0i32; 2];
        let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(ret, 0);
        (fds[0], fds[1])
    }

    fn close_pair(pair: (RawFd, RawFd)) {
        unsafe {
            libc::close(pair.0);
            libc::close(pair.1);
        }
    }

    fn read_set() -> InterestSet {
        let mut set = InterestSet::empty();
        set.insert(Interest::Read);
        set
    }

    /// Shared contract: readiness existing BEFORE registration must be
    /// reported by the first wait after it.
    fn check_reports_preexisting_readiness(backend: &mut dyn ReadinessBackend) {
        let (rd, wr) = pipe_pair();
        let payload = [1u8; 4];
        let written = unsafe { libc::write(wr, payload.as_ptr() as *const _, 4) };
        assert_eq!(written, 4);

        backend.register(rd, read_set()).unwrap();

        let mut events = Vec::new();
        backend
            .wait(&mut events, Duration::from_millis(500))
            .unwrap();
        assert!(
            events.iter().any(|e| e.fd == rd && e.readable),
            "{}: pre-registration readiness lost",
            backend.name()
        );

        backend.deregister(rd).unwrap();
        close_pair((rd, wr));
    }

    /// Shared contract: an empty wait returns after the bounded timeout.
    fn check_bounded_timeout(backend: &mut dyn ReadinessBackend) {
        let mut events = Vec::new();
        let start = std::time::Instant::now();
        backend
            .wait(&mut events, Duration::from_millis(30))
            .unwrap();
        assert!(events.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    #[test]
    fn test_epoll_contract() {
        let mut backend = EpollBackend::new().unwrap();
        check_bounded_timeout(&mut backend);
        check_reports_preexisting_readiness(&mut backend);
    }

    #[test]
    fn test_poll_contract() {
        let mut backend = PollBackend::new().unwrap();
        check_bounded_timeout(&mut backend);
        check_reports_preexisting_readiness(&mut backend);
    }

    #[test]
    fn test_deregister_tolerates_closed_fd() {
        let mut backend = PlatformBackend::new().unwrap();
        let (rd, wr) = pipe_pair();
        backend.register(rd, read_set()).unwrap();
        close_pair((rd, wr));
        assert!(backend.deregister(rd).is_ok());
    }
}
