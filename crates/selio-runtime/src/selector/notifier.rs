//! Selector wakeup notifier
//!
//! The loop thread blocks inside the readiness primitive; threads that
//! enqueue a registration, close, or shutdown request poke this notifier
//! to interrupt the wait. On Linux this is an eventfd (counter semantics
//! coalesce any number of pokes into one wakeup); elsewhere a
//! self-pipe plays the same role.

use std::os::unix::io::RawFd;

use selio_core::{TransportError, TransportResult};

pub struct WakeNotifier {
    /// Descriptor the selector loop watches for read-readiness.
    wait_fd: RawFd,
    /// Descriptor writers poke. Same as `wait_fd` for eventfd.
    signal_fd: RawFd,
}

impl WakeNotifier {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub fn new() -> TransportResult<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(TransportError::last_os_error());
        }
        Ok(Self {
            wait_fd: fd,
            signal_fd: fd,
        })
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    pub fn new() -> TransportResult<Self> {
        let mut fds = [0i32; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(TransportError::last_os_error());
        }
        for fd in fds {
            unsafe {
                let flags = libc::fcntl(fd, libc::F_GETFL);
                libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
                libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
            }
        }
        Ok(Self {
            wait_fd: fds[0],
            signal_fd: fds[1],
        })
    }

    /// Descriptor the loop registers for read-readiness.
    pub fn wait_fd(&self) -> RawFd {
        self.wait_fd
    }

    /// Wake the loop. Safe from any thread; coalesces.
    pub fn notify(&self) -> TransportResult<()> {
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.signal_fd,
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            // EAGAIN means a wakeup is already pending; that is enough.
            if errno == libc::EAGAIN {
                return Ok(());
            }
            return Err(TransportError::Os(errno));
        }
        Ok(())
    }

    /// Consume pending wakeups. Called by the loop after it observes
    /// read-readiness on `wait_fd`.
    pub fn drain(&self) {
        let mut buf = [0u8; 8];
        loop {
            let ret = unsafe {
                libc::read(self.wait_fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len())
            };
            if ret <= 0 {
                break;
            }
        }
    }
}

impl Drop for WakeNotifier {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.wait_fd);
            if self.signal_fd != self.wait_fd {
                libc::close(self.signal_fd);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_then_drain() {
        let notifier = WakeNotifier::new().unwrap();
        notifier.notify().unwrap();
        notifier.notify().unwrap();
        notifier.drain();
        // Drained: a non-blocking read now reports nothing pending.
        let mut buf = [0u8; 8];
        let ret = unsafe {
            libc::read(
                notifier.wait_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
            )
        };
        assert!(ret < 0);
    }

    #[test]
    fn test_notify_coalesces_without_error() {
        let notifier = WakeNotifier::new().unwrap();
        for _ in 0..1000 {
            notifier.notify().unwrap();
        }
        notifier.drain();
    }
}
