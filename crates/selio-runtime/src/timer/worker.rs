//! Timer worker thread
//!
//! One thread per `TimerService` polls the backend and invokes expired
//! targets. Sleep length adapts to the next deadline, floored to avoid
//! busy-spinning and capped so newly inserted earlier deadlines are
//! noticed promptly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use selio_core::sel_debug;

use super::{DeadlineHeap, TimeoutTarget, TimerBackend, TimerHandle};

/// Tuning for the worker thread
#[derive(Debug, Clone)]
pub struct TimerServiceConfig {
    /// Longest sleep between polls, even with no deadline pending
    pub max_poll_interval: Duration,

    /// Shortest sleep (busy-spin guard)
    pub min_sleep: Duration,

    /// Worker thread name
    pub thread_name: String,
}

impl Default for TimerServiceConfig {
    fn default() -> Self {
        Self {
            max_poll_interval: Duration::from_millis(1),
            min_sleep: Duration::from_micros(50),
            thread_name: "selio-timer".into(),
        }
    }
}

/// Handle to a running timer worker
pub struct TimerService {
    backend: Arc<dyn TimerBackend>,
    shutdown: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TimerService {
    /// Start a service over a fresh [`DeadlineHeap`].
    pub fn start(config: TimerServiceConfig) -> Arc<Self> {
        Self::with_backend(Arc::new(DeadlineHeap::new()), config)
    }

    /// Start a service over a caller-provided backend.
    pub fn with_backend(backend: Arc<dyn TimerBackend>, config: TimerServiceConfig) -> Arc<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));

        let loop_backend = Arc::clone(&backend);
        let loop_shutdown = Arc::clone(&shutdown);
        let loop_config = config.clone();
        let thread = thread::Builder::new()
            .name(config.thread_name)
            .spawn(move || timer_loop(loop_backend, loop_shutdown, loop_config))
            .expect("failed to spawn timer thread");

        Arc::new(Self {
            backend,
            shutdown,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Schedule `target` to fire after `delay`.
    pub fn schedule(&self, delay: Duration, target: Arc<dyn TimeoutTarget>) -> TimerHandle {
        self.backend.insert(super::TimerEntry::after(delay, target))
    }

    /// Schedule `target` to fire at an absolute deadline.
    pub fn schedule_at(&self, deadline: Instant, target: Arc<dyn TimeoutTarget>) -> TimerHandle {
        self.backend.insert(super::TimerEntry::at(deadline, target))
    }

    /// Best-effort cancellation; the timer may already have fired.
    pub fn cancel(&self, handle: TimerHandle) -> bool {
        self.backend.cancel(handle)
    }

    /// Pending (non-cancelled) timers.
    pub fn active(&self) -> usize {
        self.backend.len()
    }

    /// Stop the worker and join it. Pending timers never fire.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn timer_loop(
    backend: Arc<dyn TimerBackend>,
    shutdown: Arc<AtomicBool>,
    config: TimerServiceConfig,
) {
    sel_debug!("timer loop started ({})", backend.name());
    while !shutdown.load(Ordering::Relaxed) {
        let now = Instant::now();
        for entry in backend.poll_expired(now) {
            entry.target.on_timeout();
        }

        let sleep = match backend.next_deadline() {
            Some(deadline) => {
                let now = Instant::now();
                if deadline <= now {
                    Duration::ZERO
                } else {
                    (deadline - now)
                        .min(config.max_poll_interval)
                        .max(config.min_sleep)
                }
            }
            None => config.max_poll_interval,
        };
        if sleep > Duration::ZERO {
            thread::sleep(sleep);
        }
    }
    sel_debug!("timer loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counter(AtomicUsize);
    impl TimeoutTarget for Counter {
        fn on_timeout(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_fires_expired_target() {
        let service = TimerService::start(TimerServiceConfig::default());
        let counter = Arc::new(Counter(AtomicUsize::new(0)));

        service.schedule(Duration::from_millis(10), counter.clone());
        thread::sleep(Duration::from_millis(60));

        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        service.shutdown();
    }

    #[test]
    fn test_cancel_before_fire() {
        let service = TimerService::start(TimerServiceConfig::default());
        let counter = Arc::new(Counter(AtomicUsize::new(0)));

        let handle = service.schedule(Duration::from_millis(80), counter.clone());
        assert!(service.cancel(handle));
        thread::sleep(Duration::from_millis(140));

        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
        service.shutdown();
    }

    #[test]
    fn test_shutdown_stops_firing() {
        let service = TimerService::start(TimerServiceConfig::default());
        let counter = Arc::new(Counter(AtomicUsize::new(0)));

        service.schedule(Duration::from_millis(100), counter.clone());
        service.shutdown();
        thread::sleep(Duration::from_millis(150));

        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }
}
