//! Cooperative shutdown shared by the poller and the signal handler.

use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context;
use tracing::warn;

/// Exit status used when a second interrupt forces the process down.
pub const FORCED_EXIT_CODE: i32 = 130;

/// A one-way flag that sleeping threads can wait on.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown and wake every waiter. Idempotent.
    pub fn trigger(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for up to `timeout`, returning early if shutdown is requested.
    /// Returns `true` when shutdown was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |triggered| !*triggered)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }

    /// Route SIGINT/SIGTERM to this signal.
    ///
    /// The first signal triggers a graceful shutdown. A second one exits
    /// immediately with [`FORCED_EXIT_CODE`], abandoning running agents.
    pub fn install_handler(&self) -> anyhow::Result<()> {
        let signal = self.clone();
        let received = AtomicUsize::new(0);
        ctrlc::set_handler(move || {
            if received.fetch_add(1, Ordering::SeqCst) == 0 {
                warn!("shutdown requested, waiting for running agents (interrupt again to force)");
                signal.trigger();
            } else {
                warn!("forced shutdown");
                process::exit(FORCED_EXIT_CODE);
            }
        })
        .context("installing signal handler")
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use super::*;

    #[test]
    fn wait_times_out_when_not_triggered() {
        let signal = ShutdownSignal::new();
        let start = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(50)));
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(!signal.is_triggered());
    }

    #[test]
    fn trigger_wakes_a_sleeping_waiter() {
        let signal = ShutdownSignal::new();
        let waiter = {
            let signal = signal.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let triggered = signal.wait_timeout(Duration::from_secs(30));
                (triggered, start.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(50));
        signal.trigger();

        let (triggered, waited) = waiter.join().unwrap();
        assert!(triggered);
        assert!(waited < Duration::from_secs(10));
    }

    #[test]
    fn triggered_signal_returns_immediately() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        signal.trigger();
        assert!(signal.is_triggered());
        assert!(signal.wait_timeout(Duration::from_secs(30)));
    }
}
