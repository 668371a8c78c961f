//! Clock abstraction and the shutdown signal.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A one-way shutdown flag that sleeping threads can wait on.
///
/// Any thread may request shutdown; sleepers wake immediately.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    requested: Mutex<bool>,
    condvar: Condvar,
}

impl ShutdownSignal {
    /// Creates a signal in the "running" state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown and wakes every waiter.
    pub fn request(&self) {
        let mut requested = self.requested.lock();
        *requested = true;
        self.condvar.notify_all();
    }

    /// Returns true once shutdown was requested.
    pub fn is_requested(&self) -> bool {
        *self.requested.lock()
    }

    /// Blocks for at most `timeout`, returning early when shutdown is
    /// requested. Returns true if shutdown was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut requested = self.requested.lock();
        if !*requested {
            self.condvar
                .wait_while_for(&mut requested, |requested| !*requested, timeout);
        }
        *requested
    }
}

/// Source of local timestamps and of interruptible sleeps.
///
/// The engine never reads the system clock directly, which lets tests
/// substitute a manual clock that records sleeps.
pub trait Clock: Send + Sync {
    /// Current local time in milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;

    /// Sleeps for `duration` or until `signal` is raised.
    fn sleep(&self, duration: Duration, signal: &ShutdownSignal);
}

/// Clock backed by a monotonic `Instant` anchored to the wall clock at
/// construction.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
    epoch_millis_at_origin: i64,
}

impl SystemClock {
    /// Creates a new system clock.
    pub fn new() -> Self {
        let epoch_millis_at_origin = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        Self {
            origin: Instant::now(),
            epoch_millis_at_origin,
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        self.epoch_millis_at_origin + self.origin.elapsed().as_millis() as i64
    }

    fn sleep(&self, duration: Duration, signal: &ShutdownSignal) {
        signal.wait_timeout(duration);
    }
}
