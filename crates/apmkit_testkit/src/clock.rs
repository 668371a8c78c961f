//! A clock that is advanced by hand.

use apmkit_core::{Clock, ShutdownSignal};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Deterministic clock for driving the sender without waiting.
///
/// Sleeping records the requested duration and advances the clock by it.
/// A shutdown can be scheduled to fire on the n-th sleep, which is how
/// tests stop a state that would otherwise loop forever.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
    sleeps: Mutex<Vec<Duration>>,
    shutdown_after: Mutex<Option<usize>>,
}

impl ManualClock {
    /// Creates a clock reading `now` milliseconds.
    pub fn starting_at(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
            ..Self::default()
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    /// Sets the clock to an absolute value.
    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Requests shutdown on the signal passed to the `count`-th sleep from now.
    pub fn shutdown_after_sleeps(&self, count: usize) {
        let already = self.sleeps.lock().len();
        *self.shutdown_after.lock() = Some(already + count);
    }

    /// Every recorded sleep, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }

    /// Every recorded sleep in milliseconds.
    pub fn sleep_millis(&self) -> Vec<u128> {
        self.sleeps.lock().iter().map(Duration::as_millis).collect()
    }

    /// Number of recorded sleeps.
    pub fn sleep_count(&self) -> usize {
        self.sleeps.lock().len()
    }

    /// Forgets the recorded sleeps.
    pub fn clear_sleeps(&self) {
        self.sleeps.lock().clear();
        *self.shutdown_after.lock() = None;
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }

    fn sleep(&self, duration: Duration, signal: &ShutdownSignal) {
        if signal.is_requested() {
            return;
        }
        let count = {
            let mut sleeps = self.sleeps.lock();
            sleeps.push(duration);
            sleeps.len()
        };
        self.advance(i64::try_from(duration.as_millis()).unwrap_or(i64::MAX));
        if *self.shutdown_after.lock() == Some(count) {
            signal.request();
        }
        std::thread::yield_now();
    }
}
