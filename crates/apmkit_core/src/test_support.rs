use crate::clock::{Clock, ShutdownSignal};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Clock that only moves when told to; sleeping advances it.
pub(crate) struct StepClock {
    now: AtomicI64,
}

impl StepClock {
    pub(crate) fn starting_at(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub(crate) fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for StepClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }

    fn sleep(&self, duration: Duration, _signal: &ShutdownSignal) {
        self.advance(duration.as_millis() as i64);
    }
}
