//! Session numbers and thread ids.

use rand::Rng;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

/// Hands out process-unique session numbers.
///
/// Numbers start at a random offset so they are unpredictable across
/// restarts, increase by one per session and wrap from `i32::MAX` back
/// to 1. Zero and negative numbers are never returned.
#[derive(Debug)]
pub struct SessionIdProvider {
    last: AtomicI32,
}

impl SessionIdProvider {
    /// Creates a provider seeded at a random offset.
    pub fn new() -> Self {
        Self::with_offset(rand::thread_rng().gen_range(0..i32::MAX))
    }

    /// Creates a provider whose first number is `offset + 1`.
    pub fn with_offset(offset: i32) -> Self {
        Self {
            last: AtomicI32::new(offset.max(0)),
        }
    }

    /// Returns the next session number.
    pub fn next_id(&self) -> i32 {
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let next = if current == i32::MAX { 1 } else { current + 1 };
            match self
                .last
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for SessionIdProvider {
    fn default() -> Self {
        Self::new()
    }
}

static NEXT_THREAD_ID: AtomicU32 = AtomicU32::new(1);

thread_local! {
    static THREAD_ID: u32 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

/// Small process-unique id of the calling thread, stable for its lifetime.
pub fn current_thread_id() -> u32 {
    THREAD_ID.with(|id| *id)
}
