//! Conversion between local time and collector cluster time.

use crate::clock::Clock;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

/// Largest offset accepted from an exchange, one century in milliseconds.
pub const MAX_CLUSTER_OFFSET: i64 = 100 * 365 * 24 * 60 * 60 * 1000;

/// Time synchronization service.
///
/// Holds the offset between the local clock and the collector cluster
/// clock, learned from time-sync exchanges. Until the first successful
/// synchronization the offset is zero.
pub struct TimeSync {
    clock: Arc<dyn Clock>,
    init_time: i64,
    cluster_offset: AtomicI64,
    synchronized: AtomicBool,
    last_sync_time: AtomicI64,
}

impl TimeSync {
    /// Creates a service anchored at the clock's current time.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let init_time = clock.now_millis();
        Self {
            clock,
            init_time,
            cluster_offset: AtomicI64::new(0),
            synchronized: AtomicBool::new(false),
            last_sync_time: AtomicI64::new(0),
        }
    }

    /// Returns the underlying clock.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Current local time in milliseconds.
    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Local time at which this service was created.
    pub fn init_time(&self) -> i64 {
        self.init_time
    }

    /// Milliseconds elapsed since this service was created.
    pub fn time_since_init(&self) -> i64 {
        self.now().saturating_sub(self.init_time).max(0)
    }

    /// Converts a local timestamp to cluster time.
    pub fn to_cluster_time(&self, local: i64) -> i64 {
        local.saturating_add(self.cluster_offset.load(Ordering::Acquire))
    }

    /// Current cluster time.
    pub fn cluster_now(&self) -> i64 {
        self.to_cluster_time(self.now())
    }

    /// Current cluster offset in milliseconds.
    pub fn cluster_offset(&self) -> i64 {
        self.cluster_offset.load(Ordering::Acquire)
    }

    /// Whether at least one synchronization succeeded.
    pub fn is_synchronized(&self) -> bool {
        self.synchronized.load(Ordering::Acquire)
    }

    /// Local time of the last successful synchronization.
    pub fn last_sync_time(&self) -> Option<i64> {
        if self.is_synchronized() {
            Some(self.last_sync_time.load(Ordering::Acquire))
        } else {
            None
        }
    }

    /// Publishes a newly computed offset, learned at local time `at`.
    pub fn set_cluster_offset(&self, offset: i64, at: i64) {
        self.cluster_offset.store(offset, Ordering::Release);
        self.last_sync_time.store(at, Ordering::Release);
        self.synchronized.store(true, Ordering::Release);
    }

    /// Offset derived from one exchange.
    ///
    /// `request_send` and `response_receive` are local times, the other two
    /// are collector times. Returns `None` when the offset exceeds
    /// [`MAX_CLUSTER_OFFSET`] in either direction.
    pub fn exchange_offset(
        request_send: i64,
        request_receive: i64,
        response_send: i64,
        response_receive: i64,
    ) -> Option<i64> {
        let forward = i128::from(request_receive) - i128::from(request_send);
        let backward = i128::from(response_send) - i128::from(response_receive);
        let offset = (forward + backward) / 2;
        if offset.abs() > i128::from(MAX_CLUSTER_OFFSET) {
            return None;
        }
        i64::try_from(offset).ok()
    }

    /// Combines the offsets of one synchronization round.
    ///
    /// Returns the mean of the offsets lying within one standard deviation
    /// of the median, or `None` when `offsets` is empty.
    pub fn compute_cluster_offset(offsets: &[i64]) -> Option<i64> {
        if offsets.is_empty() {
            return None;
        }

        let mut sorted = offsets.to_vec();
        sorted.sort_unstable();
        let median = sorted[sorted.len() / 2];

        let mean_square = sorted
            .iter()
            .map(|o| {
                let diff = (i128::from(*o) - i128::from(median)) as f64;
                diff * diff
            })
            .sum::<f64>()
            / sorted.len() as f64;
        let std_dev = mean_square.sqrt();

        let (sum, count) = sorted
            .iter()
            .filter(|o| ((i128::from(**o) - i128::from(median)) as f64).abs() <= std_dev)
            .fold((0i128, 0i128), |(sum, count), o| (sum + i128::from(*o), count + 1));

        // the median itself always passes the filter
        i64::try_from(sum / count).ok()
    }
}

impl std::fmt::Debug for TimeSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeSync")
            .field("init_time", &self.init_time)
            .field("cluster_offset", &self.cluster_offset())
            .field("synchronized", &self.is_synchronized())
            .finish()
    }
}
