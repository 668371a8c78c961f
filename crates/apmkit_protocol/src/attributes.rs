//! Attributes negotiated with the collector.

use std::time::Duration;

/// Default maximum beacon chunk size in bytes.
pub const DEFAULT_MAX_BEACON_SIZE: usize = 30 * 1024;

/// Default interval between open-session beacon sends.
pub const DEFAULT_SEND_INTERVAL: Duration = Duration::from_secs(120);

/// The attribute set currently in effect.
///
/// Instances are immutable; a new response produces a new instance via
/// [`ResponseAttributes::merged`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseAttributes {
    capture: bool,
    capture_errors: bool,
    capture_crashes: bool,
    multiplicity: u32,
    server_id: i32,
    max_beacon_size: usize,
    send_interval: Duration,
    time_sync_supported: bool,
}

impl ResponseAttributes {
    /// Creates the pre-negotiation defaults for the given server id.
    pub fn with_defaults(server_id: i32) -> Self {
        Self {
            capture: true,
            capture_errors: true,
            capture_crashes: true,
            multiplicity: 1,
            server_id,
            max_beacon_size: DEFAULT_MAX_BEACON_SIZE,
            send_interval: DEFAULT_SEND_INTERVAL,
            time_sync_supported: false,
        }
    }

    /// Returns a new attribute set with every field present in `update`
    /// replaced. Omitted fields keep their value from `self`.
    #[must_use]
    pub fn merged(&self, update: &AttributeUpdate) -> Self {
        Self {
            capture: update.capture.unwrap_or(self.capture),
            capture_errors: update.capture_errors.unwrap_or(self.capture_errors),
            capture_crashes: update.capture_crashes.unwrap_or(self.capture_crashes),
            multiplicity: update.multiplicity.unwrap_or(self.multiplicity),
            server_id: update.server_id.unwrap_or(self.server_id),
            max_beacon_size: update.max_beacon_size.unwrap_or(self.max_beacon_size),
            send_interval: update.send_interval.unwrap_or(self.send_interval),
            time_sync_supported: update
                .time_sync_supported
                .unwrap_or(self.time_sync_supported),
        }
    }

    /// Returns a copy with capture switched off.
    #[must_use]
    pub fn with_capture_disabled(&self) -> Self {
        Self {
            capture: false,
            ..self.clone()
        }
    }

    /// Whether capturing is enabled.
    pub fn is_capture_on(&self) -> bool {
        self.capture
    }

    /// Whether errors are captured.
    pub fn capture_errors(&self) -> bool {
        self.capture_errors
    }

    /// Whether crashes are captured.
    pub fn capture_crashes(&self) -> bool {
        self.capture_crashes
    }

    /// Collector-assigned multiplicity.
    pub fn multiplicity(&self) -> u32 {
        self.multiplicity
    }

    /// Server id all requests are addressed to.
    pub fn server_id(&self) -> i32 {
        self.server_id
    }

    /// Maximum size of one delivered chunk in bytes.
    pub fn max_beacon_size(&self) -> usize {
        self.max_beacon_size
    }

    /// Interval between open-session beacon sends.
    pub fn send_interval(&self) -> Duration {
        self.send_interval
    }

    /// Whether the collector answers time-sync requests.
    pub fn is_time_sync_supported(&self) -> bool {
        self.time_sync_supported
    }
}

/// Fields decoded from one collector response.
///
/// `None` means the response omitted the field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeUpdate {
    /// Capture flag.
    pub capture: Option<bool>,
    /// Capture errors flag.
    pub capture_errors: Option<bool>,
    /// Capture crashes flag.
    pub capture_crashes: Option<bool>,
    /// Multiplicity.
    pub multiplicity: Option<u32>,
    /// Server id.
    pub server_id: Option<i32>,
    /// Maximum beacon size in bytes.
    pub max_beacon_size: Option<usize>,
    /// Send interval.
    pub send_interval: Option<Duration>,
    /// Time sync support.
    pub time_sync_supported: Option<bool>,
}

impl AttributeUpdate {
    /// Creates an empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the capture flag.
    pub fn with_capture(mut self, capture: bool) -> Self {
        self.capture = Some(capture);
        self
    }

    /// Sets the server id.
    pub fn with_server_id(mut self, server_id: i32) -> Self {
        self.server_id = Some(server_id);
        self
    }

    /// Sets the multiplicity.
    pub fn with_multiplicity(mut self, multiplicity: u32) -> Self {
        self.multiplicity = Some(multiplicity);
        self
    }

    /// Sets the maximum beacon size in bytes.
    pub fn with_max_beacon_size(mut self, size: usize) -> Self {
        self.max_beacon_size = Some(size);
        self
    }

    /// Sets the send interval.
    pub fn with_send_interval(mut self, interval: Duration) -> Self {
        self.send_interval = Some(interval);
        self
    }

    /// Sets the time sync support flag.
    pub fn with_time_sync_supported(mut self, supported: bool) -> Self {
        self.time_sync_supported = Some(supported);
        self
    }

    /// Returns true if no field is present.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let attrs = ResponseAttributes::with_defaults(7);
        assert!(attrs.is_capture_on());
        assert!(attrs.capture_errors());
        assert!(attrs.capture_crashes());
        assert_eq!(attrs.multiplicity(), 1);
        assert_eq!(attrs.server_id(), 7);
        assert_eq!(attrs.max_beacon_size(), DEFAULT_MAX_BEACON_SIZE);
        assert!(!attrs.is_time_sync_supported());
    }

    #[test]
    fn merge_replaces_present_fields_only() {
        let prior = ResponseAttributes::with_defaults(1);
        let update = AttributeUpdate::new()
            .with_capture(false)
            .with_server_id(9)
            .with_send_interval(Duration::from_secs(10));

        let merged = prior.merged(&update);
        assert!(!merged.is_capture_on());
        assert_eq!(merged.server_id(), 9);
        assert_eq!(merged.send_interval(), Duration::from_secs(10));
        // omitted fields are kept
        assert_eq!(merged.multiplicity(), prior.multiplicity());
        assert_eq!(merged.max_beacon_size(), prior.max_beacon_size());
        // prior instance untouched
        assert!(prior.is_capture_on());
    }

    #[test]
    fn empty_update_is_identity() {
        let prior = ResponseAttributes::with_defaults(3);
        assert!(AttributeUpdate::new().is_empty());
        assert_eq!(prior.merged(&AttributeUpdate::new()), prior);
    }

    #[test]
    fn disable_capture() {
        let attrs = ResponseAttributes::with_defaults(1).with_capture_disabled();
        assert!(!attrs.is_capture_on());
        assert!(attrs.capture_errors());
    }
}
