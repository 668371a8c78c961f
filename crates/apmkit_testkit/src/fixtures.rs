//! Response and configuration fixtures.

use crate::clock::ManualClock;
use apmkit_core::{AgentConfig, AttributeCell, SessionContext, SessionIdProvider, TimeSync};
use apmkit_protocol::{AttributeUpdate, Response, ResponseAttributes, TimeSyncTimestamps};
use std::sync::Arc;
use std::time::Duration;

/// Endpoint used by [`test_config`].
pub const TEST_ENDPOINT: &str = "https://collector.example.com/mbeacon";

/// Application id used by [`test_config`].
pub const TEST_APPLICATION_ID: &str = "test-app";

/// A configuration with fixed identifiers.
pub fn test_config() -> AgentConfig {
    AgentConfig::new(TEST_ENDPOINT, TEST_APPLICATION_ID, "42")
        .with_application_name("Test App")
        .with_application_version("1.0.0")
}

/// A successful status response toggling capture.
pub fn status_ok(capture: bool) -> Response {
    Response::status(200, AttributeUpdate::new().with_capture(capture))
}

/// A successful status response carrying `update`.
pub fn status_with(update: AttributeUpdate) -> Response {
    Response::status(200, update)
}

/// A generic server failure.
pub fn server_error() -> Response {
    Response::error(500)
}

/// A rate-limiting response asking to retry after `seconds`.
pub fn rate_limited(seconds: u64) -> Response {
    Response::too_many_requests(Some(Duration::from_secs(seconds)))
}

/// A successful time-sync response.
pub fn time_sync_ok(request_receive_time: i64, response_send_time: i64) -> Response {
    Response::time_sync(
        200,
        TimeSyncTimestamps {
            request_receive_time,
            response_send_time,
        },
    )
}

/// Everything needed to create sessions against a manual clock.
pub struct SessionFixture {
    /// The clock every timestamp is taken from.
    pub clock: Arc<ManualClock>,
    /// Time synchronization shared by all sessions.
    pub time_sync: Arc<TimeSync>,
    /// Attributes shared by all sessions.
    pub attributes: Arc<AttributeCell>,
    /// Session factory.
    pub sessions: SessionContext,
}

impl SessionFixture {
    /// Creates a fixture using [`test_config`], capture on and session ids from 1.
    pub fn new(start: i64) -> Self {
        Self::with_config(test_config(), start)
    }

    /// Creates a fixture with a custom configuration.
    pub fn with_config(config: AgentConfig, start: i64) -> Self {
        let clock = Arc::new(ManualClock::starting_at(start));
        let time_sync = Arc::new(TimeSync::new(clock.clone()));
        let attributes = Arc::new(AttributeCell::new(ResponseAttributes::with_defaults(
            config.server_id,
        )));
        let sessions = SessionContext::with_ids(
            Arc::new(config),
            Arc::clone(&time_sync),
            Arc::clone(&attributes),
            SessionIdProvider::with_offset(0),
        );
        Self {
            clock,
            time_sync,
            attributes,
            sessions,
        }
    }
}
