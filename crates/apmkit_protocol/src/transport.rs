//! Transport contract between the sending engine and the collector.

use crate::response::Response;

/// Parameters of a status request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRequest {
    /// Server id the request is addressed to.
    pub server_id: i32,
}

/// Parameters of a time-sync request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSyncRequest {
    /// Server id the request is addressed to.
    pub server_id: i32,
}

/// One beacon chunk to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconRequest<'a> {
    /// Server id the request is addressed to.
    pub server_id: i32,
    /// Session number the chunk belongs to.
    pub session_number: i32,
    /// Client IP reported for the session, if any.
    pub client_ip: Option<&'a str>,
    /// Encoded chunk.
    pub payload: &'a [u8],
}

/// A beacon transport handles network communication with the collector.
///
/// Every call performs one round trip. Failures (connection errors,
/// timeouts, undecodable bodies) are reported as erroneous
/// [`Response`]s instead of errors, so callers only branch on
/// [`Response::is_erroneous`].
pub trait BeaconTransport: Send + Sync {
    /// Asks the collector for the current attributes.
    fn send_status_request(&self, request: &StatusRequest) -> Response;

    /// Performs one time-sync exchange.
    fn send_time_sync_request(&self, request: &TimeSyncRequest) -> Response;

    /// Delivers one beacon chunk.
    fn send_beacon_request(&self, request: &BeaconRequest<'_>) -> Response;
}
