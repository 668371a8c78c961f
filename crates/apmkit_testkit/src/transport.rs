//! Scripted transport that replays queued responses.

use apmkit_protocol::{
    AttributeUpdate, BeaconRequest, BeaconTransport, Response, StatusRequest, TimeSyncRequest,
};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// A recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    /// Status request.
    Status {
        /// Addressed server id.
        server_id: i32,
    },
    /// Time-sync request.
    TimeSync {
        /// Addressed server id.
        server_id: i32,
    },
    /// Beacon request.
    Beacon {
        /// Addressed server id.
        server_id: i32,
        /// Session the chunk belongs to.
        session_number: i32,
        /// Client IP header value.
        client_ip: Option<String>,
        /// Delivered chunk.
        payload: String,
    },
}

impl TransportCall {
    /// Returns the payload of a beacon call.
    pub fn payload(&self) -> Option<&str> {
        match self {
            TransportCall::Beacon { payload, .. } => Some(payload),
            _ => None,
        }
    }

    /// Returns true for status calls.
    pub fn is_status(&self) -> bool {
        matches!(self, TransportCall::Status { .. })
    }

    /// Returns true for time-sync calls.
    pub fn is_time_sync(&self) -> bool {
        matches!(self, TransportCall::TimeSync { .. })
    }

    /// Returns true for beacon calls.
    pub fn is_beacon(&self) -> bool {
        matches!(self, TransportCall::Beacon { .. })
    }
}

#[derive(Debug)]
struct Script {
    queued: VecDeque<Response>,
    fallback: Response,
}

impl Script {
    fn new(fallback: Response) -> Self {
        Self {
            queued: VecDeque::new(),
            fallback,
        }
    }

    fn next(&mut self) -> Response {
        self.queued
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// A transport for tests.
///
/// Each request kind has its own queue; once a queue runs dry the kind's
/// fallback response is returned. Fallbacks: status and beacon requests
/// succeed with no attribute changes, time-sync requests fail.
#[derive(Debug)]
pub struct ScriptedTransport {
    status: Mutex<Script>,
    time_sync: Mutex<Script>,
    beacon: Mutex<Script>,
    calls: Mutex<Vec<TransportCall>>,
}

impl ScriptedTransport {
    /// Creates a transport with the default fallbacks.
    pub fn new() -> Self {
        Self {
            status: Mutex::new(Script::new(Response::status(200, AttributeUpdate::new()))),
            time_sync: Mutex::new(Script::new(Response::error(500))),
            beacon: Mutex::new(Script::new(Response::status(200, AttributeUpdate::new()))),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Sets the status fallback.
    pub fn with_status_fallback(self, response: Response) -> Self {
        self.status.lock().fallback = response;
        self
    }

    /// Sets the time-sync fallback.
    pub fn with_time_sync_fallback(self, response: Response) -> Self {
        self.time_sync.lock().fallback = response;
        self
    }

    /// Sets the beacon fallback.
    pub fn with_beacon_fallback(self, response: Response) -> Self {
        self.beacon.lock().fallback = response;
        self
    }

    /// Queues a status response.
    pub fn push_status(&self, response: Response) {
        self.status.lock().queued.push_back(response);
    }

    /// Queues a time-sync response.
    pub fn push_time_sync(&self, response: Response) {
        self.time_sync.lock().queued.push_back(response);
    }

    /// Queues a beacon response.
    pub fn push_beacon(&self, response: Response) {
        self.beacon.lock().queued.push_back(response);
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    /// Total number of calls.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Number of status calls.
    pub fn status_count(&self) -> usize {
        self.calls.lock().iter().filter(|c| c.is_status()).count()
    }

    /// Number of time-sync calls.
    pub fn time_sync_count(&self) -> usize {
        self.calls.lock().iter().filter(|c| c.is_time_sync()).count()
    }

    /// Payloads of every beacon call, in order.
    pub fn beacon_payloads(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| c.payload().map(str::to_string))
            .collect()
    }

    /// Forgets the recorded calls.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().push(call);
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl BeaconTransport for ScriptedTransport {
    fn send_status_request(&self, request: &StatusRequest) -> Response {
        self.record(TransportCall::Status {
            server_id: request.server_id,
        });
        self.status.lock().next()
    }

    fn send_time_sync_request(&self, request: &TimeSyncRequest) -> Response {
        self.record(TransportCall::TimeSync {
            server_id: request.server_id,
        });
        self.time_sync.lock().next()
    }

    fn send_beacon_request(&self, request: &BeaconRequest<'_>) -> Response {
        self.record(TransportCall::Beacon {
            server_id: request.server_id,
            session_number: request.session_number,
            client_ip: request.client_ip.map(str::to_string),
            payload: String::from_utf8_lossy(request.payload).into_owned(),
        });
        self.beacon.lock().next()
    }
}
