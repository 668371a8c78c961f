//! Web request tracing with the correlation tag handed to outgoing requests.

use crate::beacon::{Beacon, Stamp};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
struct TracerState {
    start: Stamp,
    stopped: bool,
    bytes_sent: Option<u64>,
    bytes_received: Option<u64>,
}

/// Traces a single outgoing web request.
///
/// The [`tag`](Self::tag) is meant to travel with the request so that the
/// server side can correlate it. Stopping records the request; later calls
/// are ignored.
pub struct WebRequestTracer {
    beacon: Arc<Beacon>,
    parent_id: i32,
    url: String,
    tag: String,
    state: Mutex<TracerState>,
}

impl WebRequestTracer {
    pub(crate) fn start_new(beacon: Arc<Beacon>, parent_id: i32, url: &str) -> Self {
        let start = beacon.mark();
        let tag = beacon.web_request_tag(parent_id, start.sequence);
        Self {
            beacon,
            parent_id,
            url: strip_query(url).to_string(),
            tag,
            state: Mutex::new(TracerState {
                start,
                stopped: false,
                bytes_sent: None,
                bytes_received: None,
            }),
        }
    }

    /// A tracer that never records anything.
    pub(crate) fn detached(beacon: Arc<Beacon>, url: &str) -> Self {
        Self {
            beacon,
            parent_id: 0,
            url: strip_query(url).to_string(),
            tag: String::new(),
            state: Mutex::new(TracerState {
                start: Stamp {
                    sequence: 0,
                    timestamp: 0,
                },
                stopped: true,
                bytes_sent: None,
                bytes_received: None,
            }),
        }
    }

    /// Correlation tag, empty for detached tracers.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Traced URL without its query string.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Id of the enclosing action, 0 if traced on the session.
    pub fn parent_id(&self) -> i32 {
        self.parent_id
    }

    /// Whether the request was stopped.
    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Restarts timing, e.g. when the tracer was created ahead of sending.
    pub fn start(&self) -> &Self {
        let mut state = self.state.lock();
        if !state.stopped {
            state.start = self.beacon.mark();
        }
        self
    }

    /// Sets the number of bytes sent.
    pub fn set_bytes_sent(&self, bytes: u64) -> &Self {
        let mut state = self.state.lock();
        if !state.stopped {
            state.bytes_sent = Some(bytes);
        }
        self
    }

    /// Sets the number of bytes received.
    pub fn set_bytes_received(&self, bytes: u64) -> &Self {
        let mut state = self.state.lock();
        if !state.stopped {
            state.bytes_received = Some(bytes);
        }
        self
    }

    /// Stops the request and records it with the given response code.
    pub fn stop(&self, response_code: Option<i32>) {
        let mut state = self.state.lock();
        if state.stopped {
            debug!(url = %self.url, "web request already stopped");
            return;
        }
        state.stopped = true;
        self.beacon.add_web_request(
            self.parent_id,
            &self.url,
            state.start,
            state.bytes_sent,
            state.bytes_received,
            response_code,
        );
    }
}

impl std::fmt::Debug for WebRequestTracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRequestTracer")
            .field("url", &self.url)
            .field("parent_id", &self.parent_id)
            .field("tag", &self.tag)
            .finish()
    }
}

fn strip_query(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}
