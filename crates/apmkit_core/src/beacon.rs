//! Per-session recorder: sequence numbers, capture gating and chunking.

use crate::attributes::AttributeCell;
use crate::buffer::BeaconBuffer;
use crate::config::AgentConfig;
use crate::encoder::BeaconEncoder;
use crate::event::{EventRecord, RecordKind, Value};
use crate::ids::current_thread_id;
use crate::time_sync::TimeSync;
use apmkit_protocol::keys::PROTOCOL_VERSION;
use apmkit_protocol::percent_encode_with;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tracing::warn;

/// A sequence number together with the local time it was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    /// Sequence number.
    pub sequence: i32,
    /// Local timestamp in ms.
    pub timestamp: i64,
}

#[derive(Debug, Default)]
struct BeaconState {
    buffer: BeaconBuffer,
    next_sequence: i32,
}

impl BeaconState {
    fn stamp(&mut self, time_sync: &TimeSync) -> Stamp {
        self.next_sequence += 1;
        Stamp {
            sequence: self.next_sequence,
            timestamp: time_sync.now(),
        }
    }
}

/// Records the telemetry of one session.
///
/// Producers append from any thread; the sending engine drains chunks from
/// its single background thread. Sequence numbers and timestamps are taken
/// under the same lock as the append, so both are strictly ordered with
/// the buffer.
pub struct Beacon {
    session_number: i32,
    client_ip: Option<String>,
    session_start: i64,
    device_id: i64,
    application_id: String,
    max_buffered_bytes: usize,
    encoder: BeaconEncoder,
    time_sync: Arc<TimeSync>,
    attributes: Arc<AttributeCell>,
    next_action_id: AtomicI32,
    state: Mutex<BeaconState>,
}

impl Beacon {
    /// Creates a beacon and records the session start.
    pub fn new(
        config: &AgentConfig,
        session_number: i32,
        client_ip: Option<&str>,
        time_sync: Arc<TimeSync>,
        attributes: Arc<AttributeCell>,
    ) -> Self {
        let session_start = time_sync.now();
        let beacon = Self {
            session_number,
            client_ip: client_ip.map(str::to_string),
            session_start,
            device_id: config.numeric_device_id(),
            application_id: config.application_id.clone(),
            max_buffered_bytes: config.max_buffered_bytes,
            encoder: BeaconEncoder::new(config, session_number, client_ip),
            time_sync,
            attributes,
            next_action_id: AtomicI32::new(0),
            state: Mutex::new(BeaconState::default()),
        };
        beacon.append_event(0, RecordKind::SessionStart);
        beacon
    }

    /// Session number.
    pub fn session_number(&self) -> i32 {
        self.session_number
    }

    /// Client IP reported for this session.
    pub fn client_ip(&self) -> Option<&str> {
        self.client_ip.as_deref()
    }

    /// Local session start time in ms.
    pub fn session_start(&self) -> i64 {
        self.session_start
    }

    /// Milliseconds elapsed since the session started.
    pub fn time_since_session_start(&self) -> i64 {
        self.time_sync.now().saturating_sub(self.session_start).max(0)
    }

    /// Allocates a session-scoped action id.
    pub fn create_action_id(&self) -> i32 {
        self.next_action_id.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Takes a sequence number and timestamp without recording anything.
    pub fn mark(&self) -> Stamp {
        self.state.lock().stamp(&self.time_sync)
    }

    fn append_with(&self, record: impl FnOnce(Stamp, u32) -> EventRecord, capture: bool) -> Stamp {
        let thread_id = current_thread_id();
        let mut state = self.state.lock();
        let stamp = state.stamp(&self.time_sync);
        if capture {
            let record = record(stamp, thread_id);
            let encoded = BeaconEncoder::encode_record(&record, self.session_start);
            let evicted = state.buffer.push(record, encoded, self.max_buffered_bytes);
            if evicted > 0 {
                warn!(
                    session = self.session_number,
                    evicted, "beacon buffer full, dropped oldest records"
                );
            }
        }
        stamp
    }

    fn append_event(&self, parent_action_id: i32, kind: RecordKind) -> Stamp {
        let capture = self.attributes.is_capture_on();
        self.append_with(
            |stamp, thread_id| EventRecord {
                thread_id,
                parent_action_id,
                sequence: stamp.sequence,
                timestamp: stamp.timestamp,
                kind,
            },
            capture,
        )
    }

    /// Records a completed action and returns its end stamp.
    pub fn add_action(
        &self,
        id: i32,
        name: &str,
        parent_action_id: i32,
        start: Stamp,
        child_duration: i64,
    ) -> Stamp {
        let capture = self.attributes.is_capture_on();
        self.append_with(
            |end, thread_id| EventRecord {
                thread_id,
                parent_action_id,
                sequence: start.sequence,
                timestamp: start.timestamp,
                kind: RecordKind::Action {
                    id,
                    name: name.to_string(),
                    end_sequence: end.sequence,
                    end_time: end.timestamp,
                    child_duration,
                },
            },
            capture,
        )
    }

    /// Records a completed web request.
    pub fn add_web_request(
        &self,
        parent_action_id: i32,
        url: &str,
        start: Stamp,
        bytes_sent: Option<u64>,
        bytes_received: Option<u64>,
        response_code: Option<i32>,
    ) -> Stamp {
        let capture = self.attributes.is_capture_on();
        self.append_with(
            |end, thread_id| EventRecord {
                thread_id,
                parent_action_id,
                sequence: start.sequence,
                timestamp: start.timestamp,
                kind: RecordKind::WebRequest {
                    url: url.to_string(),
                    end_sequence: end.sequence,
                    end_time: end.timestamp,
                    bytes_sent,
                    bytes_received,
                    response_code,
                },
            },
            capture,
        )
    }

    /// Records a named event.
    pub fn report_event(&self, parent_action_id: i32, name: &str) {
        self.append_event(
            parent_action_id,
            RecordKind::NamedEvent {
                name: name.to_string(),
            },
        );
    }

    /// Records a value.
    pub fn report_value(&self, parent_action_id: i32, name: &str, value: Value) {
        self.append_event(
            parent_action_id,
            RecordKind::Value {
                name: name.to_string(),
                value,
            },
        );
    }

    /// Records an error, unless error capturing is off.
    pub fn report_error(&self, parent_action_id: i32, name: &str, code: i32, reason: &str) {
        let attrs = self.attributes.load();
        let capture = attrs.is_capture_on() && attrs.capture_errors();
        self.append_with(
            |stamp, thread_id| EventRecord {
                thread_id,
                parent_action_id,
                sequence: stamp.sequence,
                timestamp: stamp.timestamp,
                kind: RecordKind::Error {
                    name: name.to_string(),
                    code,
                    reason: reason.to_string(),
                },
            },
            capture,
        );
    }

    /// Records a crash, unless crash capturing is off.
    pub fn report_crash(&self, name: &str, reason: &str, stacktrace: &str) {
        let attrs = self.attributes.load();
        let capture = attrs.is_capture_on() && attrs.capture_crashes();
        self.append_with(
            |stamp, thread_id| EventRecord {
                thread_id,
                parent_action_id: 0,
                sequence: stamp.sequence,
                timestamp: stamp.timestamp,
                kind: RecordKind::Crash {
                    name: name.to_string(),
                    reason: reason.to_string(),
                    stacktrace: stacktrace.to_string(),
                },
            },
            capture,
        );
    }

    /// Records a user identification.
    pub fn identify_user(&self, tag: &str) {
        self.append_event(0, RecordKind::IdentifyUser { tag: tag.to_string() });
    }

    /// Records the session end.
    pub fn end_session(&self) {
        self.append_event(0, RecordKind::SessionEnd);
    }

    /// Correlation tag for a web request started at `sequence`.
    pub fn web_request_tag(&self, parent_action_id: i32, sequence: i32) -> String {
        format!(
            "MT_{}_{}_{}_{}_{}_{}_{}_{}",
            PROTOCOL_VERSION,
            self.attributes.load().server_id(),
            self.device_id,
            self.session_number,
            percent_encode_with(&self.application_id, b"_"),
            parent_action_id,
            current_thread_id(),
            sequence
        )
    }

    /// Stages and returns the next chunk to deliver, `None` if empty.
    pub fn next_chunk(&self) -> Option<String> {
        let attrs = self.attributes.load();
        let ts = &self.time_sync;
        let header = self.encoder.header(
            attrs.multiplicity(),
            ts.to_cluster_time(self.session_start),
            ts.last_sync_time().map(|at| ts.to_cluster_time(at)),
            ts.cluster_now(),
        );
        self.state
            .lock()
            .buffer
            .stage_chunk(&header, attrs.max_beacon_size())
    }

    /// Drops the staged chunk after a confirmed send.
    pub fn confirm_chunk(&self) {
        self.state.lock().buffer.confirm_chunk();
    }

    /// Puts the staged chunk back after a failed send.
    pub fn reset_chunk(&self) {
        self.state.lock().buffer.reset_chunk();
    }

    /// Discards all buffered records without sending them.
    pub fn clear(&self) {
        self.state.lock().buffer.clear();
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.state.lock().buffer.is_empty()
    }

    /// Number of buffered records.
    pub fn len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    /// Snapshot of the buffered records in order.
    pub fn records(&self) -> Vec<EventRecord> {
        self.state.lock().buffer.records()
    }
}

impl std::fmt::Debug for Beacon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Beacon")
            .field("session_number", &self.session_number)
            .field("session_start", &self.session_start)
            .field("records", &self.len())
            .finish()
    }
}
