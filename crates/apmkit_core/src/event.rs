//! Event records buffered per session.

use apmkit_protocol::EventType;

/// A reported value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Double(f64),
    /// String value.
    Text(String),
}

/// Variant-specific part of a record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordKind {
    /// Session start.
    SessionStart,
    /// Session end.
    SessionEnd,
    /// A completed action. The record's sequence and timestamp are the
    /// action's start.
    Action {
        /// Action id.
        id: i32,
        /// Action name.
        name: String,
        /// End sequence number.
        end_sequence: i32,
        /// End timestamp (local ms).
        end_time: i64,
        /// Accumulated duration of child actions in ms.
        child_duration: i64,
    },
    /// A named event.
    NamedEvent {
        /// Event name.
        name: String,
    },
    /// A reported value.
    Value {
        /// Value name.
        name: String,
        /// The value.
        value: Value,
    },
    /// A reported error.
    Error {
        /// Error name.
        name: String,
        /// Error code.
        code: i32,
        /// Error reason.
        reason: String,
    },
    /// A reported crash.
    Crash {
        /// Crash name.
        name: String,
        /// Crash reason.
        reason: String,
        /// Stack trace.
        stacktrace: String,
    },
    /// A traced web request. The record's sequence and timestamp are the
    /// request's start.
    WebRequest {
        /// Request URL.
        url: String,
        /// End sequence number.
        end_sequence: i32,
        /// End timestamp (local ms).
        end_time: i64,
        /// Bytes sent, if known.
        bytes_sent: Option<u64>,
        /// Bytes received, if known.
        bytes_received: Option<u64>,
        /// Response code, if known.
        response_code: Option<i32>,
    },
    /// A user identification.
    IdentifyUser {
        /// User tag.
        tag: String,
    },
}

/// One immutable entry of a session's beacon buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    /// Id of the producing thread.
    pub thread_id: u32,
    /// Id of the owning action, 0 for session-level records.
    pub parent_action_id: i32,
    /// Sequence number.
    pub sequence: i32,
    /// Local timestamp in ms.
    pub timestamp: i64,
    /// Variant data.
    pub kind: RecordKind,
}

impl EventRecord {
    /// Wire event type of this record.
    pub fn event_type(&self) -> EventType {
        match &self.kind {
            RecordKind::SessionStart => EventType::SessionStart,
            RecordKind::SessionEnd => EventType::SessionEnd,
            RecordKind::Action { .. } => EventType::Action,
            RecordKind::NamedEvent { .. } => EventType::NamedEvent,
            RecordKind::Value { value, .. } => match value {
                Value::Int(_) => EventType::IntValue,
                Value::Double(_) => EventType::DoubleValue,
                Value::Text(_) => EventType::StringValue,
            },
            RecordKind::Error { .. } => EventType::Error,
            RecordKind::Crash { .. } => EventType::Crash,
            RecordKind::WebRequest { .. } => EventType::WebRequest,
            RecordKind::IdentifyUser { .. } => EventType::IdentifyUser,
        }
    }
}
