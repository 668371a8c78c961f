//! Wire keys and protocol constants of the beacon format.
//!
//! Keys are short ASCII tokens. Header keys appear once per delivered
//! chunk, record keys once per buffered event.

/// Beacon protocol version.
pub const PROTOCOL_VERSION: u32 = 3;

/// Agent version reported to the collector.
pub const AGENT_VERSION: &str = "0.3.0";

/// Default agent technology type.
pub const DEFAULT_TECHNOLOGY_TYPE: &str = "okrust";

/// Default platform type.
pub const DEFAULT_PLATFORM_TYPE: u32 = 1;

/// Separator between tokens.
pub const TOKEN_SEPARATOR: char = '&';

/// Separator between a key and its value.
pub const KEY_VALUE_SEPARATOR: char = '=';

// Header
/// Protocol version.
pub const PROTOCOL_VERSION_KEY: &str = "vv";
/// Agent version.
pub const AGENT_VERSION_KEY: &str = "va";
/// Application id.
pub const APPLICATION_ID: &str = "ap";
/// Application name.
pub const APPLICATION_NAME: &str = "an";
/// Application version.
pub const APPLICATION_VERSION: &str = "vn";
/// Platform type.
pub const PLATFORM_TYPE: &str = "pt";
/// Agent technology type.
pub const TECHNOLOGY_TYPE: &str = "tt";
/// Device (visitor) id.
pub const DEVICE_ID: &str = "vi";
/// Session number.
pub const SESSION_NUMBER: &str = "sn";
/// Client IP address.
pub const CLIENT_IP: &str = "ip";
/// Device operating system.
pub const DEVICE_OS: &str = "os";
/// Device manufacturer.
pub const DEVICE_MANUFACTURER: &str = "mf";
/// Device model.
pub const DEVICE_MODEL: &str = "md";
/// Multiplicity.
pub const MULTIPLICITY: &str = "mp";
/// Session start time in cluster time.
pub const SESSION_START_TIME: &str = "tv";
/// Time of the last time sync, present once the cluster offset is known.
pub const TIME_SYNC_TIME: &str = "ts";
/// Transmission time in cluster time.
pub const TRANSMISSION_TIME: &str = "tx";

// Records
/// Event type.
pub const EVENT_TYPE: &str = "et";
/// Event or action name.
pub const NAME: &str = "na";
/// Producing thread id.
pub const THREAD_ID: &str = "it";
/// Action id.
pub const ACTION_ID: &str = "ca";
/// Parent action id.
pub const PARENT_ACTION_ID: &str = "pa";
/// Start sequence number.
pub const START_SEQUENCE_NUMBER: &str = "s0";
/// Start time relative to session start.
pub const TIME_0: &str = "t0";
/// End sequence number.
pub const END_SEQUENCE_NUMBER: &str = "s1";
/// Duration.
pub const TIME_1: &str = "t1";
/// Accumulated duration of child actions.
pub const CHILD_DURATION: &str = "ct";
/// Reported value.
pub const VALUE: &str = "vl";
/// Error code.
pub const ERROR_CODE: &str = "ev";
/// Error or crash reason.
pub const REASON: &str = "rs";
/// Crash stack trace.
pub const STACKTRACE: &str = "st";
/// Web request bytes sent.
pub const BYTES_SENT: &str = "bs";
/// Web request bytes received.
pub const BYTES_RECEIVED: &str = "br";
/// Web request response code.
pub const RESPONSE_CODE: &str = "rc";

// Status responses
/// Response type marker.
pub const RESPONSE_TYPE: &str = "type";
/// Status response type value.
pub const RESPONSE_TYPE_STATUS: &str = "m";
/// Time-sync response type value.
pub const RESPONSE_TYPE_TIME_SYNC: &str = "mts";
/// Capture flag.
pub const RESPONSE_CAPTURE: &str = "cp";
/// Capture errors flag.
pub const RESPONSE_CAPTURE_ERRORS: &str = "er";
/// Capture crashes flag.
pub const RESPONSE_CAPTURE_CRASHES: &str = "cr";
/// Multiplicity.
pub const RESPONSE_MULTIPLICITY: &str = "mp";
/// Server id.
pub const RESPONSE_SERVER_ID: &str = "id";
/// Max beacon size in KiB.
pub const RESPONSE_MAX_BEACON_SIZE: &str = "bl";
/// Send interval in seconds.
pub const RESPONSE_SEND_INTERVAL: &str = "si";
/// Time sync support flag.
pub const RESPONSE_TIME_SYNC_SUPPORTED: &str = "tsy";
/// Collector receive time of a time-sync request.
pub const RESPONSE_REQUEST_RECEIVE_TIME: &str = "t1";
/// Collector send time of a time-sync response.
pub const RESPONSE_RESPONSE_SEND_TIME: &str = "t2";

// Request query parameters
/// Request type.
pub const REQUEST_TYPE: &str = "type";
/// Status / beacon request type value.
pub const REQUEST_TYPE_MONITOR: &str = "m";
/// Time-sync request type value.
pub const REQUEST_TYPE_TIME_SYNC: &str = "mts";
/// Server id.
pub const REQUEST_SERVER_ID: &str = "srvid";
/// Application id.
pub const REQUEST_APPLICATION_ID: &str = "app";
/// Agent version.
pub const REQUEST_AGENT_VERSION: &str = "va";
/// Platform type.
pub const REQUEST_PLATFORM_TYPE: &str = "pt";
/// Agent technology type.
pub const REQUEST_TECHNOLOGY_TYPE: &str = "tt";

/// Header carrying the client IP on beacon requests.
pub const CLIENT_IP_HEADER: &str = "X-Client-IP";
/// Rate-limiting header, value in seconds.
pub const RETRY_AFTER_HEADER: &str = "Retry-After";

/// Event type codes carried in the `et` token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// A completed action.
    Action,
    /// A named event.
    NamedEvent,
    /// A string value.
    StringValue,
    /// An integer value.
    IntValue,
    /// A double value.
    DoubleValue,
    /// Session start.
    SessionStart,
    /// Session end.
    SessionEnd,
    /// A traced web request.
    WebRequest,
    /// An error.
    Error,
    /// A crash.
    Crash,
    /// A user identification.
    IdentifyUser,
}

impl EventType {
    /// Returns the wire code.
    pub fn code(&self) -> u32 {
        match self {
            EventType::Action => 1,
            EventType::NamedEvent => 10,
            EventType::StringValue => 11,
            EventType::IntValue => 12,
            EventType::DoubleValue => 13,
            EventType::SessionStart => 18,
            EventType::SessionEnd => 19,
            EventType::WebRequest => 30,
            EventType::Error => 40,
            EventType::Crash => 50,
            EventType::IdentifyUser => 60,
        }
    }

    /// Looks up an event type by its wire code.
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => EventType::Action,
            10 => EventType::NamedEvent,
            11 => EventType::StringValue,
            12 => EventType::IntValue,
            13 => EventType::DoubleValue,
            18 => EventType::SessionStart,
            19 => EventType::SessionEnd,
            30 => EventType::WebRequest,
            40 => EventType::Error,
            50 => EventType::Crash,
            60 => EventType::IdentifyUser,
            _ => return None,
        })
    }
}
