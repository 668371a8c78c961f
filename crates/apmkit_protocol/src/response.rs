//! Collector responses and their decoding.
//!
//! Status bodies arrive either as a legacy key-value query string
//! (`type=m&cp=1&mp=1...`) or as a JSON document. Both decode into the
//! same [`AttributeUpdate`].

use crate::attributes::AttributeUpdate;
use crate::error::{ProtocolError, ProtocolResult};
use crate::keys;
use serde_json::Value;
use std::time::Duration;

/// HTTP status code signalling rate limiting.
pub const TOO_MANY_REQUESTS: u16 = 429;

/// Timestamps returned by a time-sync exchange, in collector milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSyncTimestamps {
    /// When the collector received the request.
    pub request_receive_time: i64,
    /// When the collector sent the response.
    pub response_send_time: i64,
}

/// The result of one transport round trip.
///
/// An erroneous response never carries attributes; callers check
/// [`Response::is_erroneous`] before reading them.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    code: u16,
    erroneous: bool,
    attributes: Option<AttributeUpdate>,
    time_sync: Option<TimeSyncTimestamps>,
    retry_after: Option<Duration>,
}

impl Response {
    /// Creates a successful status response.
    pub fn status(code: u16, attributes: AttributeUpdate) -> Self {
        Self {
            code,
            erroneous: false,
            attributes: Some(attributes),
            time_sync: None,
            retry_after: None,
        }
    }

    /// Creates a successful time-sync response.
    pub fn time_sync(code: u16, timestamps: TimeSyncTimestamps) -> Self {
        Self {
            code,
            erroneous: false,
            attributes: None,
            time_sync: Some(timestamps),
            retry_after: None,
        }
    }

    /// Creates an erroneous response with the given status code.
    pub fn error(code: u16) -> Self {
        Self {
            code,
            erroneous: true,
            attributes: None,
            time_sync: None,
            retry_after: None,
        }
    }

    /// Creates the response reported for connection errors and timeouts.
    pub fn transport_failure() -> Self {
        Self::error(0)
    }

    /// Creates a rate-limiting response.
    pub fn too_many_requests(retry_after: Option<Duration>) -> Self {
        Self::error(TOO_MANY_REQUESTS).with_retry_after(retry_after)
    }

    /// Sets the retry-after hint.
    #[must_use]
    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Builds a response from a raw status (or beacon) reply.
    ///
    /// Codes of 400 and above, as well as undecodable bodies, produce an
    /// erroneous response.
    pub fn from_status_body(code: u16, body: &str, retry_after: Option<Duration>) -> Self {
        if code >= 400 {
            return Self::error(code).with_retry_after(retry_after);
        }
        match parse_status_body(body) {
            Ok(update) => Self::status(code, update).with_retry_after(retry_after),
            Err(_) => Self::error(code),
        }
    }

    /// Builds a response from a raw time-sync reply.
    pub fn from_time_sync_body(code: u16, body: &str, retry_after: Option<Duration>) -> Self {
        if code >= 400 {
            return Self::error(code).with_retry_after(retry_after);
        }
        match parse_time_sync_body(body) {
            Ok(timestamps) => Self::time_sync(code, timestamps),
            Err(_) => Self::error(code),
        }
    }

    /// HTTP status code, 0 when no response was received.
    pub fn code(&self) -> u16 {
        self.code
    }

    /// Whether the round trip failed.
    pub fn is_erroneous(&self) -> bool {
        self.erroneous
    }

    /// Whether the collector rate-limited the request.
    pub fn is_too_many_requests(&self) -> bool {
        self.code == TOO_MANY_REQUESTS
    }

    /// Decoded attributes, absent on erroneous responses.
    pub fn attributes(&self) -> Option<&AttributeUpdate> {
        if self.erroneous {
            None
        } else {
            self.attributes.as_ref()
        }
    }

    /// Time-sync timestamps, absent on erroneous responses.
    pub fn time_sync_timestamps(&self) -> Option<TimeSyncTimestamps> {
        if self.erroneous {
            None
        } else {
            self.time_sync
        }
    }

    /// The retry-after hint, or `default` when the collector sent none.
    pub fn retry_after_or(&self, default: Duration) -> Duration {
        self.retry_after.unwrap_or(default)
    }
}

/// Parses a `Retry-After` header value given in seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Decodes a status body in either encoding.
pub fn parse_status_body(body: &str) -> ProtocolResult<AttributeUpdate> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(ProtocolError::EmptyBody);
    }
    if trimmed.starts_with('{') {
        parse_json_status(trimmed)
    } else {
        parse_key_value_status(trimmed)
    }
}

/// Decodes a key-value time-sync body (`type=mts&t1=..&t2=..`).
pub fn parse_time_sync_body(body: &str) -> ProtocolResult<TimeSyncTimestamps> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(ProtocolError::EmptyBody);
    }

    let mut receive = None;
    let mut send = None;
    for (key, value) in url::form_urlencoded::parse(trimmed.as_bytes()) {
        match key.as_ref() {
            keys::RESPONSE_TYPE => expect_type(&value, keys::RESPONSE_TYPE_TIME_SYNC)?,
            keys::RESPONSE_REQUEST_RECEIVE_TIME => receive = Some(parse_number::<i64>(&key, &value)?),
            keys::RESPONSE_RESPONSE_SEND_TIME => send = Some(parse_number::<i64>(&key, &value)?),
            _ => {}
        }
    }

    Ok(TimeSyncTimestamps {
        request_receive_time: receive
            .ok_or(ProtocolError::MissingField(keys::RESPONSE_REQUEST_RECEIVE_TIME))?,
        response_send_time: send
            .ok_or(ProtocolError::MissingField(keys::RESPONSE_RESPONSE_SEND_TIME))?,
    })
}

fn parse_key_value_status(body: &str) -> ProtocolResult<AttributeUpdate> {
    let mut update = AttributeUpdate::new();
    for (key, value) in url::form_urlencoded::parse(body.as_bytes()) {
        match key.as_ref() {
            keys::RESPONSE_TYPE => expect_type(&value, keys::RESPONSE_TYPE_STATUS)?,
            keys::RESPONSE_CAPTURE => update.capture = Some(parse_flag(&key, &value)?),
            keys::RESPONSE_CAPTURE_ERRORS => {
                update.capture_errors = Some(parse_flag(&key, &value)?)
            }
            keys::RESPONSE_CAPTURE_CRASHES => {
                update.capture_crashes = Some(parse_flag(&key, &value)?)
            }
            keys::RESPONSE_MULTIPLICITY => update.multiplicity = Some(parse_number(&key, &value)?),
            keys::RESPONSE_SERVER_ID => update.server_id = Some(parse_number(&key, &value)?),
            keys::RESPONSE_MAX_BEACON_SIZE => {
                let kib: usize = parse_number(&key, &value)?;
                update.max_beacon_size = Some(kib_to_bytes(&key, kib)?);
            }
            keys::RESPONSE_SEND_INTERVAL => {
                let secs: u64 = parse_number(&key, &value)?;
                update.send_interval = Some(Duration::from_secs(secs));
            }
            keys::RESPONSE_TIME_SYNC_SUPPORTED => {
                update.time_sync_supported = Some(parse_flag(&key, &value)?)
            }
            _ => {}
        }
    }
    Ok(update)
}

fn parse_json_status(body: &str) -> ProtocolResult<AttributeUpdate> {
    let root: Value = serde_json::from_str(body)?;
    let root = root
        .as_object()
        .ok_or_else(|| ProtocolError::Json("expected object at top level".into()))?;

    let mut update = AttributeUpdate::new();

    if let Some(agent) = section(root, "mobileAgentConfig")? {
        if let Some(kib) = json_number(agent, "maxBeaconSizeKb")? {
            let kib = usize::try_from(kib)
                .map_err(|_| ProtocolError::invalid_value("maxBeaconSizeKb", kib.to_string()))?;
            update.max_beacon_size = Some(kib_to_bytes("maxBeaconSizeKb", kib)?);
        }
        if let Some(secs) = json_number(agent, "sendIntervalSec")? {
            update.send_interval = Some(Duration::from_secs(secs));
        }
    }

    if let Some(app) = section(root, "appConfig")? {
        update.capture = json_flag(app, "capture")?;
        update.capture_errors = json_flag(app, "reportErrors")?;
        update.capture_crashes = json_flag(app, "reportCrashes")?;
    }

    if let Some(dynamic) = section(root, "dynamicConfig")? {
        if let Some(mp) = json_number(dynamic, "multiplicity")? {
            update.multiplicity = Some(
                u32::try_from(mp).map_err(|_| ProtocolError::invalid_value("multiplicity", mp.to_string()))?,
            );
        }
        if let Some(id) = json_number(dynamic, "serverId")? {
            update.server_id = Some(
                i32::try_from(id).map_err(|_| ProtocolError::invalid_value("serverId", id.to_string()))?,
            );
        }
        update.time_sync_supported = json_flag(dynamic, "timeSyncSupported")?;
    }

    Ok(update)
}

type JsonObject = serde_json::Map<String, Value>;

fn section<'a>(root: &'a JsonObject, name: &str) -> ProtocolResult<Option<&'a JsonObject>> {
    match root.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(other) => Err(ProtocolError::invalid_value(name, other.to_string())),
    }
}

fn json_number(object: &JsonObject, key: &str) -> ProtocolResult<Option<u64>> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .map(Some)
            .ok_or_else(|| ProtocolError::invalid_value(key, value.to_string())),
    }
}

fn json_flag(object: &JsonObject, key: &str) -> ProtocolResult<Option<bool>> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(flag)) => Ok(Some(*flag)),
        Some(Value::Number(n)) if n.as_u64() == Some(0) => Ok(Some(false)),
        Some(Value::Number(n)) if n.as_u64() == Some(1) => Ok(Some(true)),
        Some(other) => Err(ProtocolError::invalid_value(key, other.to_string())),
    }
}

fn expect_type(actual: &str, expected: &'static str) -> ProtocolResult<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(ProtocolError::UnexpectedType {
            expected,
            actual: actual.to_string(),
        })
    }
}

fn parse_flag(key: &str, value: &str) -> ProtocolResult<bool> {
    match value {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(ProtocolError::invalid_value(key, value)),
    }
}

fn kib_to_bytes(key: &str, kib: usize) -> ProtocolResult<usize> {
    kib.checked_mul(1024)
        .ok_or_else(|| ProtocolError::invalid_value(key, kib.to_string()))
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> ProtocolResult<T> {
    value
        .parse::<T>()
        .map_err(|_| ProtocolError::invalid_value(key, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::ResponseAttributes;

    #[test]
    fn key_value_status_body() {
        let update =
            parse_status_body("type=m&cp=1&er=0&cr=1&mp=2&id=5&bl=64&si=30&tsy=1").unwrap();
        assert_eq!(update.capture, Some(true));
        assert_eq!(update.capture_errors, Some(false));
        assert_eq!(update.capture_crashes, Some(true));
        assert_eq!(update.multiplicity, Some(2));
        assert_eq!(update.server_id, Some(5));
        assert_eq!(update.max_beacon_size, Some(64 * 1024));
        assert_eq!(update.send_interval, Some(Duration::from_secs(30)));
        assert_eq!(update.time_sync_supported, Some(true));
    }

    #[test]
    fn key_value_status_ignores_unknown_keys() {
        let update = parse_status_body("type=m&cp=0&bn=monitor").unwrap();
        assert_eq!(update.capture, Some(false));
        assert_eq!(update.multiplicity, None);
    }

    #[test]
    fn key_value_status_rejects_bad_values() {
        assert!(matches!(
            parse_status_body("type=m&mp=many"),
            Err(ProtocolError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse_status_body("type=mts&cp=1"),
            Err(ProtocolError::UnexpectedType { .. })
        ));
        assert_eq!(parse_status_body("  "), Err(ProtocolError::EmptyBody));
    }

    #[test]
    fn json_status_body() {
        let body = r#"{
            "mobileAgentConfig": {"maxBeaconSizeKb": 100, "sendIntervalSec": 60},
            "appConfig": {"capture": 1, "reportErrors": false, "reportCrashes": 1},
            "dynamicConfig": {"multiplicity": 3, "serverId": 12, "timeSyncSupported": true}
        }"#;
        let update = parse_status_body(body).unwrap();
        assert_eq!(update.max_beacon_size, Some(100 * 1024));
        assert_eq!(update.send_interval, Some(Duration::from_secs(60)));
        assert_eq!(update.capture, Some(true));
        assert_eq!(update.capture_errors, Some(false));
        assert_eq!(update.capture_crashes, Some(true));
        assert_eq!(update.multiplicity, Some(3));
        assert_eq!(update.server_id, Some(12));
        assert_eq!(update.time_sync_supported, Some(true));
    }

    #[test]
    fn json_and_key_value_normalize_to_same_attributes() {
        let kv = parse_status_body("type=m&cp=0&mp=4&id=2").unwrap();
        let json = parse_status_body(
            r#"{"appConfig":{"capture":0},"dynamicConfig":{"multiplicity":4,"serverId":2}}"#,
        )
        .unwrap();
        let prior = ResponseAttributes::with_defaults(1);
        assert_eq!(prior.merged(&kv), prior.merged(&json));
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(matches!(parse_status_body("{not json"), Err(ProtocolError::Json(_))));
        assert!(matches!(
            parse_status_body(r#"{"appConfig": 5}"#),
            Err(ProtocolError::InvalidValue { .. })
        ));
    }

    #[test]
    fn oversized_beacon_size_is_rejected() {
        let huge = (usize::MAX / 1024 + 1).to_string();
        assert!(matches!(
            parse_status_body(&format!("type=m&bl={huge}")),
            Err(ProtocolError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse_status_body(&format!(r#"{{"mobileAgentConfig":{{"maxBeaconSizeKb":{huge}}}}}"#)),
            Err(ProtocolError::InvalidValue { .. })
        ));

        let response = Response::from_status_body(200, "type=m&bl=18014398509481984", None);
        assert!(response.is_erroneous());
        assert!(response.attributes().is_none());
        let response = Response::from_status_body(
            200,
            r#"{"mobileAgentConfig":{"maxBeaconSizeKb":18014398509481984}}"#,
            None,
        );
        assert!(response.is_erroneous());
    }

    #[test]
    fn extreme_time_sync_timestamps_still_parse() {
        let body = format!("type=mts&t1={}&t2={}", i64::MIN, i64::MAX);
        let ts = parse_time_sync_body(&body).unwrap();
        assert_eq!(ts.request_receive_time, i64::MIN);
        assert_eq!(ts.response_send_time, i64::MAX);
    }

    #[test]
    fn time_sync_body() {
        let ts = parse_time_sync_body("type=mts&t1=1000&t2=1005").unwrap();
        assert_eq!(ts.request_receive_time, 1000);
        assert_eq!(ts.response_send_time, 1005);
        assert_eq!(
            parse_time_sync_body("type=mts&t1=1000"),
            Err(ProtocolError::MissingField("t2"))
        );
    }

    #[test]
    fn erroneous_responses_withhold_attributes() {
        let response = Response::from_status_body(500, "type=m&cp=1", None);
        assert!(response.is_erroneous());
        assert!(response.attributes().is_none());

        let response = Response::from_status_body(200, "type=m&mp=x", None);
        assert!(response.is_erroneous());
        assert_eq!(response.code(), 200);

        let response = Response::from_status_body(200, "type=m&cp=1", None);
        assert!(!response.is_erroneous());
        assert_eq!(response.attributes().unwrap().capture, Some(true));
    }

    #[test]
    fn too_many_requests_carries_retry_after() {
        let response = Response::from_status_body(429, "", parse_retry_after("42"));
        assert!(response.is_erroneous());
        assert!(response.is_too_many_requests());
        assert_eq!(
            response.retry_after_or(Duration::from_secs(600)),
            Duration::from_secs(42)
        );

        let response = Response::too_many_requests(None);
        assert_eq!(
            response.retry_after_or(Duration::from_secs(600)),
            Duration::from_secs(600)
        );
    }

    #[test]
    fn retry_after_parsing() {
        assert_eq!(parse_retry_after(" 10 "), Some(Duration::from_secs(10)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015"), None);
    }

    #[test]
    fn transport_failure_is_erroneous() {
        let response = Response::transport_failure();
        assert!(response.is_erroneous());
        assert_eq!(response.code(), 0);
        assert!(!response.is_too_many_requests());
    }
}
