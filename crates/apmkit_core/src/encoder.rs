//! Beacon wire encoder.
//!
//! A delivered chunk is a header followed by one token group per buffered
//! record, all joined by `&`. Tokens are `key=value` with string values
//! percent-encoded.

use crate::config::AgentConfig;
use crate::event::{EventRecord, RecordKind, Value};
use apmkit_protocol::keys::{self, KEY_VALUE_SEPARATOR, TOKEN_SEPARATOR};
use apmkit_protocol::percent_encode;
use std::fmt::Display;

/// Appends `key=value` tokens to a string.
#[derive(Debug, Default)]
struct TokenWriter {
    out: String,
}

impl TokenWriter {
    fn key(&mut self, key: &str) {
        if !self.out.is_empty() {
            self.out.push(TOKEN_SEPARATOR);
        }
        self.out.push_str(key);
        self.out.push(KEY_VALUE_SEPARATOR);
    }

    fn text(&mut self, key: &str, value: &str) -> &mut Self {
        self.key(key);
        self.out.push_str(&percent_encode(value));
        self
    }

    fn number(&mut self, key: &str, value: impl Display) -> &mut Self {
        self.key(key);
        self.out.push_str(&value.to_string());
        self
    }

    fn finish(self) -> String {
        self.out
    }
}

/// Encodes the header and the records of one session.
#[derive(Debug, Clone)]
pub struct BeaconEncoder {
    prefix: String,
}

impl BeaconEncoder {
    /// Precomputes the static header part for a session.
    pub fn new(config: &AgentConfig, session_number: i32, client_ip: Option<&str>) -> Self {
        let mut w = TokenWriter::default();
        w.number(keys::PROTOCOL_VERSION_KEY, keys::PROTOCOL_VERSION)
            .text(keys::AGENT_VERSION_KEY, keys::AGENT_VERSION)
            .text(keys::APPLICATION_ID, &config.application_id)
            .text(keys::APPLICATION_NAME, &config.application_name)
            .text(keys::APPLICATION_VERSION, &config.application_version)
            .number(keys::PLATFORM_TYPE, config.platform_type)
            .text(keys::TECHNOLOGY_TYPE, &config.technology_type)
            .number(keys::DEVICE_ID, config.numeric_device_id())
            .number(keys::SESSION_NUMBER, session_number);
        if let Some(ip) = client_ip {
            w.text(keys::CLIENT_IP, ip);
        }
        if let Some(os) = &config.device.operating_system {
            w.text(keys::DEVICE_OS, os);
        }
        if let Some(manufacturer) = &config.device.manufacturer {
            w.text(keys::DEVICE_MANUFACTURER, manufacturer);
        }
        if let Some(model) = &config.device.model {
            w.text(keys::DEVICE_MODEL, model);
        }
        Self { prefix: w.finish() }
    }

    /// Builds the full header of one chunk. All times are cluster times.
    pub fn header(
        &self,
        multiplicity: u32,
        session_start: i64,
        time_sync_time: Option<i64>,
        transmission_time: i64,
    ) -> String {
        let mut w = TokenWriter {
            out: self.prefix.clone(),
        };
        w.number(keys::MULTIPLICITY, multiplicity)
            .number(keys::SESSION_START_TIME, session_start);
        if let Some(sync_time) = time_sync_time {
            w.number(keys::TIME_SYNC_TIME, sync_time);
        }
        w.number(keys::TRANSMISSION_TIME, transmission_time);
        w.finish()
    }

    /// Encodes one record. Times are made relative to `session_start`
    /// (local ms).
    pub fn encode_record(record: &EventRecord, session_start: i64) -> String {
        let relative = |at: i64| at.saturating_sub(session_start).max(0);
        let mut w = TokenWriter::default();
        w.number(keys::EVENT_TYPE, record.event_type().code());

        match &record.kind {
            RecordKind::SessionStart | RecordKind::SessionEnd => {
                w.number(keys::THREAD_ID, record.thread_id)
                    .number(keys::PARENT_ACTION_ID, record.parent_action_id)
                    .number(keys::START_SEQUENCE_NUMBER, record.sequence)
                    .number(keys::TIME_0, relative(record.timestamp));
            }
            RecordKind::Action {
                id,
                name,
                end_sequence,
                end_time,
                child_duration,
            } => {
                w.text(keys::NAME, name)
                    .number(keys::THREAD_ID, record.thread_id)
                    .number(keys::ACTION_ID, id)
                    .number(keys::PARENT_ACTION_ID, record.parent_action_id)
                    .number(keys::START_SEQUENCE_NUMBER, record.sequence)
                    .number(keys::TIME_0, relative(record.timestamp))
                    .number(keys::END_SEQUENCE_NUMBER, end_sequence)
                    .number(keys::TIME_1, end_time.saturating_sub(record.timestamp).max(0))
                    .number(keys::CHILD_DURATION, child_duration);
            }
            RecordKind::NamedEvent { name } => {
                Self::common(&mut w, name, record, relative(record.timestamp));
            }
            RecordKind::IdentifyUser { tag } => {
                Self::common(&mut w, tag, record, relative(record.timestamp));
            }
            RecordKind::Value { name, value } => {
                Self::common(&mut w, name, record, relative(record.timestamp));
                match value {
                    Value::Int(v) => w.number(keys::VALUE, v),
                    Value::Double(v) => w.number(keys::VALUE, v),
                    Value::Text(v) => w.text(keys::VALUE, v),
                };
            }
            RecordKind::Error { name, code, reason } => {
                Self::common(&mut w, name, record, relative(record.timestamp));
                w.number(keys::ERROR_CODE, code).text(keys::REASON, reason);
            }
            RecordKind::Crash {
                name,
                reason,
                stacktrace,
            } => {
                Self::common(&mut w, name, record, relative(record.timestamp));
                w.text(keys::REASON, reason)
                    .text(keys::STACKTRACE, stacktrace);
            }
            RecordKind::WebRequest {
                url,
                end_sequence,
                end_time,
                bytes_sent,
                bytes_received,
                response_code,
            } => {
                Self::common(&mut w, url, record, relative(record.timestamp));
                w.number(keys::END_SEQUENCE_NUMBER, end_sequence)
                    .number(keys::TIME_1, end_time.saturating_sub(record.timestamp).max(0));
                if let Some(sent) = bytes_sent {
                    w.number(keys::BYTES_SENT, sent);
                }
                if let Some(received) = bytes_received {
                    w.number(keys::BYTES_RECEIVED, received);
                }
                if let Some(code) = response_code {
                    w.number(keys::RESPONSE_CODE, code);
                }
            }
        }

        w.finish()
    }

    fn common(w: &mut TokenWriter, name: &str, record: &EventRecord, t0: i64) {
        w.text(keys::NAME, name)
            .number(keys::THREAD_ID, record.thread_id)
            .number(keys::PARENT_ACTION_ID, record.parent_action_id)
            .number(keys::START_SEQUENCE_NUMBER, record.sequence)
            .number(keys::TIME_0, t0);
    }
}
