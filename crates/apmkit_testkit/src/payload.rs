//! Decoding of delivered beacons for assertions.

use apmkit_protocol::keys;
use percent_encoding::percent_decode_str;

/// One group of `key=value` tokens.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tokens {
    pairs: Vec<(String, String)>,
}

impl Tokens {
    /// Value of the first token named `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Value of `key` parsed as an integer.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    /// Token keys in order.
    pub fn keys(&self) -> Vec<&str> {
        self.pairs.iter().map(|(k, _)| k.as_str()).collect()
    }

    /// The decoded pairs.
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// Event type code, for record groups.
    pub fn event_type(&self) -> Option<u32> {
        self.get(keys::EVENT_TYPE).and_then(|v| v.parse().ok())
    }
}

/// A delivered beacon split into header and records.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Payload {
    /// Header tokens.
    pub header: Tokens,
    /// One token group per record, in delivery order.
    pub records: Vec<Tokens>,
}

impl Payload {
    /// Records of the given event type.
    pub fn records_of_type(&self, code: u32) -> Vec<&Tokens> {
        self.records
            .iter()
            .filter(|r| r.event_type() == Some(code))
            .collect()
    }
}

/// Splits a payload into decoded `key=value` pairs.
pub fn parse_pairs(payload: &str) -> Vec<(String, String)> {
    payload
        .split(keys::TOKEN_SEPARATOR)
        .filter(|token| !token.is_empty())
        .map(|token| {
            let (key, value) = token
                .split_once(keys::KEY_VALUE_SEPARATOR)
                .unwrap_or((token, ""));
            (key.to_string(), decode(value))
        })
        .collect()
}

/// Parses a payload; every `et` token starts a new record.
pub fn parse_payload(payload: &str) -> Payload {
    let mut parsed = Payload::default();
    for pair in parse_pairs(payload) {
        if pair.0 == keys::EVENT_TYPE {
            parsed.records.push(Tokens::default());
        }
        match parsed.records.last_mut() {
            Some(record) => record.pairs.push(pair),
            None => parsed.header.pairs.push(pair),
        }
    }
    parsed
}

fn decode(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}
