//! Parse status command implementation.

use super::CliError;
use apmkit_protocol::{parse_status_body, AttributeUpdate, ResponseAttributes};
use serde::Serialize;
use std::path::Path;

/// Decoded attributes for output. Absent fields were omitted by the
/// response.
#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct AttributesInfo {
    /// Capture flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture: Option<bool>,
    /// Capture errors flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_errors: Option<bool>,
    /// Capture crashes flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_crashes: Option<bool>,
    /// Multiplicity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiplicity: Option<u32>,
    /// Server id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<i32>,
    /// Maximum beacon size in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_beacon_size: Option<usize>,
    /// Send interval in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_interval_secs: Option<u64>,
    /// Time sync support.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_sync_supported: Option<bool>,
}

impl From<&AttributeUpdate> for AttributesInfo {
    fn from(update: &AttributeUpdate) -> Self {
        Self {
            capture: update.capture,
            capture_errors: update.capture_errors,
            capture_crashes: update.capture_crashes,
            multiplicity: update.multiplicity,
            server_id: update.server_id,
            max_beacon_size: update.max_beacon_size,
            send_interval_secs: update.send_interval.map(|d| d.as_secs()),
            time_sync_supported: update.time_sync_supported,
        }
    }
}

impl From<&ResponseAttributes> for AttributesInfo {
    fn from(attrs: &ResponseAttributes) -> Self {
        Self {
            capture: Some(attrs.is_capture_on()),
            capture_errors: Some(attrs.capture_errors()),
            capture_crashes: Some(attrs.capture_crashes()),
            multiplicity: Some(attrs.multiplicity()),
            server_id: Some(attrs.server_id()),
            max_beacon_size: Some(attrs.max_beacon_size()),
            send_interval_secs: Some(attrs.send_interval().as_secs()),
            time_sync_supported: Some(attrs.is_time_sync_supported()),
        }
    }
}

/// Decodes `body`; with `merged` the update is applied to the defaults.
pub fn decode(body: &str, merged: bool) -> Result<AttributesInfo, CliError> {
    let update = parse_status_body(body)?;
    if merged {
        let effective = ResponseAttributes::with_defaults(1).merged(&update);
        Ok(AttributesInfo::from(&effective))
    } else {
        Ok(AttributesInfo::from(&update))
    }
}

/// Runs the parse-status command.
pub fn run(
    body: Option<&str>,
    file: Option<&Path>,
    merged: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let body = match (body, file) {
        (Some(body), _) => body.to_string(),
        (None, Some(path)) => {
            if !path.exists() {
                return Err(CliError::FileNotFound(path.to_path_buf()).into());
            }
            std::fs::read_to_string(path)?
        }
        (None, None) => return Err(CliError::MissingBody.into()),
    };

    let info = decode(&body, merged)?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn key_value_body() {
        let info = decode("type=m&cp=0&id=5&si=30", false).unwrap();
        assert_eq!(info.capture, Some(false));
        assert_eq!(info.server_id, Some(5));
        assert_eq!(info.send_interval_secs, Some(30));
        assert_eq!(info.multiplicity, None);
    }

    #[test]
    fn omitted_fields_are_not_printed() {
        let info = decode("type=m&mp=2", false).unwrap();
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json, serde_json::json!({ "multiplicity": 2 }));
    }

    #[test]
    fn merged_fills_defaults() {
        let info = decode("type=m&mp=4", true).unwrap();
        assert_eq!(info.multiplicity, Some(4));
        assert_eq!(info.capture, Some(true));
        assert_eq!(info.time_sync_supported, Some(false));
    }

    #[test]
    fn json_body_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"appConfig":{{"capture":1}},"dynamicConfig":{{"serverId":9}}}}"#
        )
        .unwrap();

        run(None, Some(file.path()), false).unwrap();
        let body = std::fs::read_to_string(file.path()).unwrap();
        let info = decode(&body, false).unwrap();
        assert_eq!(info.server_id, Some(9));
    }

    #[test]
    fn missing_inputs_are_errors() {
        assert!(run(None, None, false).is_err());
        let dir = tempfile::tempdir().unwrap();
        assert!(run(None, Some(&dir.path().join("absent.txt")), false).is_err());
        assert!(matches!(decode("", false), Err(CliError::InvalidBody(_))));
    }
}
