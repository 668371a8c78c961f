//! Simulate command implementation.
//!
//! Runs a real agent whose HTTP client is a loopback collector that
//! answers status checks and records every beacon it receives.

use super::CliError;
use apmkit_core::AgentConfig;
use apmkit_engine::{Agent, HttpResponse, LoopbackClient, LoopbackCollector};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const INIT_TIMEOUT: Duration = Duration::from_secs(10);

/// What the simulated application does.
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    /// Sessions to open.
    pub sessions: usize,
    /// Actions per session.
    pub actions: usize,
    /// Whether the collector enables capturing.
    pub capture: bool,
}

/// One beacon received by the loopback collector.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveredBeacon {
    /// Server id the request was addressed to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<i32>,
    /// `X-Client-IP` header, if sent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    /// Header tokens of the chunk.
    pub header: String,
    /// One entry per record, in delivery order.
    pub records: Vec<String>,
}

impl DeliveredBeacon {
    fn from_request(query: &str, headers: &[(&str, &str)], body: &[u8]) -> Self {
        let payload = String::from_utf8_lossy(body);
        let mut parts = payload.split("&et=");
        let header = parts.next().unwrap_or_default().to_string();
        let records = parts.map(|record| format!("et={record}")).collect();
        Self {
            server_id: query_value(query, "srvid").and_then(|v| v.parse().ok()),
            client_ip: headers
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case("X-Client-IP"))
                .map(|(_, value)| value.to_string()),
            header,
            records,
        }
    }
}

fn query_value<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

/// In-process collector that records beacons.
#[derive(Debug)]
pub struct SimulatedCollector {
    status_body: String,
    beacons: Mutex<Vec<DeliveredBeacon>>,
}

impl SimulatedCollector {
    /// Creates a collector answering with the given capture flag.
    pub fn new(capture: bool) -> Self {
        Self {
            status_body: format!("type=m&cp={}&id=1", u8::from(capture)),
            beacons: Mutex::new(Vec::new()),
        }
    }

    /// Beacons received so far.
    pub fn beacons(&self) -> Vec<DeliveredBeacon> {
        self.beacons.lock().clone()
    }
}

impl LoopbackCollector for SimulatedCollector {
    fn handle_get(&self, query: &str) -> HttpResponse {
        match query_value(query, "type") {
            Some("m") => HttpResponse::new(200, self.status_body.clone()),
            _ => HttpResponse::new(404, ""),
        }
    }

    fn handle_post(&self, query: &str, headers: &[(&str, &str)], body: &[u8]) -> HttpResponse {
        self.beacons
            .lock()
            .push(DeliveredBeacon::from_request(query, headers, body));
        HttpResponse::new(200, self.status_body.clone())
    }
}

/// Loads the agent configuration, or a built-in one when no file is given.
pub fn load_config(path: Option<&Path>) -> Result<AgentConfig, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok(
            AgentConfig::new("https://collector.invalid/mbeacon", "apmkit-simulate", "1")
                .with_application_name("apmkit simulate")
                .with_application_version(env!("CARGO_PKG_VERSION")),
        );
    };
    if !path.exists() {
        return Err(CliError::FileNotFound(path.to_path_buf()).into());
    }
    let config: AgentConfig = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    config.validate()?;
    Ok(config)
}

/// Runs the scripted sessions and returns what the collector received.
pub fn simulate(
    config: AgentConfig,
    options: &SimulationOptions,
) -> Result<Vec<DeliveredBeacon>, Box<dyn std::error::Error>> {
    let collector = Arc::new(SimulatedCollector::new(options.capture));
    let agent = Agent::with_http(config, LoopbackClient::new(Arc::clone(&collector)))?;
    if !agent.wait_for_init_timeout(INIT_TIMEOUT) {
        agent.shutdown();
        return Err(CliError::InitTimeout(INIT_TIMEOUT).into());
    }

    for n in 0..options.sessions {
        let session = agent.create_session(Some(&format!("10.0.0.{}", n % 250 + 1)));
        session.identify_user(&format!("user-{n}"));
        for i in 0..options.actions {
            let action = session.enter_action(&format!("action-{i}"));
            action.report_int("iteration", i as i64).report_event("checkpoint");
            action
                .trace_web_request(&format!("https://api.example.com/items/{i}?page=1"))
                .set_bytes_sent(64)
                .set_bytes_received(512)
                .stop(Some(200));
            action.leave();
        }
        session.end();
    }
    agent.shutdown();

    let beacons = collector.beacons();
    info!(
        sessions = options.sessions,
        beacons = beacons.len(),
        "simulation finished"
    );
    Ok(beacons)
}

/// Runs the simulate command.
pub fn run(
    config: Option<&Path>,
    options: &SimulationOptions,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let beacons = simulate(load_config(config)?, options)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&beacons)?);
        }
        _ => {
            print_text_output(&beacons);
        }
    }

    Ok(())
}

fn print_text_output(beacons: &[DeliveredBeacon]) {
    if beacons.is_empty() {
        println!("No beacons delivered");
        return;
    }
    for (n, beacon) in beacons.iter().enumerate() {
        println!(
            "Beacon {} (server {}, client {})",
            n + 1,
            beacon
                .server_id
                .map_or_else(|| "-".to_string(), |id| id.to_string()),
            beacon.client_ip.as_deref().unwrap_or("-"),
        );
        println!("  {}", beacon.header);
        for record in &beacon.records {
            println!("    {record}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn options(sessions: usize, capture: bool) -> SimulationOptions {
        SimulationOptions {
            sessions,
            actions: 2,
            capture,
        }
    }

    #[test]
    fn delivers_every_session() {
        let beacons = simulate(load_config(None).unwrap(), &options(2, true)).unwrap();
        let records: Vec<&String> = beacons.iter().flat_map(|b| &b.records).collect();

        // start, identify, 2 x (int, event, web request, action), end
        assert_eq!(records.len(), 2 * (1 + 1 + 2 * 4 + 1));
        assert!(records.iter().any(|r| r.starts_with("et=60&na=user-1")));
        assert!(beacons.iter().all(|b| b.server_id == Some(1)));
        assert!(beacons
            .iter()
            .all(|b| b.header.contains("ap=apmkit-simulate")));
    }

    #[test]
    fn capture_off_delivers_nothing() {
        let beacons = simulate(load_config(None).unwrap(), &options(1, false)).unwrap();
        assert!(beacons.is_empty());
    }

    #[test]
    fn config_file_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"endpoint_url":"https://c.example.com/mbeacon","application_id":"from-file","device_id":"7"}}"#
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.application_id, "from-file");
        assert_eq!(config.server_id, 1);

        let beacons = simulate(config, &options(1, true)).unwrap();
        assert!(beacons.iter().all(|b| b.header.contains("ap=from-file")));
        assert!(beacons.iter().all(|b| b.header.contains("vi=7")));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.json");
        std::fs::write(&path, r#"{"endpoint_url":"","application_id":"x"}"#).unwrap();
        assert!(load_config(Some(&path)).is_err());
        assert!(load_config(Some(&dir.path().join("missing.json"))).is_err());
    }

    #[test]
    fn request_parts_are_split() {
        let beacon = DeliveredBeacon::from_request(
            "type=m&srvid=4",
            &[("x-client-ip", "10.1.1.1")],
            b"vv=3&sn=1&et=18&it=1&et=19&it=1",
        );
        assert_eq!(beacon.server_id, Some(4));
        assert_eq!(beacon.client_ip.as_deref(), Some("10.1.1.1"));
        assert_eq!(beacon.header, "vv=3&sn=1");
        assert_eq!(beacon.records, vec!["et=18&it=1", "et=19&it=1"]);
    }
}
