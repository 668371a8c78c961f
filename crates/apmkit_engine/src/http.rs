//! HTTP transport implementation.
//!
//! This module provides the HTTP-based [`BeaconTransport`]. The actual
//! HTTP client is abstracted via a trait so that any HTTP library (or a
//! loopback collector in tests) can be plugged in.

use crate::config::DEFAULT_REQUEST_TIMEOUT;
use crate::error::EngineResult;
use apmkit_core::{AgentConfig, CoreError};
use apmkit_protocol::keys;
use apmkit_protocol::{
    parse_retry_after, AttributeUpdate, BeaconRequest, BeaconTransport, Response, StatusRequest, TimeSyncRequest,
};
use parking_lot::RwLock;
use std::time::Duration;
use tracing::{debug, trace, warn};
use url::Url;

/// A raw HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: String,
}

impl HttpResponse {
    /// Creates a response without headers.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Adds a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Value of the first header called `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport. A request
/// that does not complete within `timeout` should fail with
/// [`EngineError::Timeout`](crate::EngineError::Timeout).
pub trait HttpClient: Send + Sync {
    /// Sends a GET request.
    fn get(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        timeout: Duration,
    ) -> EngineResult<HttpResponse>;

    /// Sends a POST request.
    fn post(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &[u8],
        timeout: Duration,
    ) -> EngineResult<HttpResponse>;

    /// Checks if the client is healthy.
    fn is_healthy(&self) -> bool;
}

/// HTTP-based beacon transport.
///
/// Status checks and time-sync exchanges are GET requests, beacon chunks
/// are POSTed. Every failure is reported as an erroneous [`Response`].
pub struct HttpTransport<C: HttpClient> {
    endpoint: Url,
    application_id: String,
    platform_type: u32,
    technology_type: String,
    timeout: Duration,
    client: C,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a transport for the collector configured in `config`.
    pub fn new(config: &AgentConfig, client: C) -> EngineResult<Self> {
        let endpoint = Url::parse(&config.endpoint_url).map_err(CoreError::from)?;
        Ok(Self {
            endpoint,
            application_id: config.application_id.clone(),
            platform_type: config.platform_type,
            technology_type: config.technology_type.clone(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            client,
            last_error: RwLock::new(None),
        })
    }

    /// Sets the per-request timeout handed to the client.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the collector endpoint.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Returns the client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// URL for status and beacon requests.
    pub fn monitor_url(&self, server_id: i32) -> String {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair(keys::REQUEST_TYPE, keys::REQUEST_TYPE_MONITOR)
            .append_pair(keys::REQUEST_SERVER_ID, &server_id.to_string())
            .append_pair(keys::REQUEST_APPLICATION_ID, &self.application_id)
            .append_pair(keys::REQUEST_AGENT_VERSION, keys::AGENT_VERSION)
            .append_pair(keys::REQUEST_PLATFORM_TYPE, &self.platform_type.to_string())
            .append_pair(keys::REQUEST_TECHNOLOGY_TYPE, &self.technology_type);
        url.into()
    }

    /// URL for time-sync requests.
    pub fn time_sync_url(&self, server_id: i32) -> String {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair(keys::REQUEST_TYPE, keys::REQUEST_TYPE_TIME_SYNC)
            .append_pair(keys::REQUEST_SERVER_ID, &server_id.to_string());
        url.into()
    }

    fn exchange(
        &self,
        kind: &'static str,
        result: EngineResult<HttpResponse>,
        decode: impl FnOnce(&HttpResponse) -> Response,
    ) -> Response {
        match result {
            Ok(raw) => {
                *self.last_error.write() = None;
                let response = decode(&raw);
                trace!(kind, status = raw.status, erroneous = response.is_erroneous(), "collector replied");
                if response.is_erroneous() {
                    debug!(kind, status = raw.status, "erroneous collector response");
                }
                response
            }
            Err(e) => {
                warn!(kind, error = %e, "request failed");
                *self.last_error.write() = Some(e.to_string());
                Response::transport_failure()
            }
        }
    }

    fn unhealthy(&self, kind: &'static str) -> Option<Response> {
        if self.client.is_healthy() {
            return None;
        }
        debug!(kind, "client unhealthy, request skipped");
        Some(Response::transport_failure())
    }
}

fn retry_after(raw: &HttpResponse) -> Option<Duration> {
    raw.header(keys::RETRY_AFTER_HEADER).and_then(parse_retry_after)
}

impl<C: HttpClient> BeaconTransport for HttpTransport<C> {
    fn send_status_request(&self, request: &StatusRequest) -> Response {
        if let Some(failed) = self.unhealthy("status") {
            return failed;
        }
        let result = self
            .client
            .get(&self.monitor_url(request.server_id), &[], self.timeout);
        self.exchange("status", result, |raw| {
            Response::from_status_body(raw.status, &raw.body, retry_after(raw))
        })
    }

    fn send_time_sync_request(&self, request: &TimeSyncRequest) -> Response {
        if let Some(failed) = self.unhealthy("time_sync") {
            return failed;
        }
        let result = self
            .client
            .get(&self.time_sync_url(request.server_id), &[], self.timeout);
        self.exchange("time_sync", result, |raw| {
            Response::from_time_sync_body(raw.status, &raw.body, retry_after(raw))
        })
    }

    fn send_beacon_request(&self, request: &BeaconRequest<'_>) -> Response {
        if let Some(failed) = self.unhealthy("beacon") {
            return failed;
        }
        let url = self.monitor_url(request.server_id);
        let result = match request.client_ip {
            Some(ip) => self.client.post(
                &url,
                &[(keys::CLIENT_IP_HEADER, ip)],
                request.payload,
                self.timeout,
            ),
            None => self.client.post(&url, &[], request.payload, self.timeout),
        };
        self.exchange("beacon", result, |raw| {
            // an accepted chunk may come back without attributes
            if raw.status < 400 && raw.body.trim().is_empty() {
                return Response::status(raw.status, AttributeUpdate::new());
            }
            Response::from_status_body(raw.status, &raw.body, retry_after(raw))
        })
    }
}

/// Trait for collectors that can handle loopback requests.
pub trait LoopbackCollector: Send + Sync {
    /// Handles a GET request; `query` is the URL's query string.
    fn handle_get(&self, query: &str) -> HttpResponse;

    /// Handles a POST request.
    fn handle_post(&self, query: &str, headers: &[(&str, &str)], body: &[u8]) -> HttpResponse;
}

impl<S: LoopbackCollector + ?Sized> LoopbackCollector for std::sync::Arc<S> {
    fn handle_get(&self, query: &str) -> HttpResponse {
        (**self).handle_get(query)
    }

    fn handle_post(&self, query: &str, headers: &[(&str, &str)], body: &[u8]) -> HttpResponse {
        (**self).handle_post(query, headers, body)
    }
}

/// A loopback HTTP client that routes requests directly to a collector.
///
/// Useful for testing and simulation without network overhead.
pub struct LoopbackClient<S: LoopbackCollector> {
    collector: S,
}

impl<S: LoopbackCollector> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given collector.
    pub fn new(collector: S) -> Self {
        Self { collector }
    }

    /// Returns the collector.
    pub fn collector(&self) -> &S {
        &self.collector
    }
}

fn query_of(url: &str) -> &str {
    url.split_once('?').map_or("", |(_, query)| query)
}

impl<S: LoopbackCollector> HttpClient for LoopbackClient<S> {
    fn get(
        &self,
        url: &str,
        _headers: &[(&str, &str)],
        _timeout: Duration,
    ) -> EngineResult<HttpResponse> {
        Ok(self.collector.handle_get(query_of(url)))
    }

    fn post(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &[u8],
        _timeout: Duration,
    ) -> EngineResult<HttpResponse> {
        Ok(self.collector.handle_post(query_of(url), headers, body))
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct TestClient {
        response: Mutex<Option<HttpResponse>>,
        requests: Mutex<Vec<(String, Vec<(String, String)>, Vec<u8>)>>,
        timeouts: Mutex<Vec<Duration>>,
        unhealthy: AtomicBool,
    }

    impl TestClient {
        fn set_response(&self, response: HttpResponse) {
            *self.response.lock() = Some(response);
        }

        fn reply(
            &self,
            url: &str,
            headers: &[(&str, &str)],
            body: &[u8],
            timeout: Duration,
        ) -> EngineResult<HttpResponse> {
            self.timeouts.lock().push(timeout);
            self.requests.lock().push((
                url.to_string(),
                headers
                    .iter()
                    .map(|(n, v)| (n.to_string(), v.to_string()))
                    .collect(),
                body.to_vec(),
            ));
            self.response
                .lock()
                .clone()
                .ok_or_else(|| EngineError::transport_retryable("connection refused"))
        }
    }

    impl HttpClient for TestClient {
        fn get(
            &self,
            url: &str,
            headers: &[(&str, &str)],
            timeout: Duration,
        ) -> EngineResult<HttpResponse> {
            self.reply(url, headers, &[], timeout)
        }

        fn post(
            &self,
            url: &str,
            headers: &[(&str, &str)],
            body: &[u8],
            timeout: Duration,
        ) -> EngineResult<HttpResponse> {
            self.reply(url, headers, body, timeout)
        }

        fn is_healthy(&self) -> bool {
            !self.unhealthy.load(Ordering::SeqCst)
        }
    }

    fn transport() -> HttpTransport<TestClient> {
        let config = AgentConfig::new("https://collector.example.com/mbeacon", "my app", "1");
        HttpTransport::new(&config, TestClient::default()).unwrap()
    }

    #[test]
    fn builds_request_urls() {
        let transport = transport();
        assert_eq!(
            transport.monitor_url(4),
            format!(
                "https://collector.example.com/mbeacon?type=m&srvid=4&app=my+app&va={}&pt=1&tt=okrust",
                keys::AGENT_VERSION
            )
        );
        assert_eq!(
            transport.time_sync_url(4),
            "https://collector.example.com/mbeacon?type=mts&srvid=4"
        );
    }

    #[test]
    fn time_sync_targets_current_server() {
        let transport = transport();
        transport
            .client()
            .set_response(HttpResponse::new(200, "type=mts&t1=1&t2=2"));
        transport.send_time_sync_request(&TimeSyncRequest { server_id: 17 });
        let requests = transport.client().requests.lock();
        assert!(requests[0].0.ends_with("?type=mts&srvid=17"));
    }

    #[test]
    fn every_request_carries_the_timeout() {
        let transport = transport().with_timeout(Duration::from_millis(750));
        transport.client().set_response(HttpResponse::new(200, "type=m"));
        transport.send_status_request(&StatusRequest { server_id: 1 });
        transport.send_time_sync_request(&TimeSyncRequest { server_id: 1 });
        transport.send_beacon_request(&BeaconRequest {
            server_id: 1,
            session_number: 1,
            client_ip: None,
            payload: b"vv=3",
        });
        assert_eq!(
            *transport.client().timeouts.lock(),
            vec![Duration::from_millis(750); 3]
        );
        assert_eq!(self::transport().timeout(), DEFAULT_REQUEST_TIMEOUT);
    }

    #[test]
    fn rejects_invalid_endpoint() {
        let config = AgentConfig::new("not a url", "app", "1");
        assert!(matches!(
            HttpTransport::new(&config, TestClient::default()),
            Err(EngineError::Core(_))
        ));
    }

    #[test]
    fn status_response_is_decoded() {
        let transport = transport();
        transport
            .client()
            .set_response(HttpResponse::new(200, "type=m&cp=0&id=9"));
        let response = transport.send_status_request(&StatusRequest { server_id: 1 });
        assert!(!response.is_erroneous());
        let attributes = response.attributes().unwrap();
        assert_eq!(attributes.capture, Some(false));
        assert_eq!(attributes.server_id, Some(9));
    }

    #[test]
    fn rate_limit_carries_retry_after() {
        let transport = transport();
        transport
            .client()
            .set_response(HttpResponse::new(429, "").with_header("retry-after", "120"));
        let response = transport.send_status_request(&StatusRequest { server_id: 1 });
        assert!(response.is_too_many_requests());
        assert_eq!(
            response.retry_after_or(Duration::ZERO),
            Duration::from_secs(120)
        );
    }

    #[test]
    fn connection_failure_is_erroneous() {
        let transport = transport();
        let response = transport.send_status_request(&StatusRequest { server_id: 1 });
        assert!(response.is_erroneous());
        assert_eq!(response.code(), 0);
        assert!(transport.last_error().unwrap().contains("connection refused"));
    }

    #[test]
    fn unhealthy_client_is_not_called() {
        let transport = transport();
        transport.client().unhealthy.store(true, Ordering::SeqCst);
        let response = transport.send_time_sync_request(&TimeSyncRequest { server_id: 1 });
        assert!(response.is_erroneous());
        assert!(transport.client().requests.lock().is_empty());
    }

    #[test]
    fn beacon_is_posted_with_client_ip() {
        let transport = transport();
        transport.client().set_response(HttpResponse::new(200, "type=m"));
        let response = transport.send_beacon_request(&BeaconRequest {
            server_id: 2,
            session_number: 5,
            client_ip: Some("10.1.2.3"),
            payload: b"vv=3&et=18",
        });
        assert!(!response.is_erroneous());

        let requests = transport.client().requests.lock();
        let (url, headers, body) = &requests[0];
        assert!(url.contains("srvid=2"));
        assert_eq!(
            headers,
            &vec![("X-Client-IP".to_string(), "10.1.2.3".to_string())]
        );
        assert_eq!(body, b"vv=3&et=18");
    }

    #[test]
    fn accepted_beacon_without_body_is_not_erroneous() {
        let transport = transport();
        transport.client().set_response(HttpResponse::new(204, ""));
        let response = transport.send_beacon_request(&BeaconRequest {
            server_id: 1,
            session_number: 5,
            client_ip: None,
            payload: b"vv=3",
        });
        assert!(!response.is_erroneous());
        assert!(transport.client().requests.lock()[0].1.is_empty());
    }

    #[test]
    fn time_sync_response_is_decoded() {
        let transport = transport();
        transport
            .client()
            .set_response(HttpResponse::new(200, "type=mts&t1=100&t2=105"));
        let response = transport.send_time_sync_request(&TimeSyncRequest { server_id: 1 });
        let timestamps = response.time_sync_timestamps().unwrap();
        assert_eq!(timestamps.request_receive_time, 100);
        assert_eq!(timestamps.response_send_time, 105);
    }
}
