//! Reporting client for the Probe Dock API.
//!
//! Public API: no status code knowledge. All HTTP/status mapping in http.rs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ServerTarget;
use crate::error::{ReporterError, ReporterResult};

mod http;

use http::HttpBackend;
pub use http::PublishOutcome;

const USER_AGENT_VALUE: &str = concat!("probedock-reporter/", env!("CARGO_PKG_VERSION"));

/// Transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    30
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
        }
    }
}

impl ClientConfig {
    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

/// Destination of a finished run's payload.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Send the serialized payload once.
    async fn publish(&self, json: String) -> ReporterResult<PublishOutcome>;

    /// Where payloads go, for log messages.
    fn publish_url(&self) -> String;
}

/// HTTP client bound to one Probe Dock server.
#[derive(Debug, Clone)]
pub struct ReportingClient {
    http: HttpBackend,
}

impl ReportingClient {
    pub fn new(target: &ServerTarget, config: &ClientConfig) -> ReporterResult<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(default_headers)
            .build()
            .map_err(|e| ReporterError::Connectivity {
                message: format!("failed to create HTTP client: {}", e),
            })?;

        let base_url = target.api_url.as_str().trim_end_matches('/').to_string();

        Ok(Self {
            http: HttpBackend {
                client,
                base_url,
                api_token: target.api_token.clone(),
            },
        })
    }

    /// `GET {apiUrl}/ping`; fails only when the server cannot be reached.
    pub async fn ping(&self) -> ReporterResult<()> {
        let url = self.ping_url();
        debug!(url = %url, "pinging server");
        self.http.ping(&url).await
    }

    /// `POST {apiUrl}/publish` with the payload as body.
    pub async fn publish(&self, json: String) -> ReporterResult<PublishOutcome> {
        let url = self.publish_url();
        debug!(url = %url, bytes = json.len(), "publishing payload");
        self.http.publish(&url, json).await
    }

    pub fn base_url(&self) -> &str {
        &self.http.base_url
    }

    fn ping_url(&self) -> String {
        format!("{}/ping", self.http.base_url)
    }

    pub fn publish_url(&self) -> String {
        format!("{}/publish", self.http.base_url)
    }
}

#[async_trait]
impl Publisher for ReportingClient {
    async fn publish(&self, json: String) -> ReporterResult<PublishOutcome> {
        ReportingClient::publish(self, json).await
    }

    fn publish_url(&self) -> String {
        ReportingClient::publish_url(self)
    }
}


#[cfg(test)]
mod integration_tests {
    use super::*;
    use url::Url;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_client(mock_server: &MockServer) -> ReportingClient {
        let target = ServerTarget {
            name: "mock".to_string(),
            api_url: Url::parse(&format!("{}/api", mock_server.uri())).unwrap(),
            api_token: "test-token".to_string(),
        };
        ReportingClient::new(&target, &ClientConfig::default()).expect("failed to create client")
    }

    #[tokio::test]
    async fn test_ping_sends_bearer_token() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/ping"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        client.ping().await.expect("ping failed");
    }

    #[tokio::test]
    async fn test_ping_error_status_still_reachable() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/ping"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        assert!(client.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_ping_unreachable_is_connectivity_error() {
        let target = ServerTarget {
            name: "down".to_string(),
            api_url: Url::parse("http://127.0.0.1:1/api").unwrap(),
            api_token: "t".to_string(),
        };
        let client = ReportingClient::new(&target, &ClientConfig::default().with_timeout_secs(2)).unwrap();

        let err = client.ping().await.unwrap_err();
        assert!(matches!(err, ReporterError::Connectivity { .. }));
        assert!(err.to_string().contains("Unable to contact Probe Dock server"));
    }

    #[tokio::test]
    async fn test_publish_accepted_on_202() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/publish"))
            .and(header("authorization", "Bearer test-token"))
            .and(header("content-type", "application/json"))
            .and(body_string("{\"results\":[]}"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let outcome = client.publish("{\"results\":[]}".to_string()).await.unwrap();
        assert_eq!(outcome, PublishOutcome::Accepted);
    }

    #[tokio::test]
    async fn test_publish_other_success_status_is_rejected() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/publish"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let outcome = client.publish("{}".to_string()).await.unwrap();
        assert_eq!(
            outcome,
            PublishOutcome::Rejected {
                status: 200,
                body: "ok".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_publish_is_not_retried() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/publish"))
            .respond_with(
                ResponseTemplate::new(503).set_body_string("{\"errors\":[\"maintenance\"]}"),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        match client.publish("{}".to_string()).await.unwrap() {
            PublishOutcome::Rejected { status, body } => {
                assert_eq!(status, 503);
                assert!(body.contains("maintenance"));
            }
            other => panic!("expected Rejected, got {:?}", other),
        }
    }
}
