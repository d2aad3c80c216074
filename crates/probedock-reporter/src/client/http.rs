//! HTTP layer: auth header, status mapping, PublishOutcome.
//!
//! This is the ONLY place for status code handling. client/mod.rs never
//! interprets status codes.

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::error::{ReporterError, ReporterResult};

/// Outcome of a publish request that reached the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// 202: the payload was queued for processing.
    Accepted,
    /// Any other status, with the response body as sent by the server.
    Rejected { status: u16, body: String },
}

/// HTTP backend (holds reqwest client, base URL and token).
#[derive(Debug, Clone)]
pub(crate) struct HttpBackend {
    pub(crate) client: reqwest::Client,
    pub(crate) base_url: String,
    pub(crate) api_token: String,
}

impl HttpBackend {
    /// Any response means the server is reachable, whatever its status.
    pub(crate) async fn ping(&self, url: &str) -> ReporterResult<()> {
        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, self.bearer())
            .send()
            .await
            .map_err(|e| ReporterError::Connectivity {
                message: format!("Unable to contact Probe Dock server: {}", e),
            })?;

        debug!(url, status = response.status().as_u16(), "ping answered");
        Ok(())
    }

    /// Single attempt, no retry.
    pub(crate) async fn publish(&self, url: &str, body: String) -> ReporterResult<PublishOutcome> {
        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, self.bearer())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| ReporterError::Connectivity {
                message: format!("Unable to post results to Probe Dock server: {}", e),
            })?;

        let status = response.status();
        if status == StatusCode::ACCEPTED {
            debug!(url, "payload accepted");
            return Ok(PublishOutcome::Accepted);
        }

        let body = response.text().await.unwrap_or_default();
        warn!(url, status = status.as_u16(), "payload rejected");
        Ok(PublishOutcome::Rejected {
            status: status.as_u16(),
            body,
        })
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.api_token)
    }
}
