//! Run payload sent to `POST {apiUrl}/publish`.
//!
//! ```json
//! {
//!   "reports": [{ "uid": "2f1c..." }],
//!   "duration": 1234,
//!   "projectId": "proj1",
//!   "version": "1.0",
//!   "results": [{ "k": "t1", "n": "Test one", "p": true, "d": 42 }]
//! }
//! ```
//!
//! Rust strings are UTF-8 already, which is the payload encoding, so no
//! conversion pass is needed before serializing.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::EffectiveConfig;
use crate::error::{ReporterError, ReporterResult};
use crate::io::write_atomic;
use crate::record::TestRecord;

pub const PAYLOAD_FILE: &str = "payload.json";

/// Reference to the test report a payload belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRef {
    pub uid: String,
}

/// One run's results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunPayload {
    pub reports: Vec<ReportRef>,

    #[serde(rename = "duration")]
    pub duration_ms: u64,

    #[serde(rename = "projectId")]
    pub project_api_id: String,

    #[serde(rename = "version")]
    pub project_version: String,

    pub results: Vec<TestRecord>,
}

impl RunPayload {
    /// Assemble a payload; fails when the project's apiId or version is missing.
    pub fn assemble(
        config: &EffectiveConfig,
        run_uid: &str,
        duration_ms: u64,
        results: Vec<TestRecord>,
    ) -> ReporterResult<Self> {
        Ok(Self {
            reports: vec![ReportRef {
                uid: run_uid.to_string(),
            }],
            duration_ms,
            project_api_id: config.project_api_id()?.to_string(),
            project_version: config.project_version()?.to_string(),
            results,
        })
    }

    pub fn run_uid(&self) -> Option<&str> {
        self.reports.first().map(|r| r.uid.as_str())
    }

    pub fn to_json(&self) -> ReporterResult<String> {
        serde_json::to_string(self).map_err(|e| ReporterError::Payload {
            message: format!("failed to serialize payload: {}", e),
        })
    }

    pub fn to_pretty_json(&self) -> ReporterResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| ReporterError::Payload {
            message: format!("failed to serialize payload: {}", e),
        })
    }
}

/// Write the serialized payload to `{workspace}/phpunit/servers/{server}/payload.json`.
pub async fn save(config: &EffectiveConfig, json: &str) -> ReporterResult<PathBuf> {
    let dir = config.server_dir().map_err(|e| match e {
        ReporterError::Config { message } => {
            ReporterError::config(format!("{} Could not save payload.", message))
        }
        other => other,
    })?;
    let path = dir.join(PAYLOAD_FILE);

    write_atomic(&path, json)
        .await
        .map_err(|e| ReporterError::Payload {
            message: format!("unable to save payload in workspace: {}", e),
        })?;

    info!(path = %path.display(), "saved payload");
    Ok(path)
}
