//! Fingerprint cache.
//!
//! Remembers, per project, the fingerprint of every test key that was part of
//! a delivered payload, so later runs can leave unchanged metadata out.
//!
//! # Cache Structure
//!
//! ```text
//! {workspace}/phpunit/servers/{server}/cache.json
//! {
//!   "<project apiId>": { "<test key>": "<sha256 hex>", ... },
//!   ...
//! }
//! ```
//!
//! Several projects may share the file; a flush only rewrites the current
//! project's entry. There is no cross-process locking, so only one reporting
//! process per project and server should run at a time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::error::{ReporterError, ReporterResult};
use crate::io::write_atomic;

pub const CACHE_FILE: &str = "cache.json";

type CacheDocument = BTreeMap<String, BTreeMap<String, String>>;

/// Per-project map of test key to fingerprint.
#[derive(Debug, Clone)]
pub struct TestKeyCache {
    path: PathBuf,
    project: String,
    /// Fingerprints confirmed by a delivered payload.
    entries: BTreeMap<String, String>,
    /// Fingerprints seen during the current run, not yet delivered.
    pending: BTreeMap<String, String>,
}

impl TestKeyCache {
    /// Empty cache for `project`, stored at `path`.
    pub fn new(path: impl Into<PathBuf>, project: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            project: project.into(),
            entries: BTreeMap::new(),
            pending: BTreeMap::new(),
        }
    }

    /// Load the project's entries. A missing file is an empty cache; an
    /// unreadable or corrupt one is an error.
    pub async fn load(path: impl Into<PathBuf>, project: impl Into<String>) -> ReporterResult<Self> {
        let mut cache = Self::new(path, project);
        let mut document = read_document(&cache.path).await?;
        if let Some(entries) = document.remove(&cache.project) {
            cache.entries = entries;
        }
        debug!(
            path = %cache.path.display(),
            project = %cache.project,
            entries = cache.entries.len(),
            "loaded fingerprint cache"
        );
        Ok(cache)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// Fingerprint of `key` as of the last delivered run.
    pub fn lookup(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Stage a new fingerprint for `key`. It becomes visible to `lookup` after
    /// the next successful `flush`.
    pub fn record(&mut self, key: impl Into<String>, hash: impl Into<String>) {
        self.pending.insert(key.into(), hash.into());
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Forget the staged fingerprints of a run that was not delivered.
    pub fn discard_pending(&mut self) {
        self.pending.clear();
    }

    /// Promote staged fingerprints and persist this project's entry, keeping
    /// the entries of other projects found on disk.
    pub async fn flush(&mut self) -> ReporterResult<()> {
        let mut document = read_document(&self.path).await?;

        let mut entries = self.entries.clone();
        entries.extend(self.pending.iter().map(|(k, v)| (k.clone(), v.clone())));
        document.insert(self.project.clone(), entries.clone());

        let json = serde_json::to_string_pretty(&document)
            .map_err(|e| ReporterError::cache(format!("failed to serialize cache: {}", e)))?;
        write_atomic(&self.path, &json).await.map_err(|e| {
            ReporterError::cache(format!(
                "failed to write cache file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        debug!(
            path = %self.path.display(),
            promoted = self.pending.len(),
            "flushed fingerprint cache"
        );
        self.entries = entries;
        self.pending.clear();
        Ok(())
    }
}

async fn read_document(path: &Path) -> ReporterResult<CacheDocument> {
    if !path.exists() {
        return Ok(CacheDocument::new());
    }

    let text = fs::read_to_string(path).await.map_err(|e| {
        ReporterError::cache(format!("failed to read cache file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&text).map_err(|e| {
        ReporterError::cache(format!("corrupt cache file {}: {}", path.display(), e))
    })
}
