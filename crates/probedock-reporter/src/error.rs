//! Error types for the reporter.

/// Reporter errors.
///
/// None of these ever reach the host test runner: the listener turns them into
/// report log lines. They only decide how much of the reporting is lost.
#[derive(Debug, thiserror::Error)]
pub enum ReporterError {
    /// Missing or invalid configuration, or unparsable config files.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Invalid per-test metadata.
    #[error("invalid annotation on {test}: {message}")]
    Annotation { test: String, message: String },

    /// Server unreachable (ping or publish transport failure).
    #[error("connectivity error: {message}")]
    Connectivity { message: String },

    /// Unreadable or corrupt fingerprint cache.
    #[error("cache error: {message}")]
    Cache { message: String },

    /// Payload could not be serialized or saved.
    #[error("payload error: {message}")]
    Payload { message: String },
}

impl ReporterError {
    /// Whether the error disables reporting for the rest of the run.
    ///
    /// Annotation, cache and payload errors only cost one test, the cache or
    /// the saved copy of a payload.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::Connectivity { .. })
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub(crate) fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }
}

/// Result type for reporter operations.
pub type ReporterResult<T> = Result<T, ReporterError>;
