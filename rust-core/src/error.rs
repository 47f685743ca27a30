//! Error types.
//!
//! Per-fix engine code never returns errors; these only surface at the
//! edges: a single routing attempt, configuration loading, the Android
//! bridge and the navigator handle.

use thiserror::Error;

/// Why a single routing provider attempt failed.
///
/// The chain treats every variant as "try the next provider".
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    /// The provider did not answer within the chain's timeout.
    #[error("{provider} timed out after {after_ms} ms")]
    Timeout { provider: String, after_ms: u64 },

    /// Transport-level failure (connect, TLS, body read).
    #[error("HTTP error: {0}")]
    Http(String),

    /// Non-2xx response.
    #[error("HTTP status {0}")]
    Status(u16),

    /// The response parsed but is not a usable route.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The provider lacks configuration (e.g. no API key).
    #[error("provider not configured")]
    NotConfigured,

    /// The provider is being skipped after repeated failures.
    #[error("circuit open")]
    CircuitOpen,

    /// The request was superseded or the session ended.
    #[error("request cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Whether this failure should count against the provider's health.
    pub fn counts_as_failure(&self) -> bool {
        !matches!(
            self,
            ProviderError::NotConfigured | ProviderError::CircuitOpen | ProviderError::Cancelled
        )
    }
}

/// Errors at the library boundary.
#[derive(Debug, Error)]
pub enum NavError {
    /// Configuration JSON could not be parsed.
    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),

    /// Caller passed something the engine cannot use.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The navigator task has stopped.
    #[error("navigator has shut down")]
    Shutdown,
}

/// Result alias for boundary operations.
pub type Result<T> = std::result::Result<T, NavError>;
