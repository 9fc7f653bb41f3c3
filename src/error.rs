//! Error types for the shuppan library.
//!
//! Uses `thiserror` for structured error definitions that keep the
//! machine-readable classification separate from the human-readable
//! message shown by the UI layer.

use thiserror::Error;

/// Error type for reference-dataset (chapter dump) operations.
///
/// "Not found" is never an error here: resolver queries return `None` or
/// empty collections for missing data. These variants cover the dataset
/// fetch and decode failing outright, which is fatal to the whole
/// reconciliation pass.
#[derive(Error, Debug)]
pub enum DumpError {
    /// HTTP fetch of the dataset export failed
    #[error("Failed to fetch chapter dump: {0}")]
    FetchError(#[from] reqwest::Error),

    /// The export was retrieved but could not be decoded
    #[error("Failed to decode chapter dump: {0}")]
    DecodeError(String),
}

/// Classified failure of a remote-service call.
///
/// Classification is by HTTP status alone; response bodies are not part of
/// the contract. The upload orchestrator turns every variant into a state
/// transition rather than letting it escape.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The remote service explicitly denied access (HTTP 403).
    /// Never retried without operator intervention.
    #[error("Access denied by the remote service (HTTP 403)")]
    Forbidden,

    /// Request quota hit (HTTP 429). The rate limiter chain re-waits on
    /// every bucket and retries these.
    #[error("Rate limited by the remote service (HTTP 429)")]
    RateLimited,

    /// No response was received: connect failure, timeout, or the
    /// connection dropped mid-transfer. Retryable with bounded attempts.
    #[error("Network error: {0}")]
    Network(String),

    /// Any other non-success HTTP status. Fatal to the current run.
    #[error("Request failed with HTTP {status}")]
    Status { status: u16 },

    /// The 429 retry ceiling was exhausted, which means the configured
    /// buckets are more generous than the remote quota.
    #[error("Request quota still exceeded after {attempts} rate-limited attempts")]
    QuotaExhausted { attempts: u32 },

    /// No usable bearer token was configured. Programmer/configuration
    /// error, raised before any request is issued.
    #[error("No usable bearer token configured")]
    MissingCredential,
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        // reqwest errors at this level mean no usable response arrived.
        TransportError::Network(err.to_string())
    }
}

impl TransportError {
    /// True for failures worth a bounded retry of the same job.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Network(_))
    }
}

/// Error type for configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse config file
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// Missing required configuration value
    #[error("Missing required config value: {0}")]
    MissingValue(String),

    /// Invalid configuration value
    #[error("Invalid config value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Config directory not found
    #[error("Could not determine config directory")]
    NoConfigDir,
}

/// Result type alias using anyhow for application-level error handling.
pub type Result<T> = anyhow::Result<T>;
