//! Error types for Telkeep.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Platform gateway errors, classified the way the pipelines consume them.
///
/// Transient and permanent failures share control flow (both are absorbed
/// into stage outcomes) but the variant is preserved for logging.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("message {message_id} not found in {channel}")]
    NotFound { channel: String, message_id: i64 },

    #[error("rate limited in {channel}, retry after {retry_after:?}")]
    RateLimited {
        channel: String,
        retry_after: Option<Duration>,
    },

    #[error("forbidden in {channel}: {reason}")]
    Forbidden { channel: String, reason: String },

    #[error("request timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("{0}")]
    Other(String),
}

impl GatewayError {
    /// True for "the message is already gone" — deleting a missing message
    /// is treated as success by the cleaner.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Short classification label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::RateLimited { .. } => "rate_limited",
            Self::Forbidden { .. } => "forbidden",
            Self::Timeout { .. } => "timeout",
            Self::Other(_) => "other",
        }
    }
}

/// Duplicate-index persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Failed to open index: {0}")]
    Open(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Corrupt entry for ({channel}, {code}): {reason}")]
    Corrupt {
        channel: String,
        code: String,
        reason: String,
    },
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
