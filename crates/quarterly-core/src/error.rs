//! Error types for fatal conditions.
//!
//! This module defines [`QuarterlyError`], which covers everything that aborts a
//! run before a report is written. Recoverable conditions (coverage gaps,
//! unresolved labels, indeterminate quarters) are not errors; they are
//! collected as [`Issue`](crate::log::Issue)s in the reconciliation log.

use thiserror::Error;

/// Errors that abort a run.
#[derive(Error, Debug)]
pub enum QuarterlyError {
    /// The ticker does not resolve to any filer.
    #[error("Ticker not found: {0}")]
    NotFound(String),

    /// Network-related errors (connection failures, timeouts, HTTP errors).
    #[error("Network error: {0}")]
    Network(String),

    /// Rate limit exceeded by the filing source.
    #[error("Rate limited by {source_name}: retry after {retry_after:?}")]
    RateLimited {
        /// The source that rate limited the request.
        source_name: String,
        /// Suggested time to wait before retrying.
        retry_after: Option<std::time::Duration>,
    },

    /// Error parsing a document or an index response.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Error interacting with the document cache.
    #[error("Cache error: {0}")]
    Cache(String),

    /// Invalid or inconsistent configuration (including the taxonomy file).
    #[error("Configuration error: {0}")]
    Config(String),

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Error writing the output report.
    #[error("Report error: {0}")]
    Report(String),

    /// The requested feature is not supported.
    #[error("Feature not supported: {0}")]
    NotSupported(String),

    /// Any other error.
    #[error("{0}")]
    Other(String),
}

impl QuarterlyError {
    /// Returns true for transient failures worth retrying.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RateLimited { .. })
    }
}

/// Result type alias using [`QuarterlyError`].
pub type Result<T> = std::result::Result<T, QuarterlyError>;
