//! Run configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then the
//! `QUARTERLY_USER_AGENT` environment variable, then command-line flags (applied
//! by the binary).

use quarterly_core::{QuarterlyError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::fetch::RetryPolicy;

/// Environment variable overriding [`Config::user_agent`].
pub const USER_AGENT_ENV: &str = "QUARTERLY_USER_AGENT";

/// Complete configuration for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// User agent sent to SEC EDGAR; should name the requester and a contact.
    pub user_agent: String,
    /// Document cache settings.
    pub cache: CacheConfig,
    /// Retrieval settings.
    pub fetch: FetchConfig,
    /// Spreadsheet settings.
    pub output: OutputConfig,
    /// Taxonomy file replacing the built-in synonym table.
    pub taxonomy_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_agent: concat!("quarterly/", env!("CARGO_PKG_VERSION")).to_string(),
            cache: CacheConfig::default(),
            fetch: FetchConfig::default(),
            output: OutputConfig::default(),
            taxonomy_path: None,
        }
    }
}

impl Config {
    /// Parses a TOML configuration; missing keys take their defaults.
    ///
    /// # Errors
    /// Returns [`QuarterlyError::Config`] on malformed TOML.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| QuarterlyError::Config(e.to_string()))
    }

    /// Loads a TOML configuration file.
    ///
    /// # Errors
    /// Returns [`QuarterlyError::Config`] if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            QuarterlyError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Applies environment overrides.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_user_agent_override(std::env::var(USER_AGENT_ENV).ok())
    }

    fn with_user_agent_override(mut self, user_agent: Option<String>) -> Self {
        if let Some(user_agent) = user_agent.filter(|ua| !ua.trim().is_empty()) {
            self.user_agent = user_agent;
        }
        self
    }
}

/// Document cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether downloaded documents are cached on disk.
    pub enabled: bool,
    /// SQLite database file.
    pub path: PathBuf,
    /// Entries older than this many days are discarded at startup.
    pub ttl_days: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from(".quarterly/filings.db"),
            ttl_days: None,
        }
    }
}

impl CacheConfig {
    /// Returns the TTL as a duration.
    #[must_use]
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_days
            .map(|days| Duration::from_secs(days.saturating_mul(24 * 60 * 60)))
    }
}

/// Retrieval settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Maximum documents downloaded at once.
    pub concurrency: usize,
    /// Attempts per document, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub initial_backoff_ms: u64,
    /// Per-attempt timeout.
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_attempts: 3,
            initial_backoff_ms: 500,
            timeout_secs: 30,
        }
    }
}

impl FetchConfig {
    /// Retry policy described by these settings.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            ..RetryPolicy::default()
        }
    }

    /// Per-attempt timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Spreadsheet settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Render derived values in italics and add a legend.
    pub annotate_provenance: bool,
    /// Include rows for labels that match no canonical concept.
    pub include_unclassified: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            annotate_provenance: false,
            include_unclassified: true,
        }
    }
}
