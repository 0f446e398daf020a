//! Cache trait for storing downloaded filing documents.
//!
//! This module defines the [`DocumentCache`] trait. Entries are keyed by
//! (ticker, filing id) and addressed by the SHA-256 digest of their content,
//! so writing the same key twice always stores identical bytes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;

use crate::{error::Result, types::Symbol};

/// Key of a cached filing document.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    /// Ticker the document was fetched for.
    pub ticker: Symbol,
    /// Filing identifier (accession number).
    pub filing_id: String,
}

impl CacheKey {
    /// Creates a cache key.
    #[must_use]
    pub fn new(ticker: Symbol, filing_id: impl Into<String>) -> Self {
        Self {
            ticker,
            filing_id: filing_id.into(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ticker, self.filing_id)
    }
}

/// Returns the lowercase hex SHA-256 digest of `content`.
#[must_use]
pub fn content_digest(content: &[u8]) -> String {
    format!("{:x}", Sha256::digest(content))
}

/// Trait for caching downloaded filing documents.
///
/// Implementations can store data in various backends (SQLite, in-memory, etc.)
/// to avoid repeated downloads.
#[async_trait]
pub trait DocumentCache: Send + Sync + fmt::Debug {
    /// Retrieves a cached document.
    ///
    /// Returns `Ok(Some(bytes))` if cached, `Ok(None)` if not cached or if the
    /// stored content no longer matches its digest.
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>>;

    /// Stores a document. Storing the same key again is idempotent.
    async fn put(&self, key: &CacheKey, content: &[u8]) -> Result<()>;

    /// Removes cache entries older than the specified TTL.
    ///
    /// Returns the number of entries invalidated.
    async fn invalidate_stale(&self, ttl: Duration) -> Result<usize>;

    /// Clears all cached data.
    async fn clear(&self) -> Result<()>;
}
