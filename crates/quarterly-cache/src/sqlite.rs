//! SQLite-based cache implementation.

use async_trait::async_trait;
use chrono::Utc;
use quarterly_core::{CacheKey, DocumentCache, QuarterlyError, Result, content_digest};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// SQLite-based cache for filing documents.
///
/// This cache stores documents in a SQLite database file, providing persistence
/// across runs. Content lives in a `documents` table keyed by SHA-256 digest;
/// `filing_index` maps (ticker, filing id) to a digest.
#[derive(Debug)]
pub struct SqliteCache {
    conn: Mutex<Connection>,
}

impl SqliteCache {
    /// Create a new SQLite cache at the given path.
    ///
    /// Parent directories are created if missing.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or schema creation fails.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| QuarterlyError::Cache(e.to_string()))?;
        }
        let conn = Connection::open(path).map_err(|e| QuarterlyError::Cache(e.to_string()))?;
        let cache = Self {
            conn: Mutex::new(conn),
        };
        cache.initialize_schema()?;
        Ok(cache)
    }

    /// Create an in-memory SQLite cache.
    ///
    /// Useful for testing; data is lost when the cache is dropped.
    ///
    /// # Errors
    /// Returns an error if schema creation fails.
    pub fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| QuarterlyError::Cache(e.to_string()))?;
        let cache = Self {
            conn: Mutex::new(conn),
        };
        cache.initialize_schema()?;
        Ok(cache)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| QuarterlyError::Cache(e.to_string()))
    }

    /// Initialize the database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS documents (
                digest TEXT PRIMARY KEY,
                content BLOB NOT NULL
            )",
            [],
        )
        .map_err(|e| QuarterlyError::Cache(e.to_string()))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS filing_index (
                ticker TEXT NOT NULL,
                filing_id TEXT NOT NULL,
                digest TEXT NOT NULL,
                cached_at TEXT NOT NULL,
                PRIMARY KEY (ticker, filing_id)
            )",
            [],
        )
        .map_err(|e| QuarterlyError::Cache(e.to_string()))?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_filing_index_digest
             ON filing_index(digest)",
            [],
        )
        .map_err(|e| QuarterlyError::Cache(e.to_string()))?;

        debug!("SQLite cache schema initialized");
        Ok(())
    }

    /// Number of distinct documents stored.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub fn stored_documents(&self) -> Result<usize> {
        let conn = self.lock()?;
        conn.query_row("SELECT COUNT(*) FROM documents", [], |row| {
            row.get::<_, i64>(0)
        })
        .map(|n| usize::try_from(n).unwrap_or_default())
        .map_err(|e| QuarterlyError::Cache(e.to_string()))
    }
}

#[async_trait]
impl DocumentCache for SqliteCache {
    #[instrument(skip(self), fields(key = %key))]
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let conn = self.lock()?;

        let result = conn
            .query_row(
                "SELECT i.digest, d.content
                 FROM filing_index i JOIN documents d ON d.digest = i.digest
                 WHERE i.ticker = ?1 AND i.filing_id = ?2",
                params![key.ticker.as_str(), key.filing_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?)),
            )
            .optional()
            .map_err(|e| QuarterlyError::Cache(e.to_string()))?;

        match result {
            Some((digest, content)) if content_digest(&content) == digest => {
                debug!("Found cached filing document");
                Ok(Some(content))
            }
            Some(_) => {
                warn!("Cached document does not match its digest, ignoring");
                Ok(None)
            }
            None => {
                debug!("No cached filing document found");
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, content), fields(key = %key, bytes = content.len()))]
    async fn put(&self, key: &CacheKey, content: &[u8]) -> Result<()> {
        let cached_at = Utc::now().to_rfc3339();
        let digest = content_digest(content);

        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| QuarterlyError::Cache(e.to_string()))?;

        tx.execute(
            "INSERT OR IGNORE INTO documents (digest, content) VALUES (?1, ?2)",
            params![digest, content],
        )
        .map_err(|e| QuarterlyError::Cache(e.to_string()))?;

        tx.execute(
            "INSERT OR REPLACE INTO filing_index
             (ticker, filing_id, digest, cached_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![key.ticker.as_str(), key.filing_id, digest, cached_at],
        )
        .map_err(|e| QuarterlyError::Cache(e.to_string()))?;

        tx.commit()
            .map_err(|e| QuarterlyError::Cache(e.to_string()))?;

        debug!("Cached filing document");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn invalidate_stale(&self, ttl: Duration) -> Result<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(ttl)
                .map_err(|e| QuarterlyError::Cache(format!("Invalid TTL duration: {}", e)))?;
        let cutoff_str = cutoff.to_rfc3339();

        let conn = self.lock()?;

        let deleted = conn
            .execute(
                "DELETE FROM filing_index WHERE cached_at < ?1",
                params![cutoff_str],
            )
            .map_err(|e| QuarterlyError::Cache(e.to_string()))?;

        // Documents no longer referenced by any filing.
        conn.execute(
            "DELETE FROM documents
             WHERE digest NOT IN (SELECT digest FROM filing_index)",
            [],
        )
        .map_err(|e| QuarterlyError::Cache(e.to_string()))?;

        if deleted > 0 {
            debug!("Invalidated {} stale cache entries", deleted);
        }

        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn clear(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute("DELETE FROM filing_index", [])
            .map_err(|e| QuarterlyError::Cache(e.to_string()))?;
        conn.execute("DELETE FROM documents", [])
            .map_err(|e| QuarterlyError::Cache(e.to_string()))?;

        debug!("Cleared all cache entries");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarterly_core::Symbol;

    fn key(filing: &str) -> CacheKey {
        CacheKey::new(Symbol::new("WMT"), filing)
    }

    #[tokio::test]
    async fn test_sqlite_cache_initialization() {
        let cache = SqliteCache::in_memory();
        assert!(cache.is_ok());
    }

    #[tokio::test]
    async fn test_document_roundtrip() {
        let cache = SqliteCache::in_memory().unwrap();
        assert!(cache.get(&key("a")).await.unwrap().is_none());

        cache.put(&key("a"), b"<xbrl>a</xbrl>").await.unwrap();
        let cached = cache.get(&key("a")).await.unwrap();
        assert_eq!(cached.as_deref(), Some(&b"<xbrl>a</xbrl>"[..]));

        // Different ticker, same filing id.
        let other = CacheKey::new(Symbol::new("AAPL"), "a");
        assert!(cache.get(&other).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_is_idempotent_and_deduplicated() {
        let cache = SqliteCache::in_memory().unwrap();
        cache.put(&key("a"), b"same").await.unwrap();
        cache.put(&key("a"), b"same").await.unwrap();
        cache.put(&key("b"), b"same").await.unwrap();
        assert_eq!(cache.stored_documents().unwrap(), 1);

        cache.put(&key("b"), b"changed").await.unwrap();
        assert_eq!(cache.stored_documents().unwrap(), 2);
        assert_eq!(
            cache.get(&key("b")).await.unwrap().as_deref(),
            Some(&b"changed"[..])
        );
    }

    #[tokio::test]
    async fn test_digest_mismatch_is_a_miss() {
        let cache = SqliteCache::in_memory().unwrap();
        cache.put(&key("a"), b"original").await.unwrap();
        cache
            .conn
            .lock()
            .unwrap()
            .execute("UPDATE documents SET content = X'00'", [])
            .unwrap();
        assert!(cache.get(&key("a")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.db");

        {
            let cache = SqliteCache::new(&path).unwrap();
            cache.put(&key("a"), b"kept").await.unwrap();
        }

        let cache = SqliteCache::new(&path).unwrap();
        assert_eq!(
            cache.get(&key("a")).await.unwrap().as_deref(),
            Some(&b"kept"[..])
        );
    }

    #[tokio::test]
    async fn test_invalidate_stale_drops_orphans() {
        let cache = SqliteCache::in_memory().unwrap();
        cache.put(&key("a"), b"one").await.unwrap();

        let removed = cache
            .invalidate_stale(Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(removed, 0);

        tokio::time::sleep(Duration::from_millis(5)).await;
        let removed = cache.invalidate_stale(Duration::ZERO).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(cache.stored_documents().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_clear_cache() {
        let cache = SqliteCache::in_memory().unwrap();
        cache.put(&key("a"), b"one").await.unwrap();
        cache.clear().await.unwrap();
        assert!(cache.get(&key("a")).await.unwrap().is_none());
        assert_eq!(cache.stored_documents().unwrap(), 0);
    }
}
