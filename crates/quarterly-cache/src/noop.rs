//! No-op cache implementation.

use async_trait::async_trait;
use quarterly_core::{CacheKey, DocumentCache, Result};
use std::time::Duration;
use tracing::trace;

/// Cache that stores no documents.
///
/// Every lookup misses, so each filing is downloaded on every run. Selected by
/// `--no-cache` or `cache.enabled = false`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

impl NoopCache {
    /// Create a new no-op cache.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DocumentCache for NoopCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        trace!(%key, "NoopCache: get called, returning None");
        Ok(None)
    }

    async fn put(&self, key: &CacheKey, _content: &[u8]) -> Result<()> {
        trace!(%key, "NoopCache: put called, doing nothing");
        Ok(())
    }

    async fn invalidate_stale(&self, _ttl: Duration) -> Result<usize> {
        trace!("NoopCache: invalidate_stale called, returning 0");
        Ok(0)
    }

    async fn clear(&self) -> Result<()> {
        trace!("NoopCache: clear called, doing nothing");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarterly_core::Symbol;

    #[tokio::test]
    async fn test_noop_cache_stores_nothing() {
        let cache = NoopCache::new();
        let key = CacheKey::new(Symbol::new("WMT"), "0000104169-22-000011");

        assert!(cache.put(&key, b"<xbrl/>").await.is_ok());
        assert!(cache.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_noop_cache_management() {
        let cache = NoopCache::new();

        let removed = cache
            .invalidate_stale(Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(removed, 0);
        assert!(cache.clear().await.is_ok());
    }
}
