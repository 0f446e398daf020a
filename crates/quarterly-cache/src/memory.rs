//! In-memory cache implementation.

use async_trait::async_trait;
use chrono::Utc;
use quarterly_core::{CacheKey, DocumentCache, Result, content_digest};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

/// Cache entry with timestamp for TTL-based invalidation.
#[derive(Debug, Clone)]
struct CacheEntry<T> {
    data: T,
    cached_at: chrono::DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    fn is_stale(&self, ttl: Duration) -> bool {
        let age = Utc::now().signed_duration_since(self.cached_at);
        age > chrono::TimeDelta::from_std(ttl).unwrap_or(chrono::TimeDelta::MAX)
    }
}

/// Simple in-memory cache for testing and development.
///
/// Documents live in a digest-keyed map and the (ticker, filing id) index
/// points into it. Everything is lost when the cache is dropped.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    index: RwLock<HashMap<CacheKey, CacheEntry<String>>>,
    documents: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryCache {
    /// Create a new empty in-memory cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct documents stored.
    pub async fn stored_documents(&self) -> usize {
        self.documents.read().await.len()
    }

    async fn drop_orphans(&self) {
        let index = self.index.read().await;
        let mut documents = self.documents.write().await;
        documents.retain(|digest, _| index.values().any(|e| &e.data == digest));
    }
}

#[async_trait]
impl DocumentCache for InMemoryCache {
    #[instrument(skip(self), fields(key = %key))]
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let Some(digest) = self.index.read().await.get(key).map(|e| e.data.clone()) else {
            debug!("Cache miss for filing document");
            return Ok(None);
        };

        let documents = self.documents.read().await;
        match documents.get(&digest) {
            Some(content) if content_digest(content) == digest => {
                debug!("Cache hit for filing document");
                Ok(Some(content.clone()))
            }
            Some(_) => {
                warn!("Cached document does not match its digest, ignoring");
                Ok(None)
            }
            None => {
                debug!("Cache miss for filing document");
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, content), fields(key = %key, bytes = content.len()))]
    async fn put(&self, key: &CacheKey, content: &[u8]) -> Result<()> {
        let digest = content_digest(content);
        self.documents
            .write()
            .await
            .entry(digest.clone())
            .or_insert_with(|| content.to_vec());
        self.index
            .write()
            .await
            .insert(key.clone(), CacheEntry::new(digest));
        debug!("Cached filing document");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn invalidate_stale(&self, ttl: Duration) -> Result<usize> {
        let removed = {
            let mut index = self.index.write().await;
            let before = index.len();
            index.retain(|_, entry| !entry.is_stale(ttl));
            before - index.len()
        };
        self.drop_orphans().await;

        if removed > 0 {
            debug!("Invalidated {} stale cache entries", removed);
        }
        Ok(removed)
    }

    #[instrument(skip(self))]
    async fn clear(&self) -> Result<()> {
        self.index.write().await.clear();
        self.documents.write().await.clear();
        debug!("Cleared all cache entries");
        Ok(())
    }
}
