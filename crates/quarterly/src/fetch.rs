//! Concurrent document retrieval with caching and retries.

use futures::stream::{self, StreamExt};
use quarterly_core::{
    CacheKey, DocumentCache, Filer, FilingDocument, FilingRef, FilingSource, Issue,
    QuarterlyError, ReconciliationLog, Result,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per document, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Delay before retrying `error`, honoring a server-provided `Retry-After`.
    fn delay_for(&self, error: &QuarterlyError, attempt: u32) -> Duration {
        match error {
            QuarterlyError::RateLimited {
                retry_after: Some(wait),
                ..
            } => (*wait).min(self.max_backoff),
            _ => self.backoff(attempt),
        }
    }
}

/// Downloads filing documents, cache first.
///
/// Documents are fetched independently of each other; one failing filing only
/// degrades coverage and is reported as [`Issue::FetchFailed`].
#[derive(Debug, Clone)]
pub struct Fetcher {
    source: Arc<dyn FilingSource>,
    cache: Arc<dyn DocumentCache>,
    concurrency: usize,
    retry: RetryPolicy,
    timeout: Duration,
}

impl Fetcher {
    /// Creates a fetcher with default concurrency (4), retries and timeout.
    #[must_use]
    pub fn new(source: Arc<dyn FilingSource>, cache: Arc<dyn DocumentCache>) -> Self {
        Self {
            source,
            cache,
            concurrency: 4,
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the maximum number of concurrent downloads.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fetches every filing's document.
    ///
    /// Returns successfully retrieved documents in the order of `filings`.
    /// Failures are logged to `log`.
    pub async fn fetch_all(
        &self,
        filer: &Filer,
        filings: &[FilingRef],
        log: &mut ReconciliationLog,
    ) -> Vec<(FilingRef, FilingDocument)> {
        let mut results: Vec<(usize, Result<FilingDocument>)> = stream::iter(filings.iter().enumerate())
            .map(|(i, filing)| async move { (i, self.fetch_one(filer, filing).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        results.sort_by_key(|(i, _)| *i);

        let mut documents = Vec::with_capacity(results.len());
        for (i, result) in results {
            let filing = &filings[i];
            match result {
                Ok(document) => documents.push((filing.clone(), document)),
                Err(e) => {
                    warn!(
                        accession = %filing.accession,
                        error = %e,
                        "Giving up on filing"
                    );
                    log.push(Issue::FetchFailed {
                        filing_id: filing.accession.clone(),
                        form: filing.form_code(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        documents
    }

    /// Fetches one document, consulting the cache first.
    #[instrument(skip(self, filer, filing), fields(accession = %filing.accession))]
    pub async fn fetch_one(&self, filer: &Filer, filing: &FilingRef) -> Result<FilingDocument> {
        let key = CacheKey::new(filer.symbol.clone(), filing.accession.clone());

        match self.cache.get(&key).await {
            Ok(Some(content)) => {
                debug!("Cache hit for filing document");
                return Ok(FilingDocument::new(filing.accession.clone(), content));
            }
            Ok(None) => debug!("Cache miss for filing document"),
            Err(e) => warn!(error = %e, "Cache read failed, fetching from source"),
        }

        let document = self.fetch_with_retry(filer, filing).await?;

        if let Err(e) = self.cache.put(&key, &document.content).await {
            warn!(error = %e, "Failed to cache filing document");
        }
        Ok(document)
    }

    async fn fetch_with_retry(&self, filer: &Filer, filing: &FilingRef) -> Result<FilingDocument> {
        let mut attempt = 1;
        loop {
            let result =
                match tokio::time::timeout(self.timeout, self.source.fetch_document(filer, filing))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(QuarterlyError::Network(format!(
                        "timed out after {:?}",
                        self.timeout
                    ))),
                };

            match result {
                Ok(document) => return Ok(document),
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(&e, attempt);
                    warn!(
                        attempt,
                        error = %e,
                        "Fetch failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use quarterly_cache::InMemoryCache;
    use quarterly_core::{FormType, Symbol};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Source whose documents fail a scripted number of times first.
    #[derive(Debug, Default)]
    struct FlakySource {
        failures: Mutex<HashMap<String, (usize, QuarterlyError)>>,
        calls: AtomicUsize,
    }

    impl FlakySource {
        fn failing(self, accession: &str, times: usize, error: QuarterlyError) -> Self {
            self.failures
                .lock()
                .unwrap()
                .insert(accession.to_string(), (times, error));
            self
        }
    }

    #[async_trait]
    impl FilingSource for FlakySource {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn resolve_filer(&self, symbol: &Symbol) -> Result<Filer> {
            Ok(Filer::new(symbol.clone(), "0000000001", "Test Co"))
        }

        async fn list_filings(&self, _filer: &Filer, _since: NaiveDate) -> Result<Vec<FilingRef>> {
            Ok(Vec::new())
        }

        async fn fetch_document(
            &self,
            _filer: &Filer,
            filing: &FilingRef,
        ) -> Result<FilingDocument> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut failures = self.failures.lock().unwrap();
            if let Some((remaining, error)) = failures.get_mut(&filing.accession)
                && *remaining > 0
            {
                *remaining -= 1;
                return Err(match error {
                    QuarterlyError::Network(m) => QuarterlyError::Network(m.clone()),
                    QuarterlyError::RateLimited {
                        source_name,
                        retry_after,
                    } => QuarterlyError::RateLimited {
                        source_name: source_name.clone(),
                        retry_after: *retry_after,
                    },
                    other => QuarterlyError::Other(other.to_string()),
                });
            }
            Ok(FilingDocument::new(
                filing.accession.clone(),
                format!("<doc {}/>", filing.accession).into_bytes(),
            ))
        }
    }

    fn filing(accession: &str) -> FilingRef {
        let date = NaiveDate::from_ymd_opt(2022, 6, 3).unwrap();
        FilingRef::new(accession, FormType::Quarterly, date, date)
    }

    fn filer() -> Filer {
        Filer::new(Symbol::new("TEST"), "0000000001", "Test Co")
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
        assert_eq!(policy.backoff(10), Duration::from_secs(8));
    }

    #[test]
    fn test_retry_after_is_honored() {
        let policy = RetryPolicy::default();
        let limited = QuarterlyError::RateLimited {
            source_name: "SEC EDGAR".into(),
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(policy.delay_for(&limited, 1), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let source = Arc::new(FlakySource::default().failing(
            "a",
            2,
            QuarterlyError::Network("reset".into()),
        ));
        let fetcher = Fetcher::new(source.clone(), Arc::new(InMemoryCache::new()))
            .with_retry(fast_retry());

        let mut log = ReconciliationLog::new();
        let documents = fetcher.fetch_all(&filer(), &[filing("a")], &mut log).await;
        assert_eq!(documents.len(), 1);
        assert!(log.is_empty());
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_degrade_coverage() {
        let source = Arc::new(FlakySource::default().failing(
            "b",
            10,
            QuarterlyError::Network("reset".into()),
        ));
        let fetcher = Fetcher::new(source.clone(), Arc::new(InMemoryCache::new()))
            .with_retry(fast_retry());

        let mut log = ReconciliationLog::new();
        let documents = fetcher
            .fetch_all(&filer(), &[filing("a"), filing("b"), filing("c")], &mut log)
            .await;

        let fetched: Vec<&str> = documents.iter().map(|(f, _)| f.accession.as_str()).collect();
        assert_eq!(fetched, ["a", "c"]);
        assert_eq!(log.count("fetch_failed"), 1);
        // One call each for a and c, three for b.
        assert_eq!(source.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_permanent_failures_are_not_retried() {
        let source = Arc::new(FlakySource::default().failing(
            "a",
            10,
            QuarterlyError::Other("HTTP 404".into()),
        ));
        let fetcher = Fetcher::new(source.clone(), Arc::new(InMemoryCache::new()))
            .with_retry(fast_retry());

        let mut log = ReconciliationLog::new();
        let documents = fetcher.fetch_all(&filer(), &[filing("a")], &mut log).await;
        assert!(documents.is_empty());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_source() {
        let source = Arc::new(FlakySource::default());
        let cache = Arc::new(InMemoryCache::new());
        let fetcher = Fetcher::new(source.clone(), cache.clone()).with_concurrency(2);

        let mut log = ReconciliationLog::new();
        let first = fetcher.fetch_all(&filer(), &[filing("a")], &mut log).await;
        let second = fetcher.fetch_all(&filer(), &[filing("a")], &mut log).await;

        assert_eq!(first, second);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stored_documents().await, 1);
    }
}
