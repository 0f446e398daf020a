//! EDGAR filing source.

use async_trait::async_trait;
use chrono::NaiveDate;
use quarterly_core::{
    Filer, FilingDocument, FilingRef, FilingSource, FiscalYearEnd, FormType, QuarterlyError,
    Result, Symbol,
};
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tracing::{debug, instrument, warn};

/// Host serving tickers and filing archives.
const WWW_BASE_URL: &str = "https://www.sec.gov";

/// Host serving the submissions API.
const DATA_BASE_URL: &str = "https://data.sec.gov";

/// Default rate limit: 10 requests per second (SEC requirement)
const DEFAULT_RATE_LIMIT: Duration = Duration::from_millis(100);

/// Default per-request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const SOURCE_NAME: &str = "SEC EDGAR";

/// Rate limiter to ensure we don't exceed SEC's rate limits
#[derive(Debug)]
struct RateLimiter {
    last_request: Instant,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            last_request: now.checked_sub(min_interval).unwrap_or(now),
            min_interval,
        }
    }

    async fn wait(&mut self) {
        let elapsed = self.last_request.elapsed();
        if elapsed < self.min_interval {
            sleep(self.min_interval - elapsed).await;
        }
        self.last_request = Instant::now();
    }
}

/// SEC EDGAR filing source.
///
/// Resolves tickers, lists 10-Q/10-K filings and downloads each filing's XBRL
/// instance. Request starts are serialized through a shared rate limiter
/// (max 10 requests/second), so a single source can be shared by concurrent
/// fetches.
#[derive(Debug, Clone)]
pub struct EdgarSource {
    client: reqwest::Client,
    rate_limiter: Arc<Mutex<RateLimiter>>,
    www_base: String,
    data_base: String,
}

impl EdgarSource {
    /// Create a new EDGAR source with the specified user agent.
    ///
    /// The SEC requires identifying user agent headers. Format should be:
    /// "AppName/Version (contact@email.com)"
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(user_agent: &str) -> Result<Self> {
        Self::with_timeout(user_agent, DEFAULT_TIMEOUT)
    }

    /// Create a new EDGAR source with a per-request timeout.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_timeout(user_agent: &str, timeout: Duration) -> Result<Self> {
        if user_agent.trim().is_empty() {
            return Err(QuarterlyError::Config(
                "SEC EDGAR requires a user agent identifying the requester".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| QuarterlyError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(client))
    }

    /// Create a new EDGAR source with a pre-configured HTTP client.
    ///
    /// The client must already carry an identifying user agent.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new(DEFAULT_RATE_LIMIT))),
            www_base: WWW_BASE_URL.to_string(),
            data_base: DATA_BASE_URL.to_string(),
        }
    }

    /// Points the source at other hosts (for mirrors and tests).
    #[must_use]
    pub fn with_base_urls(mut self, www: impl Into<String>, data: impl Into<String>) -> Self {
        self.www_base = www.into().trim_end_matches('/').to_string();
        self.data_base = data.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the minimum interval between request starts.
    #[must_use]
    pub fn with_rate_limit(mut self, min_interval: Duration) -> Self {
        self.rate_limiter = Arc::new(Mutex::new(RateLimiter::new(min_interval)));
        self
    }

    /// Issues a rate-limited GET and maps HTTP failures into errors.
    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        self.rate_limiter.lock().await.wait().await;

        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| QuarterlyError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            warn!("Rate limited by {} (retry after {:?})", SOURCE_NAME, retry_after);
            return Err(QuarterlyError::RateLimited {
                source_name: SOURCE_NAME.to_string(),
                retry_after,
            });
        }

        if status.is_server_error() {
            Err(QuarterlyError::Network(format!("HTTP {} for {}", status, url)))
        } else {
            Err(QuarterlyError::Other(format!("HTTP {} for {}", status, url)))
        }
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let bytes = self
            .get(url)
            .await?
            .bytes()
            .await
            .map_err(|e| QuarterlyError::Network(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let bytes = self.get_bytes(url).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| QuarterlyError::Parse(format!("Failed to parse {}: {}", url, e)))
    }

    /// Look up a company's CIK and name from its ticker symbol.
    async fn lookup_ticker(&self, symbol: &Symbol) -> Result<(String, String)> {
        let url = format!("{}/files/company_tickers.json", self.www_base);
        let data: HashMap<String, CompanyTickerInfo> = self.get_json(&url).await?;

        data.into_values()
            .find(|company| company.ticker.eq_ignore_ascii_case(symbol.as_str()))
            .map(|company| (format!("{:0>10}", company.cik_str), company.title))
            .ok_or_else(|| QuarterlyError::NotFound(symbol.to_string()))
    }

    /// Fetch company submissions/filings metadata.
    async fn fetch_submissions(&self, cik: &str) -> Result<CompanySubmissions> {
        let url = format!("{}/submissions/CIK{:0>10}.json", self.data_base, cik);
        self.get_json(&url).await
    }

    /// Picks the XBRL instance out of a filing's directory listing.
    async fn locate_instance(&self, filer: &Filer, filing: &FilingRef) -> Result<String> {
        let base = archive_base(&self.www_base, filer, filing);
        let index: FilingIndex = self.get_json(&format!("{}/index.json", base)).await?;
        let names: Vec<&str> = index
            .directory
            .item
            .iter()
            .map(|item| item.name.as_str())
            .collect();

        select_instance(&names)
            .map(|name| format!("{}/{}", base, name))
            .ok_or_else(|| {
                QuarterlyError::Parse(format!(
                    "No XBRL instance in filing {}",
                    filing.accession
                ))
            })
    }
}

#[async_trait]
impl FilingSource for EdgarSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    #[instrument(skip(self), fields(symbol = %symbol))]
    async fn resolve_filer(&self, symbol: &Symbol) -> Result<Filer> {
        if symbol.as_str().is_empty() {
            return Err(QuarterlyError::InvalidParameter("Empty ticker".to_string()));
        }

        let (cik, title) = self.lookup_ticker(symbol).await?;
        debug!("Found CIK {} for ticker {}", cik, symbol);

        let submissions = self.fetch_submissions(&cik).await?;
        let name = if submissions.name.is_empty() {
            title
        } else {
            submissions.name
        };
        let mut filer = Filer::new(symbol.clone(), cik, name);
        if let Some(fye) = submissions
            .fiscal_year_end
            .as_deref()
            .and_then(FiscalYearEnd::parse_mmdd)
        {
            filer = filer.with_fiscal_year_end(fye);
        }
        Ok(filer)
    }

    #[instrument(skip(self, filer), fields(cik = %filer.cik))]
    async fn list_filings(&self, filer: &Filer, since: NaiveDate) -> Result<Vec<FilingRef>> {
        let submissions = self.fetch_submissions(&filer.cik).await?;

        let mut filings = submissions.filings.recent.into_filing_refs(since);

        // Older filings live in additional pages, newest first.
        for page in &submissions.filings.files {
            let reaches_range = parse_date(&page.filing_to).is_none_or(|to| to >= since);
            if !reaches_range {
                continue;
            }
            let url = format!("{}/submissions/{}", self.data_base, page.name);
            debug!("Fetching older filings page {}", page.name);
            let columns: FilingColumns = self.get_json(&url).await?;
            filings.extend(columns.into_filing_refs(since));
        }

        filings.sort_by(|a, b| {
            a.filing_date
                .cmp(&b.filing_date)
                .then_with(|| a.accession.cmp(&b.accession))
        });
        filings.dedup_by(|a, b| a.accession == b.accession);

        debug!("Found {} periodic filings", filings.len());
        Ok(filings)
    }

    #[instrument(skip(self, filer, filing), fields(accession = %filing.accession))]
    async fn fetch_document(&self, filer: &Filer, filing: &FilingRef) -> Result<FilingDocument> {
        let url = self.locate_instance(filer, filing).await?;
        let content = self.get_bytes(&url).await?;
        debug!("Downloaded {} bytes", content.len());
        Ok(FilingDocument::new(filing.accession.clone(), content))
    }
}

fn archive_base(www_base: &str, filer: &Filer, filing: &FilingRef) -> String {
    let cik = filer.cik.trim_start_matches('0');
    let accession = filing.accession.replace('-', "");
    format!("{}/Archives/edgar/data/{}/{}", www_base, cik, accession)
}

/// Chooses the XBRL instance among a filing's files.
///
/// Inline filings publish an extracted instance named `*_htm.xml`; older
/// filings ship a standalone `.xml` instance next to the linkbases.
fn select_instance<'a>(names: &[&'a str]) -> Option<&'a str> {
    const LINKBASE_SUFFIXES: [&str; 5] = ["_cal.xml", "_def.xml", "_lab.xml", "_pre.xml", ".xsd"];

    if let Some(name) = names.iter().copied().find(|n| n.ends_with("_htm.xml")) {
        return Some(name);
    }

    names
        .iter()
        .filter(|n| n.ends_with(".xml"))
        .filter(|n| !LINKBASE_SUFFIXES.iter().any(|s| n.ends_with(s)))
        .filter(|n| !n.eq_ignore_ascii_case("FilingSummary.xml"))
        .find(|n| !is_rendered_report(n))
        .copied()
}

/// Matches the `R1.xml`, `R2.xml` rendering pages of older filings.
fn is_rendered_report(name: &str) -> bool {
    name.strip_prefix('R')
        .and_then(|rest| rest.strip_suffix(".xml"))
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

// =============================================================================
// SEC API Response Types
// =============================================================================

/// Company ticker information from SEC JSON.
#[derive(Debug, Deserialize)]
struct CompanyTickerInfo {
    /// CIK as a number (SEC returns this as an integer)
    cik_str: u64,
    /// Ticker symbol
    ticker: String,
    /// Company name
    title: String,
}

/// Company submissions/filings metadata.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompanySubmissions {
    /// Company name
    #[serde(default)]
    name: String,
    /// Fiscal year end as `MMDD`
    #[serde(default)]
    fiscal_year_end: Option<String>,
    /// Filing index
    filings: SubmissionFilings,
}

#[derive(Debug, Deserialize)]
struct SubmissionFilings {
    recent: FilingColumns,
    #[serde(default)]
    files: Vec<FilingPage>,
}

/// Reference to an additional page of older filings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilingPage {
    name: String,
    #[serde(default)]
    filing_to: String,
}

/// Column-oriented filing list, as returned by the submissions API.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilingColumns {
    #[serde(default)]
    accession_number: Vec<String>,
    #[serde(default)]
    filing_date: Vec<String>,
    #[serde(default)]
    report_date: Vec<String>,
    #[serde(default)]
    form: Vec<String>,
    #[serde(default)]
    primary_document: Vec<String>,
}

impl FilingColumns {
    /// Keeps 10-Q/10-K filings (and amendments) reporting on or after `since`.
    fn into_filing_refs(self, since: NaiveDate) -> Vec<FilingRef> {
        let mut refs = Vec::new();
        for (i, accession) in self.accession_number.iter().enumerate() {
            let Some((form, amendment)) = self.form.get(i).and_then(|f| FormType::from_form(f))
            else {
                continue;
            };
            let dates = (
                self.filing_date.get(i).and_then(|d| parse_date(d)),
                self.report_date.get(i).and_then(|d| parse_date(d)),
            );
            let (Some(filing_date), Some(report_date)) = dates else {
                warn!("Skipping filing {} with missing dates", accession);
                continue;
            };
            if report_date < since {
                continue;
            }

            let mut filing = FilingRef::new(accession.clone(), form, filing_date, report_date);
            if let Some(document) = self.primary_document.get(i) {
                filing = filing.with_primary_document(document.clone());
            }
            if amendment {
                filing = filing.as_amendment();
            }
            refs.push(filing);
        }
        refs
    }
}

/// Directory listing of one filing.
#[derive(Debug, Deserialize)]
struct FilingIndex {
    directory: FilingDirectory,
}

#[derive(Debug, Deserialize)]
struct FilingDirectory {
    #[serde(default)]
    item: Vec<FilingItem>,
}

#[derive(Debug, Deserialize)]
struct FilingItem {
    name: String,
}

// =============================================================================
// Tests
// =============================================================================
