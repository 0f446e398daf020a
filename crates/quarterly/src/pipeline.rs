//! End-to-end extraction: locate, fetch, parse, reconcile, assemble.

use chrono::{DateTime, Utc};
use quarterly_core::{
    DocumentCache, Filer, FilingRef, FilingSource, Issue, LineItemObservation, ReconciliationLog,
    Result, StatementKind, StatementParser, Symbol,
};
use quarterly_engine::{Engine, QuarterSchedule, StatementTable};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::config::FetchConfig;
use crate::fetch::Fetcher;
use crate::locator::FilingLocator;
use crate::report::{ReportOptions, write_report};

/// Currency assumed when no monetary observation was parsed.
pub const DEFAULT_CURRENCY: &str = "USD";

/// Most frequent currency among monetary units (`USD`, and the numerator of
/// per-share units such as `USD/shares`). Ties go to the alphabetically first.
fn dominant_currency(observations: &[LineItemObservation]) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for observation in observations {
        let currency = observation
            .unit
            .split('/')
            .next()
            .unwrap_or_default()
            .trim();
        if currency.is_empty() || currency.eq_ignore_ascii_case("shares") || currency == "pure" {
            continue;
        }
        *counts.entry(currency).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(currency, _)| currency.to_string())
}

/// Everything produced for one ticker and year range.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// The resolved filer.
    pub filer: Filer,
    /// First requested year.
    pub start_year: i32,
    /// Last requested year.
    pub end_year: i32,
    /// Name of the filing source.
    pub source_name: String,
    /// Version of the taxonomy used for resolution.
    pub taxonomy_version: String,
    /// Currency of the monetary amounts, e.g. `USD`.
    pub currency: String,
    /// When the extraction ran.
    pub extracted_at: DateTime<Utc>,
    /// Filings that were located, filing date ascending.
    pub filings: Vec<FilingRef>,
    /// Income Statement, Balance Sheet and Cash Flow Statement.
    pub statements: Vec<StatementTable>,
    /// Headline concepts.
    pub summary: StatementTable,
    /// Every recoverable issue, in the order it was found.
    pub log: ReconciliationLog,
}

impl Extraction {
    /// Returns the table for one statement.
    #[must_use]
    pub fn statement(&self, kind: StatementKind) -> Option<&StatementTable> {
        self.statements.iter().find(|t| t.statement == Some(kind))
    }
}

/// Wires a filing source, parser, cache and engine together.
#[derive(Debug, Clone)]
pub struct Pipeline {
    source: Arc<dyn FilingSource>,
    parser: Arc<dyn StatementParser>,
    cache: Arc<dyn DocumentCache>,
    engine: Engine,
    fetch: FetchConfig,
}

impl Pipeline {
    /// Creates a pipeline with default fetch settings.
    #[must_use]
    pub fn new(
        source: Arc<dyn FilingSource>,
        parser: Arc<dyn StatementParser>,
        cache: Arc<dyn DocumentCache>,
        engine: Engine,
    ) -> Self {
        Self {
            source,
            parser,
            cache,
            engine,
            fetch: FetchConfig::default(),
        }
    }

    /// Sets the fetch settings.
    #[must_use]
    pub fn with_fetch_config(mut self, fetch: FetchConfig) -> Self {
        self.fetch = fetch;
        self
    }

    /// Runs the extraction for `symbol` over `[start_year, end_year]`.
    ///
    /// # Errors
    /// Fails only on fatal conditions: an unresolvable ticker, an invalid
    /// range or an unreadable filing index. Everything else is logged.
    #[instrument(skip(self), fields(symbol = %symbol))]
    pub async fn run(&self, symbol: &Symbol, start_year: i32, end_year: i32) -> Result<Extraction> {
        let mut log = ReconciliationLog::new();

        let located = FilingLocator::new(self.source.clone())
            .locate(symbol, start_year, end_year, &mut log)
            .await?;

        let fetcher = Fetcher::new(self.source.clone(), self.cache.clone())
            .with_concurrency(self.fetch.concurrency)
            .with_retry(self.fetch.retry_policy())
            .with_timeout(self.fetch.timeout());
        let documents = fetcher
            .fetch_all(&located.filer, &located.filings, &mut log)
            .await;

        let mut observations: Vec<LineItemObservation> = Vec::new();
        for (filing, document) in &documents {
            match self.parser.parse(filing, document) {
                Ok(parsed) => observations.extend(parsed),
                Err(e) => {
                    warn!(accession = %filing.accession, error = %e, "Could not parse filing");
                    log.push(Issue::ParseFailed {
                        filing_id: filing.accession.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        info!(
            "Parsed {} observations from {} filings",
            observations.len(),
            documents.len()
        );

        let currency =
            dominant_currency(&observations).unwrap_or_else(|| DEFAULT_CURRENCY.to_string());

        let schedule = QuarterSchedule::from_filings(located.calendar, &located.filings);
        let output = self
            .engine
            .run(observations, &schedule, start_year, end_year);
        log.merge(output.log);

        Ok(Extraction {
            filer: located.filer,
            start_year,
            end_year,
            source_name: self.source.name().to_string(),
            taxonomy_version: self.engine.taxonomy().version().to_string(),
            currency,
            extracted_at: Utc::now(),
            filings: located.filings,
            statements: output.statements,
            summary: output.summary,
            log,
        })
    }

    /// Runs the extraction and writes the spreadsheet.
    ///
    /// Nothing is written when the run fails.
    ///
    /// # Errors
    /// Any fatal error from [`Pipeline::run`] or from writing the report.
    pub async fn run_to_file(
        &self,
        symbol: &Symbol,
        start_year: i32,
        end_year: i32,
        path: &Path,
        options: ReportOptions,
    ) -> Result<Extraction> {
        let extraction = self.run(symbol, start_year, end_year).await?;
        write_report(&extraction, path, options)?;
        info!(path = %path.display(), "Wrote report");
        Ok(extraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use quarterly_cache::{InMemoryCache, NoopCache};
    use quarterly_core::{FilingDocument, FiscalYearEnd, FormType, QuarterlyError};
    use quarterly_engine::{Provenance, Taxonomy};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// In-memory source serving one filer with a January fiscal year end.
    #[derive(Debug)]
    struct FakeSource {
        filings: Vec<FilingRef>,
        documents: HashMap<String, Vec<u8>>,
    }

    #[async_trait]
    impl FilingSource for FakeSource {
        fn name(&self) -> &str {
            "Fake EDGAR"
        }

        async fn resolve_filer(&self, symbol: &Symbol) -> Result<Filer> {
            if symbol.as_str() != "WMT" {
                return Err(QuarterlyError::NotFound(symbol.to_string()));
            }
            Ok(Filer::new(symbol.clone(), "0000104169", "Walmart Inc.")
                .with_fiscal_year_end(FiscalYearEnd { month: 1, day: 31 }))
        }

        async fn list_filings(&self, _filer: &Filer, _since: NaiveDate) -> Result<Vec<FilingRef>> {
            Ok(self.filings.clone())
        }

        async fn fetch_document(&self, _filer: &Filer, filing: &FilingRef) -> Result<FilingDocument> {
            self.documents
                .get(&filing.accession)
                .map(|content| FilingDocument::new(filing.accession.clone(), content.clone()))
                .ok_or_else(|| QuarterlyError::Other(format!("HTTP 404 for {}", filing.accession)))
        }
    }

    /// Parses `label,start,end,value` lines; `start` empty for instants.
    #[derive(Debug)]
    struct LineParser;

    impl StatementParser for LineParser {
        fn parse(
            &self,
            filing: &FilingRef,
            document: &FilingDocument,
        ) -> Result<Vec<LineItemObservation>> {
            let text = std::str::from_utf8(&document.content)
                .map_err(|e| QuarterlyError::Parse(e.to_string()))?;
            let mut observations = Vec::new();
            for line in text.lines().filter(|l| !l.trim().is_empty()) {
                let fields: Vec<&str> = line.split(',').collect();
                let [label, start, end, value] = fields[..] else {
                    return Err(QuarterlyError::Parse(format!("bad line: {line}")));
                };
                let parse_date = |s: &str| {
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .map_err(|e| QuarterlyError::Parse(e.to_string()))
                };
                let value: Decimal = value
                    .parse()
                    .map_err(|_| QuarterlyError::Parse(format!("bad value: {value}")))?;
                let end = parse_date(end)?;
                let observation = if start.is_empty() {
                    LineItemObservation::instant(label, value, end, StatementKind::Balance, filing)
                } else {
                    LineItemObservation::flow(
                        label,
                        value,
                        parse_date(start)?,
                        end,
                        StatementKind::Income,
                        filing,
                    )
                };
                observations.push(observation);
            }
            Ok(observations)
        }
    }

    fn filing(id: &str, form: FormType, report: NaiveDate) -> FilingRef {
        FilingRef::new(id, form, report + chrono::Duration::days(35), report)
    }

    /// Fiscal 2023 (Feb 2022 - Jan 2023): Q1 direct, Q2/Q3 year-to-date, annual.
    fn fake_source() -> FakeSource {
        let filings = vec![
            filing("q1", FormType::Quarterly, date(2022, 4, 30)),
            filing("q2", FormType::Quarterly, date(2022, 7, 31)),
            filing("q3", FormType::Quarterly, date(2022, 10, 31)),
            filing("k", FormType::Annual, date(2023, 1, 31)),
        ];
        let documents = HashMap::from([
            (
                "q1".to_string(),
                b"us-gaap:Revenues,2022-02-01,2022-04-30,100\nus-gaap:Assets,,2022-04-30,900\n"
                    .to_vec(),
            ),
            (
                "q2".to_string(),
                b"Net revenues,2022-02-01,2022-07-31,250\nus-gaap:Assets,,2022-07-31,910\n".to_vec(),
            ),
            (
                "q3".to_string(),
                b"Total net sales,2022-02-01,2022-10-31,420\nus-gaap:Assets,,2022-10-31,920\n"
                    .to_vec(),
            ),
            ("k".to_string(), b"us-gaap:Revenues,2022-02-01,2023-01-31,600\n".to_vec()),
        ]);
        FakeSource { filings, documents }
    }

    fn pipeline(source: FakeSource) -> Pipeline {
        let fetch = FetchConfig {
            initial_backoff_ms: 1,
            ..FetchConfig::default()
        };
        Pipeline::new(
            Arc::new(source),
            Arc::new(LineParser),
            Arc::new(InMemoryCache::new()),
            Engine::new(Taxonomy::builtin().unwrap()),
        )
        .with_fetch_config(fetch)
    }

    #[tokio::test]
    async fn test_run_reconstructs_quarters() {
        let extraction = pipeline(fake_source())
            .run(&Symbol::new("WMT"), 2022, 2022)
            .await
            .unwrap();

        assert_eq!(extraction.filer.name, "Walmart Inc.");
        assert_eq!(extraction.source_name, "Fake EDGAR");
        assert_eq!(extraction.filings.len(), 4);

        let income = extraction.statement(StatementKind::Income).unwrap();
        assert_eq!(
            income.headers(),
            [
                "1Q22 (2022-04-30)",
                "2Q22 (2022-07-31)",
                "3Q22 (2022-10-31)",
                "4Q22 (2023-01-31)",
            ]
        );
        let revenue = income.concept_row("Revenue").unwrap();
        let values: Vec<Option<Decimal>> = revenue.cells.iter().map(|c| c.value()).collect();
        assert_eq!(
            values,
            [Some(dec!(100)), Some(dec!(150)), Some(dec!(170)), Some(dec!(180))]
        );
        assert!(!revenue.cells[0].is_derived());
        assert!(revenue.cells[1..].iter().all(|c| c.is_derived()));

        let summary_revenue = extraction.summary.concept_row("Revenue").unwrap();
        assert_eq!(summary_revenue.cells[3].value(), Some(dec!(180)));

        // Balance sheet has no Q4 instant: one indeterminate gap.
        let balance = extraction.statement(StatementKind::Balance).unwrap();
        let assets = balance.concept_row("TotalAssets").unwrap();
        assert_eq!(assets.cells[0].value(), Some(dec!(900)));
        assert!(assets.cells[3].value().is_none());
        assert!(extraction.log.count("indeterminate") >= 1);
        assert_eq!(extraction.currency, "USD");
    }

    #[test]
    fn test_dominant_currency() {
        let filing = filing("q1", FormType::Quarterly, date(2022, 4, 30));
        let flow = |unit: &str| {
            LineItemObservation::flow(
                "x",
                dec!(1),
                date(2022, 2, 1),
                date(2022, 4, 30),
                StatementKind::Income,
                &filing,
            )
            .with_unit(unit)
        };
        let observations = vec![
            flow("shares"),
            flow("shares"),
            flow("shares"),
            flow("EUR"),
            flow("EUR/shares"),
            flow("USD"),
        ];
        assert_eq!(dominant_currency(&observations), Some("EUR".to_string()));
        assert_eq!(dominant_currency(&[flow("shares")]), None);
        assert_eq!(dominant_currency(&[]), None);
    }

    #[tokio::test]
    async fn test_fetch_and_parse_failures_degrade_coverage() {
        let mut source = fake_source();
        source.documents.remove("q2");
        source
            .documents
            .insert("q3".to_string(), b"not,a,valid\n".to_vec());

        let extraction = pipeline(source)
            .run(&Symbol::new("WMT"), 2022, 2022)
            .await
            .unwrap();

        assert_eq!(extraction.log.count("fetch_failed"), 1);
        assert_eq!(extraction.log.count("parse_failed"), 1);

        let income = extraction.statement(StatementKind::Income).unwrap();
        let revenue = income.concept_row("Revenue").unwrap();
        assert_eq!(revenue.cells[0].value(), Some(dec!(100)));
        assert!(revenue.cells[1].value().is_none());
        assert!(matches!(
            revenue.cells[0],
            quarterly_engine::Cell::Value {
                provenance: Provenance::Direct,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unknown_ticker_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zzzz_quarterly_2022_2025.xlsx");

        let pipeline = Pipeline::new(
            Arc::new(fake_source()),
            Arc::new(LineParser),
            Arc::new(NoopCache::new()),
            Engine::new(Taxonomy::builtin().unwrap()),
        );
        let err = pipeline
            .run_to_file(
                &Symbol::new("ZZZZ-NOTREAL"),
                2022,
                2025,
                &path,
                ReportOptions::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, QuarterlyError::NotFound(_)));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_run_to_file_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wmt_quarterly_2022_2022.xlsx");

        let extraction = pipeline(fake_source())
            .run_to_file(
                &Symbol::new("WMT"),
                2022,
                2022,
                &path,
                ReportOptions {
                    annotate_provenance: true,
                },
            )
            .await
            .unwrap();

        assert!(path.exists());
        assert_eq!(extraction.statements.len(), 3);
    }
}
