//! Filing locator.
//!
//! Resolves a ticker, settles the filer's fiscal calendar and selects the
//! filings covering every fiscal year that has a quarter in the requested
//! range.

use chrono::{Datelike, NaiveDate};
use quarterly_core::{
    Filer, FilingRef, FilingSource, FiscalYearEnd, FormType, Issue, QuarterlyError,
    ReconciliationLog, Result, Symbol,
};
use quarterly_engine::{FiscalCalendar, check_year_range};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Filings selected for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    /// The resolved filer.
    pub filer: Filer,
    /// Fiscal calendar used to align periods.
    pub calendar: FiscalCalendar,
    /// Fiscal years with at least one quarter in range, ascending.
    pub fiscal_years: Vec<i32>,
    /// Filings for those fiscal years, filing date ascending.
    pub filings: Vec<FilingRef>,
}

/// Finds the filings needed to cover a year range.
#[derive(Debug, Clone)]
pub struct FilingLocator {
    source: Arc<dyn FilingSource>,
}

impl FilingLocator {
    /// Creates a locator over a filing source.
    #[must_use]
    pub fn new(source: Arc<dyn FilingSource>) -> Self {
        Self { source }
    }

    /// Locates the filings for `symbol` whose fiscal years touch
    /// `[start_year, end_year]`.
    ///
    /// Gaps in coverage are logged as [`Issue::IncompleteCoverage`].
    ///
    /// # Errors
    /// - [`QuarterlyError::InvalidParameter`] if `start_year > end_year` or
    ///   either year lies outside [`quarterly_engine::MIN_YEAR`]..=[`quarterly_engine::MAX_YEAR`]
    /// - [`QuarterlyError::NotFound`] if the ticker resolves to no filer
    /// - Source errors while reading the filing index
    #[instrument(skip(self, log), fields(symbol = %symbol))]
    pub async fn locate(
        &self,
        symbol: &Symbol,
        start_year: i32,
        end_year: i32,
        log: &mut ReconciliationLog,
    ) -> Result<Located> {
        check_year_range(start_year, end_year)?;

        let filer = self.source.resolve_filer(symbol).await?;
        info!(cik = %filer.cik, name = %filer.name, "Resolved filer");

        // A fiscal year touching the range can start up to a year before it.
        let since = NaiveDate::from_ymd_opt(start_year - 2, 1, 1).ok_or_else(|| {
            QuarterlyError::InvalidParameter(format!("start year {} out of range", start_year))
        })?;
        let listed = self.source.list_filings(&filer, since).await?;

        let year_end = filer
            .fiscal_year_end
            .or_else(|| infer_year_end(&listed))
            .unwrap_or_default();
        let calendar = FiscalCalendar::new(year_end);
        let fiscal_years = calendar.fiscal_years_for_range(start_year, end_year);
        debug!(
            "Fiscal year ends {:02}-{:02}; fiscal years {:?}",
            year_end.month, year_end.day, fiscal_years
        );

        let wanted: BTreeSet<i32> = fiscal_years.iter().copied().collect();
        let mut filings: Vec<FilingRef> = listed
            .into_iter()
            .filter(|f| {
                calendar
                    .locate(f.report_date)
                    .is_some_and(|(fy, _)| wanted.contains(&fy))
            })
            .collect();
        filings.sort_by(|a, b| {
            a.filing_date
                .cmp(&b.filing_date)
                .then_with(|| a.accession.cmp(&b.accession))
        });

        for issue in coverage_gaps(&calendar, &fiscal_years, &filings) {
            warn!("{}", issue);
            log.push(issue);
        }

        info!("Located {} filings", filings.len());
        Ok(Located {
            filer,
            calendar,
            fiscal_years,
            filings,
        })
    }
}

/// Infers the fiscal-year end from the most recent annual report.
fn infer_year_end(filings: &[FilingRef]) -> Option<FiscalYearEnd> {
    let latest = filings
        .iter()
        .filter(|f| f.form == FormType::Annual)
        .max_by_key(|f| f.report_date)?;
    let date = latest.report_date;
    FiscalYearEnd::new(date.month(), date.day())
}

/// One [`Issue::IncompleteCoverage`] per fiscal year lacking filings.
///
/// A quarter is covered by a quarterly filing for it; the fourth quarter is
/// also covered by the annual report.
fn coverage_gaps(calendar: &FiscalCalendar, fiscal_years: &[i32], filings: &[FilingRef]) -> Vec<Issue> {
    let mut covered: BTreeMap<i32, BTreeSet<u8>> = BTreeMap::new();
    for filing in filings {
        if let Some((fy, quarter)) = calendar.locate(filing.report_date) {
            let quarter = match filing.form {
                FormType::Annual => 4,
                FormType::Quarterly => quarter,
            };
            covered.entry(fy).or_default().insert(quarter);
        }
    }

    fiscal_years
        .iter()
        .filter_map(|fy| {
            let have = covered.get(fy);
            let missing: Vec<u8> = (1..=4)
                .filter(|q| have.is_none_or(|h| !h.contains(q)))
                .collect();
            (!missing.is_empty()).then(|| Issue::IncompleteCoverage {
                fiscal_year: *fy,
                missing_quarters: missing,
            })
        })
        .collect()
}
