#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/quarterly/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Resolution, reconciliation and assembly of quarterly statements.
//!
//! The stages are independent and pure:
//!
//! - [`Resolver`](resolver::Resolver) - Maps reported labels onto the [`Taxonomy`](taxonomy::Taxonomy)
//! - [`Reconciler`](reconciler::Reconciler) - Derives one value per concept and fiscal quarter
//! - [`assemble`](assembler::assemble) / [`summarize`](assembler::summarize) - Lay values out as tables
//!
//! [`Engine`] runs them in sequence.

/// Statement and summary tables.
pub mod assembler;
/// Fiscal calendar arithmetic.
pub mod calendar;
/// Period reconciliation.
pub mod reconciler;
/// Line-item resolution.
pub mod resolver;
/// Canonical concept taxonomy.
pub mod taxonomy;

pub use assembler::{AssembleOptions, Cell, Row, StatementTable, assemble, summarize};
pub use calendar::{
    FiscalCalendar, FiscalQuarter, MAX_YEAR, MIN_YEAR, QuarterSchedule, check_year_range,
};
pub use reconciler::{
    Derivation, Provenance, QuarterValue, Reconciler, Reconciliation, RowKey, Tolerance,
};
pub use resolver::{MatchTier, Resolver};
pub use taxonomy::{CanonicalConcept, Taxonomy};

use quarterly_core::{LineItemObservation, ReconciliationLog, StatementKind};

/// Tables produced by one [`Engine::run`].
#[derive(Clone, Debug)]
pub struct EngineOutput {
    /// Income Statement, Balance Sheet and Cash Flow Statement, in that order.
    pub statements: Vec<StatementTable>,
    /// Headline concepts.
    pub summary: StatementTable,
    /// Issues found while resolving, reconciling and assembling.
    pub log: ReconciliationLog,
}

impl EngineOutput {
    /// Returns the table for one statement.
    #[must_use]
    pub fn statement(&self, kind: StatementKind) -> Option<&StatementTable> {
        self.statements.iter().find(|t| t.statement == Some(kind))
    }
}

/// Runs resolution, reconciliation and assembly over a set of observations.
#[derive(Clone, Debug)]
pub struct Engine {
    taxonomy: Taxonomy,
    reconciler: Reconciler,
    options: AssembleOptions,
}

impl Engine {
    /// Creates an engine with default tolerance and options.
    #[must_use]
    pub fn new(taxonomy: Taxonomy) -> Self {
        Self {
            taxonomy,
            reconciler: Reconciler::default(),
            options: AssembleOptions::default(),
        }
    }

    /// Sets the assembly options.
    #[must_use]
    pub const fn with_options(mut self, options: AssembleOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the comparison tolerance.
    #[must_use]
    pub const fn with_tolerance(mut self, tolerance: Tolerance) -> Self {
        self.reconciler = Reconciler::new(tolerance);
        self
    }

    /// Returns the taxonomy.
    #[must_use]
    pub const fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    /// Builds every table for the quarters whose label year lies in
    /// `[start_year, end_year]`.
    #[must_use]
    pub fn run(
        &self,
        observations: Vec<LineItemObservation>,
        schedule: &QuarterSchedule,
        start_year: i32,
        end_year: i32,
    ) -> EngineOutput {
        let mut log = ReconciliationLog::new();

        let resolved = Resolver::new(&self.taxonomy).resolve_all(observations, &mut log);
        let series = reconciler::build_series(&self.taxonomy, resolved);

        let quarters = schedule.quarters_in_range(start_year, end_year);
        let mut fiscal_years: Vec<i32> = quarters.iter().map(|q| q.fiscal_year).collect();
        fiscal_years.dedup();

        let reconciliation = self.reconciler.reconcile(&series, schedule, &fiscal_years);

        let statements: Vec<StatementTable> = StatementKind::ALL
            .iter()
            .map(|kind| assemble(*kind, &reconciliation, &quarters, &self.taxonomy, self.options))
            .collect();
        let summary = summarize(&reconciliation, &quarters, &self.taxonomy);

        log.merge(reconciliation.log);
        for table in &statements {
            log.extend(table.indeterminate_issues());
        }

        EngineOutput {
            statements,
            summary,
            log,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use quarterly_core::{FilingRef, FiscalYearEnd, FormType};
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_engine_run_for_january_year_end() {
        let engine = Engine::new(Taxonomy::builtin().unwrap());
        let calendar = FiscalCalendar::new(FiscalYearEnd { month: 1, day: 31 });
        let q1 = FilingRef::new("q1", FormType::Quarterly, date(2022, 6, 3), date(2022, 4, 30));
        let schedule = QuarterSchedule::from_filings(calendar, std::slice::from_ref(&q1));

        let observations = vec![
            LineItemObservation::flow(
                "us-gaap:Revenues",
                dec!(141569000000),
                date(2022, 2, 1),
                date(2022, 4, 30),
                StatementKind::Income,
                &q1,
            ),
            LineItemObservation::instant(
                "us-gaap:Assets",
                dec!(249000000000),
                date(2022, 4, 30),
                StatementKind::Balance,
                &q1,
            ),
        ];

        let output = engine.run(observations, &schedule, 2022, 2022);
        assert_eq!(output.statements.len(), 3);

        let income = output.statement(StatementKind::Income).unwrap();
        assert_eq!(income.headers()[0], "1Q22 (2022-04-30)");
        assert_eq!(
            income.concept_row("Revenue").unwrap().cells[0].value(),
            Some(dec!(141569000000))
        );
        assert!(output.statement(StatementKind::CashFlow).unwrap().is_empty());

        assert_eq!(output.summary.rows.len(), 4);
        // Revenue and Total Assets each miss three quarters.
        assert_eq!(output.log.count("indeterminate"), 6);
    }
}
