//! Recoverable issues accumulated during a run.
//!
//! Only an unresolvable ticker (or an I/O failure) aborts a run. Everything
//! else is recorded here as an [`Issue`] and travels alongside the report,
//! since partial financial data is still useful.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::period::StatementKind;

/// A recoverable condition found while locating, fetching, or reconciling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Issue {
    /// A fiscal year lacks the filings needed to cover all four quarters.
    IncompleteCoverage {
        /// Fiscal year with gaps.
        fiscal_year: i32,
        /// Quarters (1-4) with no covering filing.
        missing_quarters: Vec<u8>,
    },
    /// A filing could not be retrieved after all retries.
    FetchFailed {
        /// Accession number of the filing.
        filing_id: String,
        /// Form code (e.g. `10-Q`).
        form: String,
        /// Last error message.
        reason: String,
    },
    /// A retrieved document could not be parsed.
    ParseFailed {
        /// Accession number of the filing.
        filing_id: String,
        /// Parser error message.
        reason: String,
    },
    /// A label could not be mapped to any canonical concept.
    Unresolved {
        /// Label as reported.
        label: String,
        /// Statement the label was reported on.
        statement: StatementKind,
        /// First filing the label was seen in.
        filing_id: String,
        /// Number of observations carrying the label.
        occurrences: usize,
    },
    /// A quarter's value could not be derived.
    Indeterminate {
        /// Row label.
        row: String,
        /// Column label (e.g. `3Q22`).
        quarter: String,
        /// Fiscal year of the quarter.
        fiscal_year: i32,
        /// Fiscal quarter number (1-4).
        fiscal_quarter: u8,
        /// Which inputs were missing.
        reason: String,
    },
    /// Two filings disagree on the same value; the kept one won by precedence.
    ConflictingObservation {
        /// Row label.
        row: String,
        /// End of the disputed period.
        period_end: NaiveDate,
        /// Value that was kept.
        kept_value: Decimal,
        /// Filing the kept value came from.
        kept_filing: String,
        /// Value that was discarded.
        discarded_value: Decimal,
        /// Filing the discarded value came from.
        discarded_filing: String,
    },
    /// An observation was excluded because its unit differs from its series.
    UnitMismatch {
        /// Row label.
        row: String,
        /// Unit of the excluded observation.
        unit: String,
        /// Unit used by the rest of the series.
        expected_unit: String,
        /// Filing the excluded observation came from.
        filing_id: String,
    },
    /// Four reconciled quarters do not add up to the reported annual total.
    AnnualMismatch {
        /// Row label.
        row: String,
        /// Fiscal year checked.
        fiscal_year: i32,
        /// Sum of the four quarters.
        quarters_total: Decimal,
        /// Reported annual total.
        annual_total: Decimal,
    },
}

impl Issue {
    /// Short machine-friendly name of the issue kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::IncompleteCoverage { .. } => "incomplete_coverage",
            Self::FetchFailed { .. } => "fetch_failed",
            Self::ParseFailed { .. } => "parse_failed",
            Self::Unresolved { .. } => "unresolved",
            Self::Indeterminate { .. } => "indeterminate",
            Self::ConflictingObservation { .. } => "conflicting_observation",
            Self::UnitMismatch { .. } => "unit_mismatch",
            Self::AnnualMismatch { .. } => "annual_mismatch",
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IncompleteCoverage {
                fiscal_year,
                missing_quarters,
            } => {
                let quarters: Vec<String> =
                    missing_quarters.iter().map(|q| format!("Q{q}")).collect();
                write!(
                    f,
                    "incomplete coverage for fiscal {fiscal_year}: no filing for {}",
                    quarters.join(", ")
                )
            }
            Self::FetchFailed {
                filing_id,
                form,
                reason,
            } => write!(f, "could not fetch {form} {filing_id}: {reason}"),
            Self::ParseFailed { filing_id, reason } => {
                write!(f, "could not parse {filing_id}: {reason}")
            }
            Self::Unresolved {
                label,
                statement,
                occurrences,
                ..
            } => write!(
                f,
                "unresolved label \"{label}\" ({statement}, {occurrences} observations)"
            ),
            Self::Indeterminate {
                row,
                quarter,
                reason,
                ..
            } => write!(f, "{row} {quarter} is indeterminate: {reason}"),
            Self::ConflictingObservation {
                row,
                period_end,
                kept_value,
                kept_filing,
                discarded_value,
                discarded_filing,
            } => write!(
                f,
                "{row} for period ending {period_end}: kept {kept_value} from {kept_filing}, \
                 discarded {discarded_value} from {discarded_filing}"
            ),
            Self::UnitMismatch {
                row,
                unit,
                expected_unit,
                filing_id,
            } => write!(
                f,
                "{row}: ignored value in {unit} from {filing_id} (series unit {expected_unit})"
            ),
            Self::AnnualMismatch {
                row,
                fiscal_year,
                quarters_total,
                annual_total,
            } => write!(
                f,
                "{row} fiscal {fiscal_year}: quarters sum to {quarters_total}, annual reports {annual_total}"
            ),
        }
    }
}

/// Ordered collection of [`Issue`]s for one run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReconciliationLog {
    issues: Vec<Issue>,
    #[serde(skip)]
    unresolved_index: HashMap<(StatementKind, String), usize>,
}

impl ReconciliationLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an issue.
    pub fn push(&mut self, issue: Issue) {
        if let Issue::Unresolved {
            label, statement, ..
        } = &issue
        {
            self.unresolved_index
                .insert((*statement, label.clone()), self.issues.len());
        }
        self.issues.push(issue);
    }

    /// Records one unresolved observation, folding repeats of a label into one issue.
    pub fn record_unresolved(&mut self, label: &str, statement: StatementKind, filing_id: &str) {
        let key = (statement, label.to_string());
        if let Some(&idx) = self.unresolved_index.get(&key)
            && let Some(Issue::Unresolved { occurrences, .. }) = self.issues.get_mut(idx)
        {
            *occurrences += 1;
            return;
        }
        self.push(Issue::Unresolved {
            label: label.to_string(),
            statement,
            filing_id: filing_id.to_string(),
            occurrences: 1,
        });
    }

    /// Appends every issue from `other`.
    pub fn merge(&mut self, other: Self) {
        for issue in other.issues {
            self.push(issue);
        }
    }

    /// Keeps only the issues matching `keep`.
    pub fn retain(&mut self, keep: impl FnMut(&Issue) -> bool) {
        self.issues.retain(keep);
        self.unresolved_index = self
            .issues
            .iter()
            .enumerate()
            .filter_map(|(idx, issue)| match issue {
                Issue::Unresolved {
                    label, statement, ..
                } => Some(((*statement, label.clone()), idx)),
                _ => None,
            })
            .collect();
    }

    /// Returns an iterator over the issues in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter()
    }

    /// Returns the number of issues.
    #[must_use]
    pub fn len(&self) -> usize {
        self.issues.len()
    }

    /// Returns true if no issues were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Counts issues of the given kind (see [`Issue::kind`]).
    #[must_use]
    pub fn count(&self, kind: &str) -> usize {
        self.issues.iter().filter(|i| i.kind() == kind).count()
    }
}

impl Extend<Issue> for ReconciliationLog {
    fn extend<I: IntoIterator<Item = Issue>>(&mut self, iter: I) {
        for issue in iter {
            self.push(issue);
        }
    }
}

impl<'a> IntoIterator for &'a ReconciliationLog {
    type Item = &'a Issue;
    type IntoIter = std::slice::Iter<'a, Issue>;

    fn into_iter(self) -> Self::IntoIter {
        self.issues.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_unresolved_labels_are_folded() {
        let mut log = ReconciliationLog::new();
        log.record_unresolved("wmt:MembershipIncome", StatementKind::Income, "a");
        log.record_unresolved("wmt:MembershipIncome", StatementKind::Income, "b");
        log.record_unresolved("wmt:MembershipIncome", StatementKind::Balance, "b");

        assert_eq!(log.len(), 2);
        match log.iter().next() {
            Some(Issue::Unresolved {
                occurrences,
                filing_id,
                ..
            }) => {
                assert_eq!(*occurrences, 2);
                assert_eq!(filing_id, "a");
            }
            other => panic!("unexpected issue: {other:?}"),
        }
    }

    #[test]
    fn test_retain_rebuilds_unresolved_index() {
        let mut log = ReconciliationLog::new();
        log.push(Issue::ParseFailed {
            filing_id: "x".into(),
            reason: "bad".into(),
        });
        log.record_unresolved("Other income", StatementKind::Income, "a");
        log.retain(|i| i.kind() == "unresolved");
        log.record_unresolved("Other income", StatementKind::Income, "b");

        assert_eq!(log.len(), 1);
        assert_eq!(log.count("unresolved"), 1);
    }

    #[test]
    fn test_issue_display_and_json() {
        let issue = Issue::ConflictingObservation {
            row: "Revenue".into(),
            period_end: NaiveDate::from_ymd_opt(2022, 4, 30).unwrap(),
            kept_value: dec!(141569000000),
            kept_filing: "b".into(),
            discarded_value: dec!(141500000000),
            discarded_filing: "a".into(),
        };
        assert!(issue.to_string().contains("kept 141569000000 from b"));

        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["kind"], "conflicting_observation");
        assert_eq!(json["row"], "Revenue");
    }

    #[test]
    fn test_incomplete_coverage_display() {
        let issue = Issue::IncompleteCoverage {
            fiscal_year: 2023,
            missing_quarters: vec![2, 4],
        };
        assert_eq!(
            issue.to_string(),
            "incomplete coverage for fiscal 2023: no filing for Q2, Q4"
        );
    }
}
