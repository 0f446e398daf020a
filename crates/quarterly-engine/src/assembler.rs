//! Statement and summary tables.
//!
//! One row per concept (or unclassified label) with at least one value in the
//! requested quarters, one column per quarter in chronological order.

use polars::prelude::{Column, DataFrame};
use quarterly_core::{Issue, QuarterlyError, Result, StatementKind};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::calendar::FiscalQuarter;
use crate::reconciler::{Provenance, QuarterValue, ReconciledRow, Reconciliation, RowKey};
use crate::taxonomy::Taxonomy;

/// Caption of the first column of every table.
pub const LINE_ITEM_HEADER: &str = "Line Item";

/// Title of the summary table.
pub const SUMMARY_TITLE: &str = "Summary";

/// Caption of the heading row above unresolved labels.
pub const UNCLASSIFIED_HEADING: &str = "Other/Unclassified";

/// One cell of a table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Cell {
    /// A known amount.
    Value {
        /// Amount in whole units.
        value: Decimal,
        /// Whether the amount was reported or derived.
        provenance: Provenance,
    },
    /// A gap.
    Indeterminate {
        /// Which inputs were missing.
        reason: String,
    },
}

impl Cell {
    /// Returns the amount, if known.
    #[must_use]
    pub const fn value(&self) -> Option<Decimal> {
        match self {
            Self::Value { value, .. } => Some(*value),
            Self::Indeterminate { .. } => None,
        }
    }

    /// Returns true for derived amounts.
    #[must_use]
    pub const fn is_derived(&self) -> bool {
        matches!(self, Self::Value { provenance, .. } if provenance.is_derived())
    }
}

impl From<&QuarterValue> for Cell {
    fn from(value: &QuarterValue) -> Self {
        match value {
            QuarterValue::Known {
                value, provenance, ..
            } => Self::Value {
                value: *value,
                provenance: *provenance,
            },
            QuarterValue::Indeterminate { reason } => Self::Indeterminate {
                reason: reason.clone(),
            },
        }
    }
}

/// One table row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Row {
    /// Row identity.
    pub key: RowKey,
    /// Row caption.
    pub label: String,
    /// One cell per column.
    pub cells: Vec<Cell>,
}

impl Row {
    /// A caption row with no cells.
    #[must_use]
    pub fn heading(label: &str) -> Self {
        Self {
            key: RowKey::Heading(label.to_string()),
            label: label.to_string(),
            cells: Vec::new(),
        }
    }

    /// Returns true for caption rows.
    #[must_use]
    pub const fn is_heading(&self) -> bool {
        self.key.is_heading()
    }
}

/// A statement (or summary) laid out as rows by quarters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatementTable {
    /// Sheet title.
    pub title: String,
    /// Statement, or `None` for the summary.
    pub statement: Option<StatementKind>,
    /// Columns, oldest first.
    pub columns: Vec<FiscalQuarter>,
    /// Rows, in report order.
    pub rows: Vec<Row>,
}

impl StatementTable {
    /// Column headers such as `1Q22 (2022-04-30)`, without the line-item column.
    #[must_use]
    pub fn headers(&self) -> Vec<String> {
        self.columns.iter().map(FiscalQuarter::header).collect()
    }

    /// Returns true if the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns true if any cell holds a derived amount.
    #[must_use]
    pub fn has_derived(&self) -> bool {
        self.rows.iter().flat_map(|r| &r.cells).any(Cell::is_derived)
    }

    /// Returns the row for a concept id.
    #[must_use]
    pub fn concept_row(&self, id: &str) -> Option<&Row> {
        self.rows
            .iter()
            .find(|r| matches!(&r.key, RowKey::Concept(c) if c.as_str() == id))
    }

    /// One [`Issue::Indeterminate`] per gap in a canonical row.
    #[must_use]
    pub fn indeterminate_issues(&self) -> Vec<Issue> {
        let mut issues = Vec::new();
        for row in self
            .rows
            .iter()
            .filter(|r| !r.key.is_unclassified() && !r.is_heading())
        {
            for (quarter, cell) in self.columns.iter().zip(&row.cells) {
                if let Cell::Indeterminate { reason } = cell {
                    issues.push(Issue::Indeterminate {
                        row: row.label.clone(),
                        quarter: quarter.label(),
                        fiscal_year: quarter.fiscal_year,
                        fiscal_quarter: quarter.quarter,
                        reason: reason.clone(),
                    });
                }
            }
        }
        issues
    }

    /// Converts the table to a DataFrame: a `Line Item` column followed by one
    /// `f64` column per quarter, null where indeterminate. Caption rows are
    /// left out.
    pub fn to_frame(&self) -> Result<DataFrame> {
        let rows: Vec<&Row> = self.rows.iter().filter(|r| !r.is_heading()).collect();
        let labels: Vec<String> = rows.iter().map(|r| r.label.clone()).collect();
        let mut columns = vec![Column::new(LINE_ITEM_HEADER.into(), labels)];
        for (i, header) in self.headers().into_iter().enumerate() {
            let values: Vec<Option<f64>> = rows
                .iter()
                .map(|r| r.cells.get(i).and_then(Cell::value).and_then(|v| v.to_f64()))
                .collect();
            columns.push(Column::new(header.into(), values));
        }
        DataFrame::new(columns).map_err(|e| QuarterlyError::Other(e.to_string()))
    }
}

/// Options for [`assemble`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AssembleOptions {
    /// Whether unresolved labels get rows.
    pub include_unclassified: bool,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            include_unclassified: true,
        }
    }
}

fn cells_for(row: Option<&ReconciledRow>, quarters: &[FiscalQuarter]) -> Vec<Cell> {
    quarters
        .iter()
        .map(|q| match row.and_then(|r| r.value(q.fiscal_year, q.quarter)) {
            Some(value) => Cell::from(value),
            None => Cell::Indeterminate {
                reason: "not reported in any filing for the fiscal year".to_string(),
            },
        })
        .collect()
}

/// Lays out one statement.
///
/// Rows follow taxonomy order. Unclassified rows follow under an
/// [`UNCLASSIFIED_HEADING`] caption row, sorted by label. A row appears only
/// if it has a known value for at least one of `quarters`.
#[must_use]
pub fn assemble(
    statement: StatementKind,
    reconciliation: &Reconciliation,
    quarters: &[FiscalQuarter],
    taxonomy: &Taxonomy,
    options: AssembleOptions,
) -> StatementTable {
    let mut rows: Vec<(usize, &ReconciledRow)> = reconciliation
        .rows()
        .filter(|r| r.statement == statement)
        .filter(|r| options.include_unclassified || !r.key.is_unclassified())
        .filter(|r| {
            quarters
                .iter()
                .any(|q| r.value(q.fiscal_year, q.quarter).is_some_and(QuarterValue::is_known))
        })
        .map(|r| {
            let position = match &r.key {
                RowKey::Concept(id) => taxonomy.position(id).unwrap_or(usize::MAX),
                RowKey::Unclassified { .. } | RowKey::Heading(_) => usize::MAX,
            };
            (position, r)
        })
        .collect();
    rows.sort_by(|a, b| {
        a.1.key
            .is_unclassified()
            .cmp(&b.1.key.is_unclassified())
            .then_with(|| a.0.cmp(&b.0))
            .then_with(|| a.1.label.cmp(&b.1.label))
    });

    let mut table_rows = Vec::with_capacity(rows.len() + 1);
    for (_, r) in rows {
        if r.key.is_unclassified() && !table_rows.iter().any(Row::is_heading) {
            table_rows.push(Row::heading(UNCLASSIFIED_HEADING));
        }
        table_rows.push(Row {
            key: r.key.clone(),
            label: r.label.clone(),
            cells: cells_for(Some(r), quarters),
        });
    }

    StatementTable {
        title: statement.title().to_string(),
        statement: Some(statement),
        columns: quarters.to_vec(),
        rows: table_rows,
    }
}

/// Lays out the headline concepts of every statement.
///
/// Every headline gets a row, even when nothing was reported for it.
#[must_use]
pub fn summarize(
    reconciliation: &Reconciliation,
    quarters: &[FiscalQuarter],
    taxonomy: &Taxonomy,
) -> StatementTable {
    let rows = taxonomy
        .headlines()
        .map(|concept| {
            let key = RowKey::Concept(concept.id.clone());
            Row {
                cells: cells_for(reconciliation.row(&key), quarters),
                key,
                label: concept.label.clone(),
            }
        })
        .collect();

    StatementTable {
        title: SUMMARY_TITLE.to_string(),
        statement: None,
        columns: quarters.to_vec(),
        rows,
    }
}
