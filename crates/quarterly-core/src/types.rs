//! Core data types for filings and reported facts.
//!
//! This module defines the fundamental data structures:
//!
//! - [`Symbol`] - Trading symbol/ticker
//! - [`Filer`] - A resolved registrant with its fiscal-year end
//! - [`FilingRef`] - Metadata for one periodic filing
//! - [`FilingDocument`] - Raw bytes of a retrieved filing document
//! - [`ConceptId`] - Identifier of a canonical financial concept
//! - [`LineItemObservation`] - One reported fact

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::period::{FormType, StatementKind};

/// A trading symbol/ticker.
///
/// Symbols are automatically trimmed and uppercased on creation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    /// Creates a new symbol from a string, converting to uppercase.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into().trim().to_uppercase())
    }

    /// Returns the symbol as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Symbol {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Month and day on which a filer's fiscal year ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FiscalYearEnd {
    /// Month (1-12).
    pub month: u32,
    /// Day of month (1-31).
    pub day: u32,
}

impl FiscalYearEnd {
    /// Creates a fiscal-year end, returning `None` for an impossible month or day.
    #[must_use]
    pub fn new(month: u32, day: u32) -> Option<Self> {
        ((1..=12).contains(&month) && (1..=31).contains(&day)).then_some(Self { month, day })
    }

    /// Parses the `MMDD` form used by filing indices (e.g. `"0131"`).
    #[must_use]
    pub fn parse_mmdd(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.len() != 4 || !s.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let month = s[..2].parse().ok()?;
        let day = s[2..].parse().ok()?;
        Self::new(month, day)
    }
}

impl Default for FiscalYearEnd {
    fn default() -> Self {
        Self { month: 12, day: 31 }
    }
}

/// A resolved registrant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filer {
    /// Ticker the filer was resolved from.
    pub symbol: Symbol,
    /// SEC CIK number, zero-padded to 10 digits.
    pub cik: String,
    /// Registrant name.
    pub name: String,
    /// Declared fiscal-year end, when the index provides one.
    pub fiscal_year_end: Option<FiscalYearEnd>,
}

impl Filer {
    /// Creates a filer with required fields.
    #[must_use]
    pub fn new(symbol: Symbol, cik: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            symbol,
            cik: cik.into(),
            name: name.into(),
            fiscal_year_end: None,
        }
    }

    /// Sets the declared fiscal-year end.
    #[must_use]
    pub const fn with_fiscal_year_end(mut self, fye: FiscalYearEnd) -> Self {
        self.fiscal_year_end = Some(fye);
        self
    }
}

/// Metadata for one periodic filing.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilingRef {
    /// Accession number; the filing's stable identifier.
    pub accession: String,
    /// Quarterly or annual.
    pub form: FormType,
    /// Whether this is an amended filing.
    pub amendment: bool,
    /// Date the filing was submitted.
    pub filing_date: NaiveDate,
    /// End of the filing's primary reporting period.
    pub report_date: NaiveDate,
    /// Name of the primary document within the filing.
    pub primary_document: String,
}

impl FilingRef {
    /// Creates a filing reference.
    #[must_use]
    pub fn new(
        accession: impl Into<String>,
        form: FormType,
        filing_date: NaiveDate,
        report_date: NaiveDate,
    ) -> Self {
        Self {
            accession: accession.into(),
            form,
            amendment: false,
            filing_date,
            report_date,
            primary_document: String::new(),
        }
    }

    /// Sets the primary document name.
    #[must_use]
    pub fn with_primary_document(mut self, document: impl Into<String>) -> Self {
        self.primary_document = document.into();
        self
    }

    /// Marks this filing as an amendment.
    #[must_use]
    pub const fn as_amendment(mut self) -> Self {
        self.amendment = true;
        self
    }

    /// Returns the form code as it appears in the index (e.g. `10-Q/A`).
    #[must_use]
    pub fn form_code(&self) -> String {
        if self.amendment {
            format!("{}/A", self.form.code())
        } else {
            self.form.code().to_string()
        }
    }
}

/// Raw bytes of a retrieved filing document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilingDocument {
    /// Accession number of the filing the document belongs to.
    pub accession: String,
    /// Document content.
    pub content: Vec<u8>,
}

impl FilingDocument {
    /// Creates a document.
    #[must_use]
    pub fn new(accession: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            accession: accession.into(),
            content,
        }
    }
}

/// Identifier of a canonical financial concept (e.g. `Revenue`, `TotalAssets`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConceptId(String);

impl ConceptId {
    /// Creates a concept identifier.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConceptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConceptId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// One reported fact from one filing.
///
/// Observations are produced by a [`StatementParser`](crate::source::StatementParser)
/// and never mutated afterwards; resolution produces a new value through
/// [`with_concept`](Self::with_concept).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemObservation {
    /// Label as reported (a table caption or a namespaced element name).
    pub raw_label: String,
    /// Canonical concept, once resolved.
    pub canonical_concept: Option<ConceptId>,
    /// Reported value, before scale normalization.
    pub value: Decimal,
    /// Unit of measure (e.g. `USD`, `shares`, `USD/shares`).
    pub unit: String,
    /// Power of ten the value must be multiplied by to reach whole units.
    pub scale: i32,
    /// Start of the reported period (equal to `period_end` for instants).
    pub period_start: NaiveDate,
    /// End of the reported period.
    pub period_end: NaiveDate,
    /// Statement the fact was reported on.
    pub statement_kind: StatementKind,
    /// True for point-in-time balances.
    pub is_instant: bool,
    /// Accession number of the source filing.
    pub source_filing_id: String,
    /// Filing date of the source filing.
    pub filed_on: NaiveDate,
    /// Primary period end of the source filing.
    pub filing_period_end: NaiveDate,
}

impl LineItemObservation {
    /// Creates a flow observation reported over `[start, end]`.
    #[must_use]
    pub fn flow(
        raw_label: impl Into<String>,
        value: Decimal,
        period_start: NaiveDate,
        period_end: NaiveDate,
        statement_kind: StatementKind,
        filing: &FilingRef,
    ) -> Self {
        Self {
            raw_label: raw_label.into(),
            canonical_concept: None,
            value,
            unit: "USD".to_string(),
            scale: 0,
            period_start,
            period_end,
            statement_kind,
            is_instant: false,
            source_filing_id: filing.accession.clone(),
            filed_on: filing.filing_date,
            filing_period_end: filing.report_date,
        }
    }

    /// Creates an instant observation as of `date`.
    #[must_use]
    pub fn instant(
        raw_label: impl Into<String>,
        value: Decimal,
        date: NaiveDate,
        statement_kind: StatementKind,
        filing: &FilingRef,
    ) -> Self {
        Self {
            is_instant: true,
            ..Self::flow(raw_label, value, date, date, statement_kind, filing)
        }
    }

    /// Sets the unit of measure.
    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Sets the reporting scale (power of ten).
    #[must_use]
    pub const fn with_scale(mut self, scale: i32) -> Self {
        self.scale = scale;
        self
    }

    /// Returns a copy of this observation resolved to `concept`.
    #[must_use]
    pub fn with_concept(&self, concept: ConceptId) -> Self {
        Self {
            canonical_concept: Some(concept),
            ..self.clone()
        }
    }

    /// Returns the value expressed in whole units.
    #[must_use]
    pub fn normalized_value(&self) -> Decimal {
        let exponent = self.scale.unsigned_abs().min(18);
        let factor = Decimal::from(10_i64.pow(exponent));
        if self.scale >= 0 {
            self.value * factor
        } else {
            self.value / factor
        }
    }

    /// Returns the length of the reported period in days (0 for instants).
    #[must_use]
    pub fn duration_days(&self) -> i64 {
        (self.period_end - self.period_start).num_days()
    }

    /// Returns true if the unit is a ratio such as `USD/shares`.
    #[must_use]
    pub fn is_ratio_unit(&self) -> bool {
        self.unit.contains('/')
    }
}
