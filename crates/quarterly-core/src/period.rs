//! Filing form and statement classification.
//!
//! This module defines [`FormType`] for the kinds of filings the pipeline
//! consumes, [`StatementKind`] for the three primary statements, and
//! [`ConceptNature`] for the flow/instant distinction.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of periodic filing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FormType {
    /// Quarterly report (10-Q).
    Quarterly,
    /// Annual report (10-K).
    Annual,
}

impl FormType {
    /// Parses an index form code, returning the form type and whether it is an amendment.
    ///
    /// Returns `None` for forms that carry no periodic financial statements.
    #[must_use]
    pub fn from_form(form: &str) -> Option<(Self, bool)> {
        match form.trim() {
            "10-Q" => Some((Self::Quarterly, false)),
            "10-Q/A" => Some((Self::Quarterly, true)),
            "10-K" => Some((Self::Annual, false)),
            "10-K/A" => Some((Self::Annual, true)),
            _ => None,
        }
    }

    /// Returns the form code (without amendment suffix).
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Quarterly => "10-Q",
            Self::Annual => "10-K",
        }
    }
}

impl fmt::Display for FormType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One of the three primary financial statements.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    /// Income statement.
    Income,
    /// Balance sheet.
    Balance,
    /// Cash flow statement.
    CashFlow,
}

impl StatementKind {
    /// All statements, in report order.
    pub const ALL: [Self; 3] = [Self::Income, Self::Balance, Self::CashFlow];

    /// Returns the sheet title for this statement.
    #[must_use]
    pub const fn title(&self) -> &'static str {
        match self {
            Self::Income => "Income Statement",
            Self::Balance => "Balance Sheet",
            Self::CashFlow => "Cash Flow Statement",
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// Whether a concept is measured at a point in time or accumulated over a period.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConceptNature {
    /// Point-in-time balance (balance sheet items).
    Instant,
    /// Amount accumulated over the period (income and cash flow items).
    Flow,
}

impl ConceptNature {
    /// Returns the nature matching an observation's `is_instant` flag.
    #[must_use]
    pub const fn of(is_instant: bool) -> Self {
        if is_instant { Self::Instant } else { Self::Flow }
    }

    /// Returns true if this is an instant concept.
    #[must_use]
    pub const fn is_instant(&self) -> bool {
        matches!(self, Self::Instant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_parsing() {
        assert_eq!(
            FormType::from_form("10-Q"),
            Some((FormType::Quarterly, false))
        );
        assert_eq!(FormType::from_form("10-K/A"), Some((FormType::Annual, true)));
        assert_eq!(FormType::from_form("8-K"), None);
        assert_eq!(FormType::Annual.to_string(), "10-K");
    }

    #[test]
    fn test_nature_of() {
        assert!(ConceptNature::of(true).is_instant());
        assert_eq!(ConceptNature::of(false), ConceptNature::Flow);
    }
}
