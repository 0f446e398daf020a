//! Source and parser traits.
//!
//! This module defines the two external-collaborator seams of the pipeline:
//!
//! - [`FilingSource`] - Resolves a ticker and retrieves filing indices and documents
//! - [`StatementParser`] - Converts one raw document into [`LineItemObservation`]s

use async_trait::async_trait;
use chrono::NaiveDate;
use std::fmt::Debug;

use crate::{
    error::Result,
    types::{Filer, FilingDocument, FilingRef, LineItemObservation, Symbol},
};

/// A public filings index and document store.
///
/// Implementations must be safe to share across concurrent fetches; every
/// call is an independent unit of work.
#[async_trait]
pub trait FilingSource: Send + Sync + Debug {
    /// Returns the name of this source (e.g., "SEC EDGAR").
    fn name(&self) -> &str;

    /// Resolves a ticker to a filer.
    ///
    /// Returns [`QuarterlyError::NotFound`](crate::QuarterlyError::NotFound)
    /// when the ticker resolves to no filer.
    async fn resolve_filer(&self, symbol: &Symbol) -> Result<Filer>;

    /// Lists the filer's quarterly and annual filings.
    ///
    /// `since` is a hint: filings dated before it may be omitted, which lets a
    /// source skip older index pages.
    async fn list_filings(&self, filer: &Filer, since: NaiveDate) -> Result<Vec<FilingRef>>;

    /// Retrieves the raw document for one filing.
    async fn fetch_document(&self, filer: &Filer, filing: &FilingRef) -> Result<FilingDocument>;
}

/// Converts one raw filing document into observations.
///
/// Parsers are pure: the same document always yields the same observations.
pub trait StatementParser: Send + Sync + Debug {
    /// Parses a document belonging to `filing`.
    fn parse(
        &self,
        filing: &FilingRef,
        document: &FilingDocument,
    ) -> Result<Vec<LineItemObservation>>;
}
