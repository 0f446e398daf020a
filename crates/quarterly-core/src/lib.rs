#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/quarterly/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Core traits and types for quarterly financial statement reconstruction.
//!
//! This crate provides the foundational abstractions shared by every stage of
//! the pipeline:
//!
//! - [`FilingSource`](source::FilingSource) - Resolves tickers and retrieves raw filing documents
//! - [`StatementParser`](source::StatementParser) - Turns one filing document into observations
//! - [`DocumentCache`](cache::DocumentCache) - Content-addressed store of downloaded documents
//! - [`ReconciliationLog`](log::ReconciliationLog) - Recoverable conditions collected during a run

/// Cache trait and content addressing for downloaded filing documents.
pub mod cache;
/// Error types for fatal conditions.
pub mod error;
/// Recoverable issues accumulated during a run.
pub mod log;
/// Filing form and statement classification.
pub mod period;
/// Source and parser traits.
pub mod source;
/// Core data types (Symbol, Filer, FilingRef, LineItemObservation, etc.).
pub mod types;

// Re-export commonly used items at crate root
pub use cache::{CacheKey, DocumentCache, content_digest};
pub use error::{QuarterlyError, Result};
pub use log::{Issue, ReconciliationLog};
pub use period::{ConceptNature, FormType, StatementKind};
pub use source::{FilingSource, StatementParser};
pub use types::{
    ConceptId, Filer, FilingDocument, FilingRef, FiscalYearEnd, LineItemObservation, Symbol,
};
