#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/quarterly/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Quarter-by-quarter financial statements from SEC filings.
//!
//! This crate wires a [`FilingSource`], a [`StatementParser`] and a
//! [`DocumentCache`] into a [`Pipeline`] that locates the filings for a
//! ticker, downloads them, reconciles cumulative and annual figures into
//! discrete quarters and writes a four-sheet xlsx workbook.
//!
//! # Features
//!
//! - `edgar` - SEC EDGAR source and XBRL instance parser (default)
//! - `cache-sqlite` - SQLite-based document caching (default)
//!
//! # Example
//!
//! ```no_run
//! use quarterly::{
//!     EdgarSource, Engine, InMemoryCache, Pipeline, ReportOptions, Symbol, Taxonomy,
//!     XbrlInstanceParser,
//! };
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> quarterly::Result<()> {
//!     let pipeline = Pipeline::new(
//!         Arc::new(EdgarSource::new("Research Desk research@example.com")?),
//!         Arc::new(XbrlInstanceParser::new()),
//!         Arc::new(InMemoryCache::new()),
//!         Engine::new(Taxonomy::builtin()?),
//!     );
//!
//!     let extraction = pipeline
//!         .run_to_file(
//!             &Symbol::new("WMT"),
//!             2022,
//!             2025,
//!             Path::new("wmt_quarterly_2022_2025.xlsx"),
//!             ReportOptions::default(),
//!         )
//!         .await?;
//!     println!("{} issues", extraction.log.len());
//!
//!     Ok(())
//! }
//! ```

/// Layered run configuration.
pub mod config;
/// Concurrent retrieval with caching and retries.
pub mod fetch;
/// Filing selection for a year range.
pub mod locator;
/// End-to-end extraction.
pub mod pipeline;
/// Spreadsheet output.
pub mod report;

pub use config::{CacheConfig, Config, FetchConfig, OutputConfig, USER_AGENT_ENV};
pub use fetch::{Fetcher, RetryPolicy};
pub use locator::{FilingLocator, Located};
pub use pipeline::{Extraction, Pipeline};
pub use report::{ReportOptions, write_report};

// Core types and traits
pub use quarterly_core::*;

// Engine
pub use quarterly_engine::{
    AssembleOptions, Cell, Engine, EngineOutput, FiscalCalendar, FiscalQuarter, Provenance,
    QuarterSchedule, StatementTable, Taxonomy, Tolerance,
};

// Cache implementations
#[cfg(feature = "cache-sqlite")]
pub use quarterly_cache::SqliteCache;
pub use quarterly_cache::{InMemoryCache, NoopCache};

// Source
#[cfg(feature = "edgar")]
pub use quarterly_edgar::{EdgarSource, XbrlInstanceParser};
