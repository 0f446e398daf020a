#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/quarterly/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! SEC EDGAR filing source and XBRL parser.
//!
//! This crate provides:
//!
//! - CIK (Central Index Key) lookup from ticker symbols
//! - Filing indices from the EDGAR submissions API, including older pages
//! - Retrieval of each filing's XBRL instance document
//! - Parsing of XBRL instances into line-item observations
//!
//! # Example
//!
//! ```no_run
//! use chrono::NaiveDate;
//! use quarterly_core::{FilingSource, StatementParser, Symbol};
//! use quarterly_edgar::{EdgarSource, XbrlInstanceParser};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = EdgarSource::new("MyApp/1.0 (contact@example.com)")?;
//!
//!     let filer = source.resolve_filer(&Symbol::new("WMT")).await?;
//!     let since = NaiveDate::from_ymd_opt(2022, 1, 1).unwrap();
//!     let filings = source.list_filings(&filer, since).await?;
//!
//!     if let Some(filing) = filings.last() {
//!         let document = source.fetch_document(&filer, filing).await?;
//!         let observations = XbrlInstanceParser::new().parse(filing, &document)?;
//!         println!("{} observations in {}", observations.len(), filing.accession);
//!     }
//!
//!     Ok(())
//! }
//! ```

mod source;
mod xbrl;

pub use source::EdgarSource;
pub use xbrl::XbrlInstanceParser;
