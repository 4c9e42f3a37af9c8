//! # tabgrid
//!
//! Streaming CSV indexing and columnar factorization for delimiter-separated
//! files that do not fit comfortably in memory.
//!
//! One pass over the source file builds three artifacts that together enable
//! random access and columnar analytics without rescanning:
//!
//! - a **header index** ([`header`]): per column, the byte range of the raw
//!   header token;
//! - a **row-offset index** ([`offsets`]): the absolute byte offset of every
//!   well-formed data row, built by parallel workers over disjoint byte
//!   ranges;
//! - a **column factorization** ([`factor`]): per column, dense integer
//!   codes standing in for the textual values, with deterministic code
//!   assignment.
//!
//! All three rest on a byte-level CSV state machine ([`scanner`]) that is
//! correct across arbitrary buffer boundaries: quoted fields containing
//! delimiters and newlines, doubled-quote escapes, and CRLF/LF/lone-CR
//! terminators.
//!
//! ## Quick start
//!
//! ```no_run
//! use tabgrid::{BuildConfig, TableIndex};
//!
//! # fn main() -> tabgrid::Result<()> {
//! let mut table = TableIndex::new("big.csv", "big_index")
//!     .with_config(BuildConfig::default().with_workers(8));
//! let report = table.build()?;
//! println!("{} columns, {} rows", report.columns, report.rows);
//! assert_eq!(table.header(0)?, table.headers()?[0]);
//! # Ok(())
//! # }
//! ```
//!
//! The stages can also be driven individually ([`TableIndex::parse_header`],
//! [`TableIndex::build_row_offsets`], [`TableIndex::factorize`]) or through
//! the per-stage free functions when the façade is not wanted.
//!
//! ## Determinism
//!
//! For a fixed [`BuildConfig::workers`] and
//! [`BuildConfig::columns_per_slab`], repeated builds of the same input
//! produce byte-identical artifacts; the row-offset index is additionally
//! identical for *any* worker count.

pub mod config;
pub mod error;
pub mod factor;
pub mod header;
pub mod offsets;
pub mod scanner;
pub mod table;

mod read;

pub use config::{BuildConfig, CsvOptions};
pub use error::{Error, Result};
pub use factor::{factorize, FactorReport, COLUMN_CHUNK_META_FILE};
pub use header::{build_header_index, HeaderIndex, HEADER_INDEX_FILE};
pub use offsets::{build_row_offsets, first_data_offset, RowOffsetIndex, ROW_OFFSETS_FILE};
pub use table::{BuildReport, TableIndex};
