//! Typed failures raised by the index builders.
//!
//! Every fallible operation in the crate returns [`Result`]. Workers never
//! abort the process on bad input; width mismatches and I/O failures travel
//! back to the caller as values, after the phase join when raised inside a
//! worker.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The source file, an output file, or an expected intermediate artifact
    /// could not be opened, created, or read.
    #[error("cannot access {}: {source}", path.display())]
    InputUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A header lookup past the last column, or a header index file whose
    /// size does not match its record stride.
    #[error("header index {index} out of range (column count {count})")]
    IndexOutOfRange { index: usize, count: usize },

    /// A data row's field count does not match the header's column count and
    /// faulty-row skipping is disabled.
    #[error("row at byte {at} has {found} fields; header has {expected}")]
    WidthMismatch {
        at: u64,
        expected: usize,
        found: usize,
    },

    /// A single field exceeds the maximum token size the bounded reader is
    /// willing to buffer.
    #[error("field at byte {at} exceeds the {limit}-byte token limit")]
    BufferTooSmall { at: u64, limit: usize },

    /// A header token does not fit the fixed `(u32 start, u16 length)` entry
    /// schema.
    #[error("header token at byte {at} exceeds the header index entry limits")]
    HeaderTooLarge { at: u64 },

    /// A post-condition failed after a build phase; indicates a bug, not bad
    /// input. Partial output files should be considered invalid.
    #[error("internal invariant violated: {0}")]
    InternalInvariantViolation(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::InputUnavailable {
            path: path.into(),
            source,
        }
    }
}
