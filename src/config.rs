//! Build configuration.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Byte-level CSV dialect options.
///
/// Only single-byte delimiters and quotes are supported; the scanner treats
/// the input as an opaque byte sequence and never normalizes encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CsvOptions {
    /// Field delimiter (default: `b','`).
    pub delimiter: u8,
    /// Quote byte (default: `b'"'`).
    pub quote: u8,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
        }
    }
}

impl CsvOptions {
    /// Tab-separated variant.
    pub fn tsv() -> Self {
        Self {
            delimiter: b'\t',
            ..Self::default()
        }
    }

    /// Set the field delimiter.
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Set the quote byte.
    pub fn with_quote(mut self, quote: u8) -> Self {
        self.quote = quote;
        self
    }
}

/// Resource and policy knobs for the parallel builders.
///
/// `workers` fixes both the number of resync boundaries in the row-offset
/// build and the row-block partitioning of the factorizer, so the global
/// dictionary codes are deterministic for a fixed value. Holding `workers`
/// and `columns_per_slab` constant across runs reproduces identical code
/// matrices.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BuildConfig {
    /// Worker thread count for the parallel phases.
    pub workers: usize,
    /// Per-worker read buffer size in bytes (default 1 MiB). Also the
    /// starting bound on how much of a row the factorizer's token reader
    /// consumes per call.
    pub buffer_bytes: usize,
    /// Maximum columns factorized per slab; bounds the working set of one
    /// slab to `columns_per_slab * row_count` 32-bit codes plus the
    /// per-thread dictionaries.
    pub columns_per_slab: usize,
    /// Drop rows whose field count differs from the header's instead of
    /// failing the build.
    pub skip_faulty_rows: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get().max(1),
            buffer_bytes: 1 << 20,
            columns_per_slab: 64,
            skip_faulty_rows: false,
        }
    }
}

impl BuildConfig {
    /// Effective worker count (never zero).
    pub(crate) fn worker_count(&self) -> usize {
        self.workers.max(1)
    }

    /// Effective buffer size; tiny configured values are raised to a floor
    /// that keeps the readers from degenerating to per-byte syscalls.
    pub(crate) fn buffer_size(&self) -> usize {
        self.buffer_bytes.max(4096)
    }

    /// Set the worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the per-worker buffer size.
    pub fn with_buffer_bytes(mut self, bytes: usize) -> Self {
        self.buffer_bytes = bytes;
        self
    }

    /// Set the slab width.
    pub fn with_columns_per_slab(mut self, cols: usize) -> Self {
        self.columns_per_slab = cols;
        self
    }

    /// Enable or disable faulty-row skipping.
    pub fn with_skip_faulty_rows(mut self, skip: bool) -> Self {
        self.skip_faulty_rows = skip;
        self
    }
}
