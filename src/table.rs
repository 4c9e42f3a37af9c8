//! Whole-table build façade.
//!
//! [`TableIndex`] owns the source path, the output directory, and the build
//! configuration, and runs the three stages in order: header index, row
//! offsets, factorization. Each stage persists its artifact under the
//! output directory; a stage invoked on a fresh handle picks up the earlier
//! artifacts from disk, so builds can be resumed across processes.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::{BuildConfig, CsvOptions};
use crate::error::{Error, Result};
use crate::factor::{self, FactorReport};
use crate::header::{build_header_index, HeaderIndex, HEADER_INDEX_FILE};
use crate::offsets::{self, RowOffsetIndex, ROW_OFFSETS_FILE};

/// Summary of a full three-stage build.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BuildReport {
    /// Columns found in the header row.
    pub columns: usize,
    /// Data rows accepted by width validation.
    pub rows: u64,
    /// Factorization slabs written.
    pub slabs: usize,
}

/// Builder and accessor for the on-disk index of one CSV file.
#[derive(Clone, Debug)]
pub struct TableIndex {
    csv_path: PathBuf,
    output_dir: PathBuf,
    options: CsvOptions,
    config: BuildConfig,
    header: Option<HeaderIndex>,
    rows: Option<RowOffsetIndex>,
}

impl TableIndex {
    pub fn new(csv_path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            csv_path: csv_path.into(),
            output_dir: output_dir.into(),
            options: CsvOptions::default(),
            config: BuildConfig::default(),
            header: None,
            rows: None,
        }
    }

    /// Set the CSV dialect.
    pub fn with_options(mut self, options: CsvOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the build configuration.
    pub fn with_config(mut self, config: BuildConfig) -> Self {
        self.config = config;
        self
    }

    /// Source file path.
    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }

    /// Artifact directory.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Stage 1: scan the header row and persist the header index. Returns
    /// the column count.
    pub fn parse_header(&mut self) -> Result<usize> {
        fs::create_dir_all(&self.output_dir).map_err(|e| Error::io(&self.output_dir, e))?;
        let index = build_header_index(
            &self.csv_path,
            &self.output_dir.join(HEADER_INDEX_FILE),
            &self.options,
            self.config.buffer_size(),
        )?;
        let count = index.count();
        self.header = Some(index);
        Ok(count)
    }

    /// Column count, if the header stage has run (or been loaded).
    pub fn column_count(&self) -> Option<usize> {
        self.header.as_ref().map(HeaderIndex::count)
    }

    /// Header text of column `i`.
    pub fn header(&self, i: usize) -> Result<String> {
        self.header_index()?.get(i)
    }

    /// All header strings in column order.
    pub fn headers(&self) -> Result<Vec<String>> {
        self.header_index()?.headers()
    }

    /// Column position of the header equal to `name`.
    pub fn column_index(&self, name: &str) -> Result<Option<usize>> {
        self.header_index()?.find(name)
    }

    /// Stage 2: locate and persist every data row's start offset. Returns
    /// the accepted row count.
    pub fn build_row_offsets(&mut self) -> Result<u64> {
        fs::create_dir_all(&self.output_dir).map_err(|e| Error::io(&self.output_dir, e))?;
        let ncols = self.ensure_header()?.count();
        let index = offsets::build_row_offsets(
            &self.csv_path,
            &self.output_dir,
            ncols,
            &self.options,
            &self.config,
        )?;
        let rows = index.row_count();
        self.rows = Some(index);
        Ok(rows)
    }

    /// Accepted row count, if the offset stage has run (or been loaded).
    pub fn row_count(&self) -> Option<u64> {
        self.rows.as_ref().map(RowOffsetIndex::row_count)
    }

    /// Stage 3: factorize every column into global integer codes.
    pub fn factorize(&mut self) -> Result<FactorReport> {
        fs::create_dir_all(&self.output_dir).map_err(|e| Error::io(&self.output_dir, e))?;
        let ncols = self.ensure_header()?.count();
        let offsets = self.ensure_rows()?.load()?;
        factor::factorize(
            &self.csv_path,
            &self.output_dir,
            ncols,
            &offsets,
            &self.options,
            &self.config,
        )
    }

    /// Run all three stages.
    pub fn build(&mut self) -> Result<BuildReport> {
        let columns = self.parse_header()?;
        let rows = self.build_row_offsets()?;
        let report = self.factorize()?;
        info!(columns, rows, slabs = report.slabs, "table index built");
        Ok(BuildReport {
            columns,
            rows,
            slabs: report.slabs,
        })
    }

    fn header_index(&self) -> Result<HeaderIndex> {
        match &self.header {
            Some(h) => Ok(h.clone()),
            None => HeaderIndex::load(
                &self.csv_path,
                &self.output_dir.join(HEADER_INDEX_FILE),
                &self.options,
            ),
        }
    }

    fn ensure_header(&mut self) -> Result<&HeaderIndex> {
        if self.header.is_none() {
            self.header = Some(HeaderIndex::load(
                &self.csv_path,
                &self.output_dir.join(HEADER_INDEX_FILE),
                &self.options,
            )?);
        }
        Ok(self.header.as_ref().expect("just set"))
    }

    fn ensure_rows(&mut self) -> Result<&RowOffsetIndex> {
        if self.rows.is_none() {
            self.rows = Some(RowOffsetIndex::open(
                &self.output_dir.join(ROW_OFFSETS_FILE),
            )?);
        }
        Ok(self.rows.as_ref().expect("just set"))
    }
}
