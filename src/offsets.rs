//! Row-offset indexing.
//!
//! Locates the absolute byte offset of every well-formed data row and
//! persists them as a packed little-endian `u64` array in source order.
//!
//! The file is split into near-equal byte ranges, one per worker. Each
//! worker except the first resynchronizes its nominal start to the next true
//! row boundary; the ranges then tile the data region at row boundaries, so
//! each worker emits its offsets to a private part file and the part files
//! concatenate, in worker order, into a globally sorted index. Rows whose
//! field count differs from the header's are either dropped or fail the
//! build, per configuration; blank (whitespace-only) rows are always
//! dropped.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::{debug, info, warn};

use crate::config::{BuildConfig, CsvOptions};
use crate::error::{Error, Result};
use crate::read::{bom_offset, ByteReader};
use crate::scanner::{Scanner, Step};

/// File name of the row-offset artifact.
pub const ROW_OFFSETS_FILE: &str = "row_offsets.bin";

/// Bytes per row-offset entry.
pub const ROW_OFFSET_STRIDE: u64 = 8;

/// Transient per-worker output, merged and deleted by the build.
pub(crate) fn part_file_name(worker: usize) -> String {
    format!("row_offsets_thread_{worker}.bin")
}

/// Handle over a built (or previously persisted) row-offset index.
#[derive(Clone, Debug)]
pub struct RowOffsetIndex {
    path: PathBuf,
    rows: u64,
}

impl RowOffsetIndex {
    /// Open an existing `row_offsets.bin`.
    pub fn open(path: &Path) -> Result<Self> {
        let meta = fs::metadata(path).map_err(|e| Error::io(path, e))?;
        if meta.len() % ROW_OFFSET_STRIDE != 0 {
            return Err(Error::InternalInvariantViolation(format!(
                "row-offset file {} is {} bytes, not a multiple of the {}-byte stride",
                path.display(),
                meta.len(),
                ROW_OFFSET_STRIDE
            )));
        }
        Ok(Self {
            path: path.to_owned(),
            rows: meta.len() / ROW_OFFSET_STRIDE,
        })
    }

    /// Number of accepted data rows.
    pub fn row_count(&self) -> u64 {
        self.rows
    }

    /// Path of the packed offset file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole offset array into memory.
    pub fn load(&self) -> Result<Vec<u64>> {
        let mut bytes = Vec::new();
        File::open(&self.path)
            .and_then(|mut f| f.read_to_end(&mut bytes))
            .map_err(|e| Error::io(&self.path, e))?;
        if bytes.len() % ROW_OFFSET_STRIDE as usize != 0 {
            return Err(Error::InternalInvariantViolation(format!(
                "row-offset file {} changed size mid-read",
                self.path.display()
            )));
        }
        Ok(bytes
            .chunks_exact(ROW_OFFSET_STRIDE as usize)
            .map(|c| u64::from_le_bytes(c.try_into().expect("chunk is 8 bytes")))
            .collect())
    }
}

/// Offset of the first data byte: one past the header row's terminator, or
/// the file size when the header row is unterminated.
pub fn first_data_offset(csv_path: &Path, opts: &CsvOptions, buffer_bytes: usize) -> Result<u64> {
    let origin = bom_offset(csv_path)?;
    let mut reader = ByteReader::open(csv_path, origin, buffer_bytes)?;
    let mut scanner = Scanner::default();
    while let Some(c) = reader.peek()? {
        match scanner.step(c, opts) {
            Step::Rescan => continue,
            Step::RowEnd { consumed: false } => return Ok(reader.pos()),
            Step::RowEnd { consumed: true } => return Ok(reader.pos() + 1),
            _ => reader.bump(),
        }
    }
    // Trailing CR counts as a terminator; either way the next row would
    // start at EOF.
    let _ = scanner.finish();
    Ok(reader.pos())
}

/// Build `row_offsets.bin` under `out_dir`, validating every data row
/// against `expected_cols`. Returns the index handle; its row count is the
/// number of accepted rows.
pub fn build_row_offsets(
    csv_path: &Path,
    out_dir: &Path,
    expected_cols: usize,
    opts: &CsvOptions,
    cfg: &BuildConfig,
) -> Result<RowOffsetIndex> {
    let file_size = fs::metadata(csv_path)
        .map_err(|e| Error::io(csv_path, e))?
        .len();
    let buffer = cfg.buffer_size();
    let first_data = first_data_offset(csv_path, opts, buffer)?;
    let workers = cfg.worker_count();
    ThreadPoolBuilder::new()
        .num_threads(workers)
        .build_global()
        .ok();

    // Nominal split of [first_data, file_size) into near-equal ranges.
    let data_bytes = file_size - first_data;
    let base = data_bytes / workers as u64;
    let rem = data_bytes % workers as u64;
    let mut starts = Vec::with_capacity(workers);
    let mut s = first_data;
    for t in 0..workers {
        starts.push(s);
        s += base + u64::from((t as u64) < rem);
    }

    // Resync every split point except the first to a true row boundary.
    let mut handoffs = vec![0u64; workers + 1];
    handoffs[0] = first_data;
    handoffs[workers] = file_size;
    let resynced: Vec<u64> = (1..workers)
        .into_par_iter()
        .map(|t| resync_to_next_row_start(csv_path, starts[t], file_size, opts, buffer))
        .collect::<Result<_>>()?;
    handoffs[1..workers].copy_from_slice(&resynced);
    debug!(?handoffs, "row-offset handoffs");

    // Parse phase: one part file per worker.
    let counts: Vec<u64> = (0..workers)
        .into_par_iter()
        .map(|t| {
            let part = out_dir.join(part_file_name(t));
            parse_range(
                csv_path,
                &part,
                handoffs[t],
                handoffs[t + 1],
                file_size,
                expected_cols,
                opts,
                cfg,
            )
        })
        .collect::<Result<_>>()?;

    // Merge part files in worker order and delete them.
    let final_path = out_dir.join(ROW_OFFSETS_FILE);
    let out = File::create(&final_path).map_err(|e| Error::io(&final_path, e))?;
    let mut out = BufWriter::new(out);
    for t in 0..workers {
        let part = out_dir.join(part_file_name(t));
        let mut f = File::open(&part).map_err(|e| Error::io(&part, e))?;
        std::io::copy(&mut f, &mut out).map_err(|e| Error::io(&part, e))?;
        fs::remove_file(&part).map_err(|e| Error::io(&part, e))?;
    }
    out.flush().map_err(|e| Error::io(&final_path, e))?;

    let rows: u64 = counts.iter().sum();
    let written = fs::metadata(&final_path)
        .map_err(|e| Error::io(&final_path, e))?
        .len();
    if written != rows * ROW_OFFSET_STRIDE {
        return Err(Error::InternalInvariantViolation(format!(
            "row-offset file is {written} bytes for {rows} rows"
        )));
    }
    info!(
        rows,
        workers,
        path = %final_path.display(),
        "row-offset index built"
    );
    Ok(RowOffsetIndex {
        path: final_path,
        rows,
    })
}

/// Advance from an arbitrary offset to the first byte of the next true row.
///
/// The only ambiguous landing byte is a quote: it may close a quoted field
/// that began before `start`, stand for half of an escaped pair inside such
/// a field, or open a fresh quoted field. A window of at most two lookahead
/// bytes decides between those cases; afterwards a plain scan finds the next
/// unquoted terminator.
fn resync_to_next_row_start(
    csv_path: &Path,
    start: u64,
    file_size: u64,
    opts: &CsvOptions,
    buffer: usize,
) -> Result<u64> {
    if start >= file_size {
        return Ok(file_size);
    }
    let mut r = ByteReader::open(csv_path, start, buffer)?;
    let scanner;
    let first = r.peek()?.expect("start < file_size");
    if first == opts.quote {
        r.bump();
        match r.peek()? {
            // Closing quote at EOF: no further row.
            None => return Ok(file_size),
            Some(b'\n') => {
                r.bump();
                return Ok(r.pos());
            }
            Some(b'\r') => {
                r.bump();
                if r.peek()? == Some(b'\n') {
                    r.bump();
                }
                return Ok(r.pos());
            }
            Some(c) if c == opts.delimiter => {
                // The quote closed the previous field; keep scanning
                // unquoted after the delimiter.
                r.bump();
                scanner = Scanner::default();
            }
            Some(c) if c == opts.quote => {
                r.bump();
                match r.peek()? {
                    // `""` then EOF: an empty quoted field ends the file.
                    None => return Ok(file_size),
                    Some(b'\n') => {
                        r.bump();
                        return Ok(r.pos());
                    }
                    Some(b'\r') => {
                        r.bump();
                        if r.peek()? == Some(b'\n') {
                            r.bump();
                        }
                        return Ok(r.pos());
                    }
                    Some(c2) if c2 == opts.delimiter => {
                        r.bump();
                        scanner = Scanner::default();
                    }
                    // `""` followed by content: an escaped quote inside a
                    // field that opened before `start`.
                    Some(_) => scanner = Scanner::mid_quoted_field(),
                }
            }
            // The quote opened a new field.
            Some(_) => scanner = Scanner::mid_quoted_field(),
        }
    } else {
        scanner = Scanner::default();
    }
    scan_to_row_end(r, scanner, opts)
}

fn scan_to_row_end(mut r: ByteReader, mut scanner: Scanner, opts: &CsvOptions) -> Result<u64> {
    while let Some(c) = r.peek()? {
        match scanner.step(c, opts) {
            Step::Rescan => continue,
            Step::RowEnd { consumed: false } => return Ok(r.pos()),
            Step::RowEnd { consumed: true } => return Ok(r.pos() + 1),
            _ => r.bump(),
        }
    }
    Ok(r.pos())
}

/// Scan `[start, end)` and append the offset of every accepted row to the
/// worker's part file. Returns the accepted row count.
#[allow(clippy::too_many_arguments)]
fn parse_range(
    csv_path: &Path,
    part_path: &Path,
    start: u64,
    end: u64,
    file_size: u64,
    expected_cols: usize,
    opts: &CsvOptions,
    cfg: &BuildConfig,
) -> Result<u64> {
    let out = File::create(part_path).map_err(|e| Error::io(part_path, e))?;
    let mut out = BufWriter::new(out);
    let mut rows = 0u64;
    if start >= end {
        out.flush().map_err(|e| Error::io(part_path, e))?;
        return Ok(0);
    }

    let mut r = ByteReader::open(csv_path, start, cfg.buffer_size())?;
    let mut scanner = Scanner::default();
    let mut row_start = start;
    let mut commas = 0usize;
    let mut not_blank = false;

    let mut finalize = |row_start: u64,
                        commas: usize,
                        not_blank: bool,
                        rows: &mut u64|
     -> Result<()> {
        if !not_blank {
            return Ok(());
        }
        let found = commas + 1;
        if found == expected_cols {
            out.write_all(&row_start.to_le_bytes())
                .map_err(|e| Error::io(part_path, e))?;
            *rows += 1;
        } else if cfg.skip_faulty_rows {
            warn!(at = row_start, expected = expected_cols, found, "dropping faulty row");
        } else {
            return Err(Error::WidthMismatch {
                at: row_start,
                expected: expected_cols,
                found,
            });
        }
        Ok(())
    };

    while r.pos() < end {
        let Some(c) = r.peek()? else { break };
        match scanner.step(c, opts) {
            Step::Rescan => continue,
            Step::Content => {
                if scanner.in_quotes() || !c.is_ascii_whitespace() {
                    not_blank = true;
                }
                r.bump();
            }
            Step::QuoteOpen => {
                not_blank = true;
                r.bump();
            }
            Step::Pending => r.bump(),
            Step::FieldEnd => {
                commas += 1;
                not_blank = true;
                r.bump();
            }
            Step::RowEnd { consumed } => {
                let next = if consumed { r.pos() + 1 } else { r.pos() };
                finalize(row_start, commas, not_blank, &mut rows)?;
                row_start = next;
                commas = 0;
                not_blank = false;
                if consumed {
                    r.bump();
                }
            }
        }
    }

    // Range tail: a pending CR at the boundary still terminates the last
    // row, and the final row of the file may have no terminator at all.
    let flushed = scanner.finish().is_some();
    if (flushed || r.pos() > row_start) && row_start < end {
        debug_assert!(r.pos() == end || r.pos() == file_size);
        finalize(row_start, commas, not_blank, &mut rows)?;
    }

    out.flush().map_err(|e| Error::io(part_path, e))?;
    debug!(start, end, rows, "worker range parsed");
    Ok(rows)
}
