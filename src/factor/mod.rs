//! Column-wise integer factorization.
//!
//! Columns are processed in slabs of bounded width so the working set stays
//! at `columns_per_slab * row_count` 32-bit codes plus the dictionaries.
//! Within a slab, rows are partitioned into contiguous blocks, one per
//! worker; each block interns its tokens into thread-local
//! insertion-ordered dictionaries and records local codes. The local
//! dictionaries are then merged into one global dictionary per column by
//! walking blocks in index order, which makes the text→code assignment a
//! pure function of the input, the worker count, and the slab width. A
//! lookup table per `(block, column)` relabels every local code to its
//! global value in place.
//!
//! Each row carries a byte cursor that survives across slabs: after slab
//! `k` it rests on the first byte of the next slab's leading column, so no
//! row is ever rescanned from its start.

mod tokens;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use indexmap::IndexSet;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::{debug, info};

use crate::config::{BuildConfig, CsvOptions};
use crate::error::{Error, Result};
use self::tokens::TokenReader;

/// File name of the per-slab metadata artifact.
pub const COLUMN_CHUNK_META_FILE: &str = "column_chunk_meta.bin";

/// File name of one slab's code matrix (column-major `i32`).
pub fn slab_codes_file(slab: usize) -> String {
    format!("column_codes_slab_{slab}.bin")
}

/// Code marking an entry no lookup table could resolve. Never present after
/// a successful build.
pub const UNRESOLVED_CODE: i32 = -1;

/// Summary of a factorization run.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FactorReport {
    /// Columns factorized (the header's column count).
    pub columns: usize,
    /// Rows factorized (the row-offset index length).
    pub rows: u64,
    /// Slabs written.
    pub slabs: usize,
}

struct BlockOutput {
    dicts: Vec<IndexSet<Vec<u8>>>,
    codes: Vec<Vec<i32>>,
}

/// Factorize all `ncols` columns of the rows listed in `row_offsets`,
/// writing one code file per slab and appending `(ncols, max_global_id)`
/// records to the metadata file.
pub fn factorize(
    csv_path: &Path,
    out_dir: &Path,
    ncols: usize,
    row_offsets: &[u64],
    opts: &CsvOptions,
    cfg: &BuildConfig,
) -> Result<FactorReport> {
    let workers = cfg.worker_count();
    ThreadPoolBuilder::new()
        .num_threads(workers)
        .build_global()
        .ok();

    let meta_path = out_dir.join(COLUMN_CHUNK_META_FILE);
    let meta = File::create(&meta_path).map_err(|e| Error::io(&meta_path, e))?;
    let mut meta = BufWriter::new(meta);

    let rows = row_offsets.len();
    let mut cursors: Vec<u64> = row_offsets.to_vec();
    let block = rows.div_ceil(workers).max(1);
    let per_slab = cfg.columns_per_slab.max(1);

    let mut slabs = 0usize;
    let mut col_start = 0usize;
    while col_start < ncols {
        let slab_cols = per_slab.min(ncols - col_start);

        let mut blocks: Vec<BlockOutput> = cursors
            .par_chunks_mut(block)
            .map(|cur| scan_block(csv_path, cur, slab_cols, opts, cfg))
            .collect::<Result<_>>()?;

        // Merge thread-local dictionaries into per-column global ones,
        // walking blocks in index order; within a block, insertion order.
        // This ordering is the sole source of code determinism.
        let mut globals: Vec<IndexSet<Vec<u8>>> =
            (0..slab_cols).map(|_| IndexSet::new()).collect();
        let mut luts: Vec<Vec<Vec<i32>>> = Vec::with_capacity(blocks.len());
        for blk in &mut blocks {
            let mut blk_luts = Vec::with_capacity(slab_cols);
            for (c, dict) in blk.dicts.drain(..).enumerate() {
                let lut: Vec<i32> = dict
                    .into_iter()
                    .map(|tok| {
                        let (gid, _) = globals[c].insert_full(tok);
                        gid as i32
                    })
                    .collect();
                blk_luts.push(lut);
            }
            luts.push(blk_luts);
        }
        if globals.iter().any(|g| g.len() > i32::MAX as usize) {
            return Err(Error::InternalInvariantViolation(
                "global dictionary exceeds the i32 code space".into(),
            ));
        }

        blocks
            .par_iter_mut()
            .zip(luts.par_iter())
            .for_each(|(blk, lut)| relabel(blk, lut));

        write_slab_codes(&out_dir.join(slab_codes_file(slabs)), slab_cols, &blocks)?;

        let max_id = globals
            .iter()
            .map(|g| g.len().saturating_sub(1) as u32)
            .max()
            .unwrap_or(0);
        meta.write_all(&(slab_cols as u32).to_le_bytes())
            .and_then(|()| meta.write_all(&max_id.to_le_bytes()))
            .map_err(|e| Error::io(&meta_path, e))?;
        debug!(slab = slabs, cols = slab_cols, max_id, "slab factorized");

        col_start += slab_cols;
        slabs += 1;
    }

    meta.flush().map_err(|e| Error::io(&meta_path, e))?;
    info!(columns = ncols, rows, slabs, "factorization complete");
    Ok(FactorReport {
        columns: ncols,
        rows: rows as u64,
        slabs,
    })
}

/// Read `slab_cols` fields for every row of the block, interning tokens into
/// per-column local dictionaries and recording local codes. Cursors advance
/// past the consumed fields (and past the terminator on the final slab).
fn scan_block(
    csv_path: &Path,
    cursors: &mut [u64],
    slab_cols: usize,
    opts: &CsvOptions,
    cfg: &BuildConfig,
) -> Result<BlockOutput> {
    let mut reader = TokenReader::new(csv_path, *opts, cfg.buffer_size())?;
    let mut dicts: Vec<IndexSet<Vec<u8>>> = (0..slab_cols).map(|_| IndexSet::new()).collect();
    let mut codes: Vec<Vec<i32>> = (0..slab_cols)
        .map(|_| Vec::with_capacity(cursors.len()))
        .collect();
    for cursor in cursors.iter_mut() {
        let mut col = 0usize;
        while col < slab_cols {
            let batch = reader.read_tokens(cursor, slab_cols - col)?;
            for tok in batch.tokens {
                let (local, _) = dicts[col].insert_full(tok);
                if local > i32::MAX as usize {
                    return Err(Error::InternalInvariantViolation(
                        "local dictionary exceeds the i32 code space".into(),
                    ));
                }
                codes[col].push(local as i32);
                col += 1;
            }
            if col < slab_cols && batch.row_done {
                return Err(Error::InternalInvariantViolation(format!(
                    "row ended after {col} of {slab_cols} slab fields at byte {cursor}"
                )));
            }
        }
    }
    Ok(BlockOutput { dicts, codes })
}

fn relabel(blk: &mut BlockOutput, lut: &[Vec<i32>]) {
    for (c, col_codes) in blk.codes.iter_mut().enumerate() {
        for code in col_codes.iter_mut() {
            *code = usize::try_from(*code)
                .ok()
                .and_then(|local| lut[c].get(local).copied())
                .unwrap_or(UNRESOLVED_CODE);
        }
    }
}

/// Write the slab column-major: for each column, every block's codes in
/// block order, which is exactly row order.
fn write_slab_codes(path: &Path, slab_cols: usize, blocks: &[BlockOutput]) -> Result<()> {
    let out = File::create(path).map_err(|e| Error::io(path, e))?;
    let mut out = BufWriter::new(out);
    for c in 0..slab_cols {
        for blk in blocks {
            for &code in &blk.codes[c] {
                if code == UNRESOLVED_CODE {
                    return Err(Error::InternalInvariantViolation(format!(
                        "unresolved code survived relabeling in {}",
                        path.display()
                    )));
                }
                out.write_all(&code.to_le_bytes())
                    .map_err(|e| Error::io(path, e))?;
            }
        }
    }
    out.flush().map_err(|e| Error::io(path, e))
}
