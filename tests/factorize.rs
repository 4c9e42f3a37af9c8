use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use tabgrid::factor::slab_codes_file;
use tabgrid::{
    build_header_index, build_row_offsets, factorize, BuildConfig, CsvOptions, FactorReport,
    COLUMN_CHUNK_META_FILE, HEADER_INDEX_FILE,
};

fn fixture(dir: &Path, content: &[u8]) -> Result<PathBuf> {
    let path = dir.join("input.csv");
    File::create(&path)?.write_all(content)?;
    Ok(path)
}

/// Header + offsets + factorize with the given knobs.
fn run(csv: &Path, workers: usize, columns_per_slab: usize) -> Result<FactorReport> {
    let out_dir = csv.parent().unwrap();
    let opts = CsvOptions::default();
    let header = build_header_index(csv, &out_dir.join(HEADER_INDEX_FILE), &opts, 1 << 16)?;
    let cfg = BuildConfig::default()
        .with_workers(workers)
        .with_columns_per_slab(columns_per_slab);
    let rows = build_row_offsets(csv, out_dir, header.count(), &opts, &cfg)?;
    Ok(factorize(
        csv,
        out_dir,
        header.count(),
        &rows.load()?,
        &opts,
        &cfg,
    )?)
}

fn read_codes(dir: &Path, slab: usize) -> Result<Vec<i32>> {
    let mut raw = Vec::new();
    File::open(dir.join(slab_codes_file(slab)))?.read_to_end(&mut raw)?;
    Ok(raw
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
        .collect())
}

fn read_meta(dir: &Path) -> Result<Vec<(u32, u32)>> {
    let mut raw = Vec::new();
    File::open(dir.join(COLUMN_CHUNK_META_FILE))?.read_to_end(&mut raw)?;
    assert_eq!(raw.len() % 8, 0);
    Ok(raw
        .chunks_exact(8)
        .map(|c| {
            (
                u32::from_le_bytes(c[0..4].try_into().unwrap()),
                u32::from_le_bytes(c[4..8].try_into().unwrap()),
            )
        })
        .collect())
}

#[test]
fn three_by_three_single_slab() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let csv = fixture(tmp.path(), b"a,b,c\n1,2,3\n4,5,6\n")?;
    let report = run(&csv, 1, 64)?;
    assert_eq!(report.columns, 3);
    assert_eq!(report.rows, 2);
    assert_eq!(report.slabs, 1);

    // Two distinct values per column, first-seen order: codes 0 then 1.
    assert_eq!(read_codes(tmp.path(), 0)?, vec![0, 1, 0, 1, 0, 1]);
    assert_eq!(read_meta(tmp.path())?, vec![(3, 1)]);
    Ok(())
}

#[test]
fn slab_width_bounds_each_chunk() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let csv = fixture(tmp.path(), b"a,b,c\n1,2,3\n4,5,6\n")?;
    let report = run(&csv, 1, 2)?;
    assert_eq!(report.slabs, 2);

    assert_eq!(read_codes(tmp.path(), 0)?, vec![0, 1, 0, 1]);
    assert_eq!(read_codes(tmp.path(), 1)?, vec![0, 1]);
    assert_eq!(read_meta(tmp.path())?, vec![(2, 1), (1, 1)]);
    Ok(())
}

#[test]
fn repeated_values_share_codes() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let csv = fixture(tmp.path(), b"k,v\nx,1\ny,2\nx,1\nz,2\n")?;
    let report = run(&csv, 1, 64)?;
    assert_eq!(report.rows, 4);

    let codes = read_codes(tmp.path(), 0)?;
    assert_eq!(&codes[0..4], &[0, 1, 0, 2], "column k");
    assert_eq!(&codes[4..8], &[0, 1, 0, 1], "column v");
    // Three distinct strings in column k: recorded max id is 2.
    assert_eq!(read_meta(tmp.path())?, vec![(2, 2)]);
    Ok(())
}

#[test]
fn quoted_tokens_compare_by_content() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let csv = fixture(
        tmp.path(),
        b"name,note\n\"Smith, J.\",x\n\"Smith, J.\",y\nplain,x\n",
    )?;
    run(&csv, 1, 64)?;

    let codes = read_codes(tmp.path(), 0)?;
    // Both quoted rows hold the same unescaped text, so they share a code.
    assert_eq!(&codes[0..3], &[0, 0, 1], "column name");
    assert_eq!(&codes[3..6], &[0, 1, 0], "column note");
    Ok(())
}

#[test]
fn cursors_advance_through_quoted_fields_across_slabs() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let csv = fixture(
        tmp.path(),
        b"c1,c2,c3\nx,\"p,q\",z\ny,\"p,q\",z\n",
    )?;
    // One column per slab forces three passes over each row's cursor.
    let report = run(&csv, 1, 1)?;
    assert_eq!(report.slabs, 3);
    assert_eq!(read_codes(tmp.path(), 0)?, vec![0, 1]);
    assert_eq!(read_codes(tmp.path(), 1)?, vec![0, 0]);
    assert_eq!(read_codes(tmp.path(), 2)?, vec![0, 0]);
    assert_eq!(read_meta(tmp.path())?, vec![(1, 1), (1, 0), (1, 0)]);
    Ok(())
}

#[test]
fn codes_are_deterministic_for_a_fixed_worker_count() -> Result<()> {
    let mut content = Vec::new();
    content.extend_from_slice(b"a,b,c\n");
    for i in 0..500u32 {
        content.extend_from_slice(format!("v{},w{},{}\n", i % 13, i % 7, i % 2).as_bytes());
    }

    let tmp = tempfile::tempdir()?;
    let csv = fixture(tmp.path(), &content)?;
    run(&csv, 3, 2)?;
    let first_s0 = read_codes(tmp.path(), 0)?;
    let first_s1 = read_codes(tmp.path(), 1)?;
    let first_meta = read_meta(tmp.path())?;

    let tmp2 = tempfile::tempdir()?;
    let csv2 = fixture(tmp2.path(), &content)?;
    run(&csv2, 3, 2)?;
    assert_eq!(read_codes(tmp2.path(), 0)?, first_s0);
    assert_eq!(read_codes(tmp2.path(), 1)?, first_s1);
    assert_eq!(read_meta(tmp2.path())?, first_meta);
    Ok(())
}

#[test]
fn block_merge_order_matches_single_threaded_first_seen_order() -> Result<()> {
    // Every value cycle is shorter than a worker's row block, so each block
    // sees the values in the same order and any worker count produces the
    // single-threaded assignment: code(v) = first-seen rank.
    let mut content = Vec::new();
    content.extend_from_slice(b"m,n\n");
    for i in 0..120u32 {
        content.extend_from_slice(format!("{},{}\n", i % 5, i % 3).as_bytes());
    }

    let tmp = tempfile::tempdir()?;
    let csv = fixture(tmp.path(), &content)?;
    run(&csv, 4, 64)?;

    let codes = read_codes(tmp.path(), 0)?;
    for (row, chunk) in codes[0..120].iter().enumerate() {
        assert_eq!(*chunk, (row % 5) as i32, "column m row {row}");
    }
    for (row, chunk) in codes[120..240].iter().enumerate() {
        assert_eq!(*chunk, (row % 3) as i32, "column n row {row}");
    }
    assert_eq!(read_meta(tmp.path())?, vec![(2, 4)]);
    Ok(())
}

#[test]
fn bijection_within_each_column() -> Result<()> {
    let mut content = Vec::new();
    content.extend_from_slice(b"word\n");
    let words = ["alpha", "beta", "gamma", "delta", "beta", "alpha", "epsilon"];
    for w in words {
        content.extend_from_slice(w.as_bytes());
        content.push(b'\n');
    }

    let tmp = tempfile::tempdir()?;
    let csv = fixture(tmp.path(), &content)?;
    run(&csv, 2, 64)?;

    let codes = read_codes(tmp.path(), 0)?;
    assert_eq!(codes.len(), words.len());
    // Same word, same code; different words, different codes; dense ids.
    let mut seen: std::collections::HashMap<&str, i32> = std::collections::HashMap::new();
    for (w, &code) in words.iter().zip(&codes) {
        assert!(code >= 0);
        match seen.entry(w) {
            std::collections::hash_map::Entry::Occupied(e) => assert_eq!(*e.get(), code),
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(code);
            }
        }
    }
    let mut distinct: Vec<i32> = seen.values().copied().collect();
    distinct.sort_unstable();
    assert_eq!(distinct, vec![0, 1, 2, 3, 4]);
    assert_eq!(read_meta(tmp.path())?, vec![(1, 4)]);
    Ok(())
}

#[test]
fn zero_rows_still_writes_slab_metadata() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let csv = fixture(tmp.path(), b"a,b,c\n")?;
    let report = run(&csv, 2, 2)?;
    assert_eq!(report.rows, 0);
    assert_eq!(report.slabs, 2);
    assert_eq!(read_meta(tmp.path())?, vec![(2, 0), (1, 0)]);
    assert!(read_codes(tmp.path(), 0)?.is_empty());
    Ok(())
}
