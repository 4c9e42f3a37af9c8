//! Header indexing.
//!
//! One streaming pass over the header row records, per column, the byte
//! range of the raw header token inside the source file. Entries are packed
//! `(u32 start, u16 length)` little-endian records, so `get(i)` is a single
//! seek into the index file plus a single seek into the source file; the
//! header text itself is never copied anywhere else.

use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::CsvOptions;
use crate::error::{Error, Result};
use crate::read::{bom_offset, ByteReader};
use crate::scanner::{Scanner, Step};

/// File name of the header index artifact.
pub const HEADER_INDEX_FILE: &str = "header_string_lookup_offsets.bin";

/// Bytes per header index entry: `u32` start + `u16` length.
pub const HEADER_ENTRY_STRIDE: u64 = 6;

/// Handle over a built header index.
///
/// Holds paths only; lookups open the files on demand, so the handle is
/// cheap to clone and safe to share across threads.
#[derive(Clone, Debug)]
pub struct HeaderIndex {
    csv_path: PathBuf,
    index_path: PathBuf,
    quote: u8,
    count: usize,
}

/// Scan the header row of `csv_path` and write the packed index to
/// `index_path` (truncating any previous build). Returns the index handle;
/// the column count is the number of entries written.
pub fn build_header_index(
    csv_path: &Path,
    index_path: &Path,
    opts: &CsvOptions,
    buffer_bytes: usize,
) -> Result<HeaderIndex> {
    let origin = bom_offset(csv_path)?;
    let mut reader = ByteReader::open(csv_path, origin, buffer_bytes)?;
    let out = File::create(index_path).map_err(|e| Error::io(index_path, e))?;
    let mut out = BufWriter::new(out);

    let mut scanner = Scanner::default();
    let mut count = 0usize;
    // Start of the current field region; start of content once seen. For a
    // quoted field the content start is the byte after the opening quote.
    let mut field_begin = origin;
    let mut field_start: Option<u64> = None;
    let mut last_content: Option<u64> = None;

    let mut emit = |start: u64, length: u64, count: &mut usize| -> Result<()> {
        if start > u64::from(u32::MAX) || length > u64::from(u16::MAX) {
            return Err(Error::HeaderTooLarge { at: start });
        }
        out.write_all(&(start as u32).to_le_bytes())
            .and_then(|()| out.write_all(&(length as u16).to_le_bytes()))
            .map_err(|e| Error::io(index_path, e))?;
        *count += 1;
        Ok(())
    };

    let mut done = false;
    while !done {
        let Some(c) = reader.peek()? else { break };
        let pos = reader.pos();
        match scanner.step(c, opts) {
            Step::Rescan => continue,
            Step::Content => {
                field_start.get_or_insert(pos);
                last_content = Some(pos);
                reader.bump();
            }
            Step::QuoteOpen => {
                field_start = Some(pos + 1);
                reader.bump();
            }
            Step::Pending => reader.bump(),
            Step::FieldEnd => {
                let start = field_start.unwrap_or(field_begin);
                let length = last_content.map_or(0, |l| l - start + 1);
                emit(start, length, &mut count)?;
                field_begin = pos + 1;
                field_start = None;
                last_content = None;
                reader.bump();
            }
            Step::RowEnd { consumed } => {
                let start = field_start.unwrap_or(field_begin);
                let length = last_content.map_or(0, |l| l - start + 1);
                emit(start, length, &mut count)?;
                if consumed {
                    reader.bump();
                }
                done = true;
            }
        }
    }
    if !done {
        // EOF without a terminator. A pending CR still ends the row; either
        // way the open field is closed if the header emitted anything at all
        // or the field has content.
        let flushed = matches!(scanner.finish(), Some(Step::RowEnd { .. }));
        if flushed || field_start.is_some() || count > 0 {
            let start = field_start.unwrap_or(field_begin);
            let length = last_content.map_or(0, |l| l - start + 1);
            emit(start, length, &mut count)?;
        }
    }

    out.flush().map_err(|e| Error::io(index_path, e))?;
    info!(columns = count, path = %index_path.display(), "header index built");
    Ok(HeaderIndex {
        csv_path: csv_path.to_owned(),
        index_path: index_path.to_owned(),
        quote: opts.quote,
        count,
    })
}

impl HeaderIndex {
    /// Open a previously built index file.
    pub fn load(csv_path: &Path, index_path: &Path, opts: &CsvOptions) -> Result<Self> {
        let meta =
            std::fs::metadata(index_path).map_err(|e| Error::io(index_path, e))?;
        if meta.len() % HEADER_ENTRY_STRIDE != 0 {
            return Err(Error::InternalInvariantViolation(format!(
                "header index {} is {} bytes, not a multiple of the {}-byte entry stride",
                index_path.display(),
                meta.len(),
                HEADER_ENTRY_STRIDE
            )));
        }
        Ok(Self {
            csv_path: csv_path.to_owned(),
            index_path: index_path.to_owned(),
            quote: opts.quote,
            count: (meta.len() / HEADER_ENTRY_STRIDE) as usize,
        })
    }

    /// Number of columns in the header row.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Path of the packed index file.
    pub fn path(&self) -> &Path {
        &self.index_path
    }

    /// Header text of column `i`: the indexed byte range of the source file
    /// with doubled quotes collapsed and ASCII whitespace trimmed.
    pub fn get(&self, i: usize) -> Result<String> {
        if i >= self.count {
            return Err(Error::IndexOutOfRange {
                index: i,
                count: self.count,
            });
        }
        let (start, length) = self.entry(i)?;
        if length == 0 {
            return Ok(String::new());
        }
        let mut file =
            File::open(&self.csv_path).map_err(|e| Error::io(&self.csv_path, e))?;
        file.seek(SeekFrom::Start(u64::from(start)))
            .map_err(|e| Error::io(&self.csv_path, e))?;
        let mut raw = vec![0u8; usize::from(length)];
        file.read_exact(&mut raw)
            .map_err(|e| Error::io(&self.csv_path, e))?;
        Ok(unescape_and_trim(&raw, self.quote))
    }

    /// All header strings in column order.
    pub fn headers(&self) -> Result<Vec<String>> {
        (0..self.count).map(|i| self.get(i)).collect()
    }

    /// Column position of the header equal to `name`, if any.
    pub fn find(&self, name: &str) -> Result<Option<usize>> {
        for i in 0..self.count {
            if self.get(i)? == name {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    fn entry(&self, i: usize) -> Result<(u32, u16)> {
        let mut file =
            File::open(&self.index_path).map_err(|e| Error::io(&self.index_path, e))?;
        file.seek(SeekFrom::Start(i as u64 * HEADER_ENTRY_STRIDE))
            .map_err(|e| Error::io(&self.index_path, e))?;
        let mut rec = [0u8; HEADER_ENTRY_STRIDE as usize];
        file.read_exact(&mut rec).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::InternalInvariantViolation(format!(
                    "header index {} truncated at entry {}",
                    self.index_path.display(),
                    i
                ))
            } else {
                Error::io(&self.index_path, e)
            }
        })?;
        let start = u32::from_le_bytes([rec[0], rec[1], rec[2], rec[3]]);
        let length = u16::from_le_bytes([rec[4], rec[5]]);
        Ok((start, length))
    }
}

/// Collapse `""` pairs to `"` and trim ASCII whitespace from both ends.
fn unescape_and_trim(raw: &[u8], quote: u8) -> String {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        out.push(raw[i]);
        if raw[i] == quote && raw.get(i + 1) == Some(&quote) {
            i += 2;
        } else {
            i += 1;
        }
    }
    String::from_utf8_lossy(&out)
        .trim_matches(|c: char| c.is_ascii_whitespace())
        .to_string()
}
