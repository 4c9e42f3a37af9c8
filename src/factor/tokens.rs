//! Bounded token reading for the factorizer.
//!
//! [`TokenReader::read_tokens`] consumes at most one I/O buffer per call and
//! returns fully parsed fields only. If the buffer ends in the middle of a
//! field, the cursor rolls back to the byte after the last completed
//! delimiter so the next call re-parses that field from its start with fresh
//! quote state; if no delimiter completed at all, the buffer is enlarged and
//! the call retried, up to a hard token-size ceiling.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::config::CsvOptions;
use crate::error::{Error, Result};
use crate::scanner::{Scanner, Step};

/// Hard ceiling on how far the buffer grows for one oversized field.
const MAX_TOKEN_BYTES: usize = 1 << 30;

/// Fields returned by one bounded read.
pub(crate) struct TokenBatch {
    /// Unescaped, whitespace-trimmed field bytes, in column order.
    pub tokens: Vec<Vec<u8>>,
    /// Whether the row's terminator (or EOF) was consumed by this call.
    pub row_done: bool,
}

enum Attempt {
    Done {
        tokens: Vec<Vec<u8>>,
        row_done: bool,
        new_cursor: u64,
    },
    Grow,
}

pub(crate) struct TokenReader {
    file: File,
    path: PathBuf,
    buf: Vec<u8>,
    file_size: u64,
    opts: CsvOptions,
}

impl TokenReader {
    pub fn new(path: &Path, opts: CsvOptions, buffer_bytes: usize) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let file_size = file.metadata().map_err(|e| Error::io(path, e))?.len();
        Ok(Self {
            file,
            path: path.to_owned(),
            buf: vec![0; buffer_bytes.max(16)],
            file_size,
            opts,
        })
    }

    /// Read up to `max_tokens` fields starting at `*cursor`, advancing the
    /// cursor past everything consumed: the most recent delimiter when the
    /// token budget is hit, or the row terminator (CRLF taken whole) when
    /// the row ends.
    pub fn read_tokens(&mut self, cursor: &mut u64, max_tokens: usize) -> Result<TokenBatch> {
        if max_tokens == 0 {
            return Ok(TokenBatch {
                tokens: Vec::new(),
                row_done: false,
            });
        }
        loop {
            match self.attempt(*cursor, max_tokens)? {
                Attempt::Done {
                    tokens,
                    row_done,
                    new_cursor,
                } => {
                    *cursor = new_cursor;
                    return Ok(TokenBatch { tokens, row_done });
                }
                Attempt::Grow => {
                    if self.buf.len() >= MAX_TOKEN_BYTES {
                        return Err(Error::BufferTooSmall {
                            at: *cursor,
                            limit: self.buf.len(),
                        });
                    }
                    let grown = (self.buf.len() * 2).min(MAX_TOKEN_BYTES);
                    self.buf.resize(grown, 0);
                }
            }
        }
    }

    fn attempt(&mut self, start: u64, max_tokens: usize) -> Result<Attempt> {
        let got = self.fill(start)?;
        let eof = start + got as u64 >= self.file_size;
        let mut scanner = Scanner::default();
        let mut tokens: Vec<Vec<u8>> = Vec::with_capacity(max_tokens);
        let mut tok: Vec<u8> = Vec::new();
        // Cursor value that skips every fully parsed token so far.
        let mut committed: Option<u64> = None;
        let mut i = 0usize;
        while i < got {
            let c = self.buf[i];
            let abs = start + i as u64;
            match scanner.step(c, &self.opts) {
                Step::Rescan => continue,
                Step::Content => {
                    tok.push(c);
                    i += 1;
                }
                Step::QuoteOpen | Step::Pending => i += 1,
                Step::FieldEnd => {
                    tokens.push(trim_ascii(std::mem::take(&mut tok)));
                    if tokens.len() == max_tokens {
                        return Ok(Attempt::Done {
                            tokens,
                            row_done: false,
                            new_cursor: abs + 1,
                        });
                    }
                    committed = Some(abs + 1);
                    i += 1;
                }
                Step::RowEnd { consumed } => {
                    tokens.push(trim_ascii(std::mem::take(&mut tok)));
                    return Ok(Attempt::Done {
                        tokens,
                        row_done: true,
                        new_cursor: if consumed { abs + 1 } else { abs },
                    });
                }
            }
        }
        if eof {
            if got == 0 {
                return Ok(Attempt::Done {
                    tokens,
                    row_done: true,
                    new_cursor: start,
                });
            }
            // Unterminated final row: an open quote closes implicitly, a
            // trailing CR is the terminator; either way the field ends here.
            let _ = scanner.finish();
            tokens.push(trim_ascii(tok));
            return Ok(Attempt::Done {
                tokens,
                row_done: true,
                new_cursor: self.file_size,
            });
        }
        match committed {
            Some(new_cursor) => Ok(Attempt::Done {
                tokens,
                row_done: false,
                new_cursor,
            }),
            None => Ok(Attempt::Grow),
        }
    }

    fn fill(&mut self, at: u64) -> Result<usize> {
        self.file
            .seek(SeekFrom::Start(at))
            .map_err(|e| Error::io(&self.path, e))?;
        let mut got = 0;
        while got < self.buf.len() {
            match self.file.read(&mut self.buf[got..]) {
                Ok(0) => break,
                Ok(n) => got += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::io(&self.path, e)),
            }
        }
        Ok(got)
    }
}

fn trim_ascii(mut v: Vec<u8>) -> Vec<u8> {
    let end = v
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |p| p + 1);
    v.truncate(end);
    let start = v
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(0);
    if start > 0 {
        v.drain(..start);
    }
    v
}
