//! Buffered sequential byte access over the source file.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Peek/bump reader with absolute positions.
///
/// `peek` returns the next byte without consuming it, which is what the
/// scanner's replay protocol needs: an unconsumed byte is simply peeked
/// again. Refills are transparent, so callers never observe buffer
/// boundaries.
pub(crate) struct ByteReader {
    file: File,
    path: PathBuf,
    buf: Vec<u8>,
    len: usize,
    cur: usize,
    abs: u64,
    eof: bool,
}

impl ByteReader {
    pub fn open(path: &Path, start: u64, capacity: usize) -> Result<Self> {
        let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
        file.seek(SeekFrom::Start(start))
            .map_err(|e| Error::io(path, e))?;
        Ok(Self {
            file,
            path: path.to_owned(),
            buf: vec![0; capacity.max(1)],
            len: 0,
            cur: 0,
            abs: start,
            eof: false,
        })
    }

    /// Absolute offset of the byte `peek` would return next.
    #[inline]
    pub fn pos(&self) -> u64 {
        self.abs
    }

    /// Next byte, or `None` at end of file. Does not consume.
    #[inline]
    pub fn peek(&mut self) -> Result<Option<u8>> {
        if self.cur == self.len {
            if self.eof {
                return Ok(None);
            }
            self.len = self
                .file
                .read(&mut self.buf)
                .map_err(|e| Error::io(&self.path, e))?;
            self.cur = 0;
            if self.len == 0 {
                self.eof = true;
                return Ok(None);
            }
        }
        Ok(Some(self.buf[self.cur]))
    }

    /// Consume the byte last returned by `peek`.
    #[inline]
    pub fn bump(&mut self) {
        debug_assert!(self.cur < self.len);
        self.cur += 1;
        self.abs += 1;
    }
}

/// Offset of the first content byte: 3 when the file opens with a UTF-8 BOM,
/// 0 otherwise.
pub(crate) fn bom_offset(path: &Path) -> Result<u64> {
    let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut head = [0u8; 3];
    let mut got = 0;
    while got < head.len() {
        match file.read(&mut head[got..]) {
            Ok(0) => break,
            Ok(n) => got += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::io(path, e)),
        }
    }
    if got == 3 && head == [0xEF, 0xBB, 0xBF] {
        Ok(3)
    } else {
        Ok(0)
    }
}
