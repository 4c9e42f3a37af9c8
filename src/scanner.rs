//! Byte-level CSV state machine.
//!
//! [`Scanner`] consumes one byte at a time and classifies it against the
//! RFC 4180-style quoting rules. The format needs two one-byte lookaheads: a
//! quote inside a quoted field (escaped pair vs. closing quote) and a CR
//! (CRLF vs. lone CR). Both are held as explicit `pending` bits, so the
//! machine can be suspended at any buffer boundary and resumed with the next
//! byte without changing parse semantics.
//!
//! The scanner never rejects input. A file ending inside a quoted field gets
//! an implicit closing quote at EOF, and a stray quote in the middle of an
//! unquoted field is literal content.

use crate::config::CsvOptions;

/// Resumable scanner state. `Default` is the start-of-row state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Scanner {
    in_quotes: bool,
    pending_quote: bool,
    pending_cr: bool,
    at_field_start: bool,
}

impl Default for Scanner {
    fn default() -> Self {
        Self {
            in_quotes: false,
            pending_quote: false,
            pending_cr: false,
            at_field_start: true,
        }
    }
}

/// Classification of one submitted byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// The byte is content of the current field. For a resolved escaped
    /// quote this is the second quote byte, so collecting `Content` bytes
    /// yields the unescaped field text.
    Content,
    /// The byte opened a quoted field; content starts at the next byte.
    QuoteOpen,
    /// Decision deferred (quote-in-quotes or CR); feed the next byte.
    Pending,
    /// The byte is an unquoted delimiter ending the current field.
    FieldEnd,
    /// A row terminator completed. When `consumed` is false the submitted
    /// byte was not part of the terminator (lone CR case) and must be fed
    /// again as the first byte of the next row.
    RowEnd { consumed: bool },
    /// A pending quote resolved as a closing quote; the submitted byte was
    /// not consumed and must be fed again.
    Rescan,
}

impl Scanner {
    /// Start-of-row state with `in_quotes` already set, for resync paths
    /// that land inside a quoted field.
    pub(crate) fn mid_quoted_field() -> Self {
        Self {
            in_quotes: true,
            at_field_start: false,
            ..Self::default()
        }
    }

    /// Whether the scanner is currently inside a quoted field (counting an
    /// unresolved pending quote as still inside).
    pub fn in_quotes(&self) -> bool {
        self.in_quotes
    }

    /// Advance by one byte. On [`Step::Rescan`] and
    /// `Step::RowEnd { consumed: false }` the caller must submit the same
    /// byte again.
    #[inline]
    pub fn step(&mut self, c: u8, opts: &CsvOptions) -> Step {
        if self.pending_quote {
            self.pending_quote = false;
            if c == opts.quote {
                // Escaped pair; the field stays quoted.
                return Step::Content;
            }
            self.in_quotes = false;
            return Step::Rescan;
        }
        if self.in_quotes {
            if c == opts.quote {
                self.pending_quote = true;
                return Step::Pending;
            }
            // Delimiters, CR, and LF are data inside quotes.
            return Step::Content;
        }
        if self.pending_cr {
            self.pending_cr = false;
            self.at_field_start = true;
            return Step::RowEnd {
                consumed: c == b'\n',
            };
        }
        if c == b'\r' {
            self.pending_cr = true;
            return Step::Pending;
        }
        if c == b'\n' {
            self.at_field_start = true;
            return Step::RowEnd { consumed: true };
        }
        if c == opts.delimiter {
            self.at_field_start = true;
            return Step::FieldEnd;
        }
        if c == opts.quote {
            if self.at_field_start {
                self.in_quotes = true;
                self.at_field_start = false;
                return Step::QuoteOpen;
            }
            // Quote in the middle of an unquoted field: literal content.
            return Step::Content;
        }
        self.at_field_start = false;
        Step::Content
    }

    /// Flush at end of input. A pending quote becomes an implicit closing
    /// quote; a pending CR terminates the final row. Returns the terminating
    /// step, if any.
    pub fn finish(&mut self) -> Option<Step> {
        if self.pending_quote {
            self.pending_quote = false;
            self.in_quotes = false;
        }
        if self.pending_cr {
            self.pending_cr = false;
            self.at_field_start = true;
            return Some(Step::RowEnd { consumed: true });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Run the scanner over `input`, resubmitting unconsumed bytes, and
    /// collect `(position, step)` pairs for every boundary event.
    fn events(input: &[u8]) -> Vec<(usize, Step)> {
        let opts = CsvOptions::default();
        let mut scanner = Scanner::default();
        let mut out = Vec::new();
        for (pos, &c) in input.iter().enumerate() {
            loop {
                match scanner.step(c, &opts) {
                    Step::Rescan => continue,
                    s @ Step::RowEnd { consumed: false } => {
                        out.push((pos, s));
                        continue;
                    }
                    s @ (Step::FieldEnd | Step::RowEnd { .. }) => {
                        out.push((pos, s));
                        break;
                    }
                    _ => break,
                }
            }
        }
        if let Some(s) = scanner.finish() {
            out.push((input.len(), s));
        }
        out
    }

    #[test]
    fn plain_fields_and_rows() {
        let ev = events(b"a,b\nc,d\n");
        assert_eq!(
            ev,
            vec![
                (1, Step::FieldEnd),
                (3, Step::RowEnd { consumed: true }),
                (5, Step::FieldEnd),
                (7, Step::RowEnd { consumed: true }),
            ]
        );
    }

    #[test]
    fn quoted_delimiters_are_content() {
        // One row, two fields; the comma and newline inside quotes are data.
        let ev = events(b"\"a,b\n\",x\n");
        assert_eq!(
            ev,
            vec![(6, Step::FieldEnd), (8, Step::RowEnd { consumed: true })]
        );
    }

    #[test]
    fn escaped_quotes_stay_in_field() {
        let ev = events(b"\"he said \"\"hi\"\"\",x\n");
        assert_eq!(ev[0], (16, Step::FieldEnd));
    }

    #[test]
    fn crlf_is_one_terminator() {
        let ev = events(b"a\r\nb\n");
        assert_eq!(
            ev,
            vec![
                (2, Step::RowEnd { consumed: true }),
                (4, Step::RowEnd { consumed: true }),
            ]
        );
    }

    #[test]
    fn lone_cr_terminates_and_replays() {
        let ev = events(b"a\rb\n");
        assert_eq!(
            ev,
            vec![
                (2, Step::RowEnd { consumed: false }),
                (3, Step::RowEnd { consumed: true }),
            ]
        );
    }

    #[test]
    fn trailing_cr_flushes_at_eof() {
        let ev = events(b"a\r");
        assert_eq!(ev, vec![(2, Step::RowEnd { consumed: true })]);
    }

    #[test]
    fn unterminated_quote_closes_at_eof() {
        let mut scanner = Scanner::default();
        let opts = CsvOptions::default();
        for &c in b"\"abc\"" {
            let _ = scanner.step(c, &opts);
        }
        assert!(scanner.in_quotes());
        assert_eq!(scanner.finish(), None);
        assert!(!scanner.in_quotes());
    }

    #[test]
    fn stray_quote_mid_field_is_literal() {
        // In `a"b,c` the quote does not open a quoted field.
        let ev = events(b"a\"b,c\n");
        assert_eq!(
            ev,
            vec![(3, Step::FieldEnd), (5, Step::RowEnd { consumed: true })]
        );
    }

    #[test]
    fn mixed_quoting_and_terminators() {
        // Escaped pairs, a quoted CRLF, and an empty quoted field in one
        // stream.
        let input = b"\"x,\"\"y\"\",\r\nz\",q\r\np,\"\"\r\n";
        let ev = events(input);
        assert_eq!(
            ev,
            vec![
                (13, Step::FieldEnd),
                (16, Step::RowEnd { consumed: true }),
                (18, Step::FieldEnd),
                (22, Step::RowEnd { consumed: true }),
            ]
        );
    }
}
