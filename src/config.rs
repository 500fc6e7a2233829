//! Loosely-formatted flash-type configuration files.
//!
//! One record per line:
//!
//! ```text
//! flash = 0x<mfr><dev>, "<description>", 0x<size>
//! ```
//!
//! Anything that does not parse is skipped and scanning resumes at the next
//! line; a malformed file can never abort the run.

use crate::catalog::{Catalog, MAX_DESCRIPTION, Signature};

/// Merge `flash = …` records from raw configuration bytes into the catalog.
///
/// Returns the number of entries actually added; duplicates, zero-id
/// candidates and records past the capacity limit are not counted. Parsing
/// stops early once the catalog has no slots left.
pub fn merge_config(catalog: &mut Catalog, raw: &[u8]) -> usize {
    let mut scanner = Scanner::new(raw);
    let mut added = 0;

    while !scanner.at_end() && catalog.remaining() > 0 {
        if scanner.match_keyword() {
            if let Some(candidate) = scanner.record() {
                log::debug!("  {}", candidate);
                if catalog.push(candidate) {
                    added += 1;
                }
            }
        }
        scanner.next_line();
    }
    added
}

/// Cursor over the raw configuration bytes. Every scan either lands on a
/// byte or runs off the end of the buffer; positions are checked, never
/// assumed.
struct Scanner<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Scanner { buf, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn bump(&mut self) {
        self.pos += 1;
    }

    /// Spaces and tabs, not line breaks.
    fn skip_blank(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t')) {
            self.bump();
        }
    }

    /// Skip the rest of the current line and the line-break bytes after it.
    fn next_line(&mut self) {
        while let Some(b) = self.peek() {
            if b == b'\n' || b == b'\r' {
                break;
            }
            self.bump();
        }
        while let Some(b) = self.peek() {
            if b != b'\n' && b != b'\r' {
                break;
            }
            self.bump();
        }
    }

    /// The `flash` keyword (any case) followed by optional blanks and `=`;
    /// consumes through the `=` on a match.
    fn match_keyword(&mut self) -> bool {
        self.skip_blank();
        const KEYWORD: &[u8] = b"flash";
        let end = self.pos + KEYWORD.len();
        if end > self.buf.len() || !self.buf[self.pos..end].eq_ignore_ascii_case(KEYWORD) {
            return false;
        }
        self.pos = end;
        self.skip_blank();
        if self.peek() == Some(b'=') {
            self.bump();
            true
        } else {
            false
        }
    }

    /// The three fields after `flash =`: packed id pair, description, size.
    fn record(&mut self) -> Option<Signature> {
        let packed = self.hex_field()?;
        let manufacturer_id = (packed >> 8) as u8;
        let device_id = packed as u8;
        let description = self.quoted_field()?;
        let size_bytes = self.hex_field()?;
        Some(Signature::new(manufacturer_id, device_id, &description, size_bytes))
    }

    /// Scan forward (across line breaks, like the rest of the record scan)
    /// to the next `x` preceded by `0`, then read 1-8 hex digits. No digits,
    /// or a ninth digit, fails the field.
    fn hex_field(&mut self) -> Option<u32> {
        self.find_hex_marker()?;
        let mut value: u32 = 0;
        let mut digits = 0;
        while let Some(b) = self.peek() {
            let Some(d) = (b as char).to_digit(16) else {
                break;
            };
            if digits == 8 {
                return None;
            }
            value = value << 4 | d;
            digits += 1;
            self.bump();
        }
        if digits == 0 { None } else { Some(value) }
    }

    fn find_hex_marker(&mut self) -> Option<()> {
        while let Some(b) = self.peek() {
            if b == b'x' && self.pos > 0 && self.buf[self.pos - 1] == b'0' {
                self.bump();
                return Some(());
            }
            self.bump();
        }
        None
    }

    /// Scan to the opening quote, then collect description bytes up to the
    /// closing quote or the length bound, whichever comes first. On
    /// truncation the cursor stays where the bound was hit and scanning
    /// continues from there.
    fn quoted_field(&mut self) -> Option<String> {
        loop {
            let b = self.peek()?;
            self.bump();
            if b == b'"' {
                break;
            }
        }
        let start = self.pos;
        while self.pos - start < MAX_DESCRIPTION {
            match self.peek() {
                Some(b'"') | None => break,
                Some(_) => self.bump(),
            }
        }
        let text = String::from_utf8_lossy(&self.buf[start..self.pos]).into_owned();
        if self.peek() == Some(b'"') {
            self.bump();
        }
        Some(text)
    }
}
