//! Scanner for a top-level JSON array of objects.
//!
//! Example input: `[{"a":1},{"a":2},{"a":3}]`.
//!
//! Each element's text is located with a structural tracker that knows
//! about strings and escapes, so braces inside string values or nested
//! objects cannot end a record early. The separator that follows an
//! element is validated before the element is returned: a leading,
//! doubled or trailing comma fails the scan before the preceding record
//! reaches the destination.

use std::io::Read;

use tracing::trace;

use super::window::ScanWindow;
use super::{decode_object, Dialect, RecordScanner, ScannedObject};
use crate::error::{IngestError, Result};

/// Bytes requested from the reader per window fill.
const READ_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Nothing consumed yet; the opening bracket is still ahead.
    Start,
    /// Positioned at the `{` of the next element.
    Element,
    /// The closing bracket (or end of input) has been consumed.
    Finished,
}

/// Scans `[{...},{...}]` input, yielding each object with its raw text.
pub struct ArrayScanner<R> {
    reader: R,
    window: ScanWindow,
    /// Absolute stream offset of the next unexamined byte.
    pos: u64,
    phase: Phase,
    eof: bool,
    count: usize,
}

impl<R: Read> ArrayScanner<R> {
    pub fn new(reader: R) -> Self {
        ArrayScanner {
            reader,
            window: ScanWindow::new(),
            pos: 0,
            phase: Phase::Start,
            eof: false,
            count: 0,
        }
    }

    /// Bytes currently retained by the scanner's window.
    pub fn buffered(&self) -> usize {
        self.window.len()
    }

    /// Look at the byte at `pos`, reading more input if needed.
    fn peek(&mut self) -> Result<Option<u8>> {
        while self.pos >= self.window.end() {
            if self.eof {
                return Ok(None);
            }
            if self.window.fill(&mut self.reader, READ_SIZE)? == 0 {
                self.eof = true;
            }
        }
        Ok(self.window.byte_at(self.pos))
    }

    fn skip_whitespace(&mut self) -> Result<Option<u8>> {
        loop {
            match self.peek()? {
                Some(b) if b.is_ascii_whitespace() => self.pos += 1,
                other => return Ok(other),
            }
        }
    }

    /// Advance past the object starting at `pos` and return the absolute
    /// offset one past its closing brace.
    fn skip_object(&mut self) -> Result<u64> {
        let start = self.pos;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        loop {
            let Some(b) = self.peek()? else {
                return Err(IngestError::malformed(
                    start,
                    "unexpected end of input inside object",
                ));
            };
            self.pos += 1;

            if in_string {
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    in_string = false;
                }
                continue;
            }

            match b {
                b'"' => in_string = true,
                b'{' | b'[' => depth += 1,
                b'}' | b']' => {
                    depth = depth.checked_sub(1).ok_or_else(|| {
                        IngestError::malformed(self.pos - 1, "unbalanced closing delimiter")
                    })?;
                    if depth == 0 {
                        return Ok(self.pos);
                    }
                }
                _ => {}
            }
        }
    }

    /// Consume the opening bracket and position at the first element.
    /// Returns false if the array (or the whole input) is empty.
    fn open_array(&mut self) -> Result<bool> {
        match self.skip_whitespace()? {
            None => return Ok(false),
            Some(b'[') => self.pos += 1,
            Some(b) => {
                return Err(IngestError::malformed(
                    self.pos,
                    format!("expected '[' but got '{}'", b as char),
                ))
            }
        }

        match self.skip_whitespace()? {
            Some(b'{') => Ok(true),
            Some(b']') => {
                self.pos += 1;
                self.expect_end()?;
                Ok(false)
            }
            Some(b',') => Err(IngestError::malformed(self.pos, "leading comma in array")),
            Some(b) => Err(IngestError::malformed(
                self.pos,
                format!("expected '{{' but got '{}'", b as char),
            )),
            None => Err(IngestError::malformed(
                self.pos,
                "unexpected end of input after '['",
            )),
        }
    }

    /// After an element: consume its separator and validate what follows.
    /// Returns true if another element follows.
    fn after_element(&mut self) -> Result<bool> {
        match self.skip_whitespace()? {
            Some(b',') => {
                self.pos += 1;
                match self.skip_whitespace()? {
                    Some(b'{') => Ok(true),
                    Some(b',') => Err(IngestError::malformed(self.pos, "doubled comma in array")),
                    Some(b']') => Err(IngestError::malformed(self.pos, "trailing comma in array")),
                    Some(b) => Err(IngestError::malformed(
                        self.pos,
                        format!("expected '{{' after comma but got '{}'", b as char),
                    )),
                    None => Err(IngestError::malformed(
                        self.pos,
                        "unexpected end of input after comma",
                    )),
                }
            }
            Some(b']') => {
                self.pos += 1;
                self.expect_end()?;
                Ok(false)
            }
            Some(b) => Err(IngestError::malformed(
                self.pos,
                format!("expected ',' or ']' but got '{}'", b as char),
            )),
            None => Err(IngestError::malformed(
                self.pos,
                "unexpected end of input: expected ',' or ']'",
            )),
        }
    }

    /// Only whitespace may follow the closing bracket.
    fn expect_end(&mut self) -> Result<()> {
        match self.skip_whitespace()? {
            None => Ok(()),
            Some(_) => Err(IngestError::malformed(
                self.pos,
                "non-whitespace trailing input after closing ']'",
            )),
        }
    }
}

impl<R: Read> RecordScanner for ArrayScanner<R> {
    fn next_record(&mut self) -> Result<Option<ScannedObject>> {
        match self.phase {
            Phase::Finished => return Ok(None),
            Phase::Start => {
                if !self.open_array()? {
                    self.phase = Phase::Finished;
                    self.window.release_to(self.pos);
                    return Ok(None);
                }
                self.phase = Phase::Element;
            }
            Phase::Element => {}
        }

        let start = self.pos;
        let end = self.skip_object()?;
        let chunk = self
            .window
            .slice(start, end)
            .ok_or_else(|| IngestError::malformed(start, "record text no longer buffered"))?
            .to_vec();

        let object = decode_object(&chunk).map_err(|message| IngestError::Decode {
            record: self.count + 1,
            message,
        })?;

        if !self.after_element()? {
            self.phase = Phase::Finished;
        }

        self.window.release_to(self.pos);
        self.count += 1;
        trace!(record = self.count, offset = start, len = chunk.len(), "scanned array element");

        Ok(Some(ScannedObject { object, chunk }))
    }

    fn records(&self) -> usize {
        self.count
    }

    fn dialect(&self) -> Dialect {
        Dialect::Array
    }
}
