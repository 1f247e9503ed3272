//! Scanner for line-delimited JSON, one object per line.

use std::io::BufRead;

use tracing::trace;

use super::{decode_object, Dialect, RecordScanner, ScannedObject};
use crate::error::{IngestError, Result};

/// Scans line-delimited JSON objects. Blank lines are skipped but still
/// counted, so `total_lines` may exceed `valid_lines`. A non-blank line
/// that does not begin with `{` is an error.
pub struct LineScanner<R> {
    reader: R,
    buf: Vec<u8>,
    total_lines: usize,
    valid_lines: usize,
}

impl<R: BufRead> LineScanner<R> {
    pub fn new(reader: R) -> Self {
        LineScanner {
            reader,
            buf: Vec::new(),
            total_lines: 0,
            valid_lines: 0,
        }
    }

    /// Lines read so far, blank ones included.
    pub fn total_lines(&self) -> usize {
        self.total_lines
    }

    /// Records yielded so far.
    pub fn valid_lines(&self) -> usize {
        self.valid_lines
    }
}

impl<R: BufRead> RecordScanner for LineScanner<R> {
    fn next_record(&mut self) -> Result<Option<ScannedObject>> {
        loop {
            self.buf.clear();
            if self.reader.read_until(b'\n', &mut self.buf)? == 0 {
                return Ok(None);
            }
            self.total_lines += 1;

            let line = self.buf.trim_ascii();
            if line.is_empty() {
                continue;
            }

            if line[0] != b'{' {
                return Err(IngestError::MalformedLine {
                    line: self.total_lines,
                    message: format!("expected line to begin with '{{' but got '{}'", line[0] as char),
                });
            }

            let chunk = line.to_vec();
            let object = decode_object(&chunk).map_err(|message| IngestError::MalformedLine {
                line: self.total_lines,
                message,
            })?;

            self.valid_lines += 1;
            trace!(line = self.total_lines, len = chunk.len(), "scanned line");
            return Ok(Some(ScannedObject { object, chunk }));
        }
    }

    fn records(&self) -> usize {
        self.valid_lines
    }

    fn dialect(&self) -> Dialect {
        Dialect::Lines
    }
}
