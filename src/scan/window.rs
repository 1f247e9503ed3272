//! Rolling byte window over a stream.
//!
//! The window holds every byte read from the source that has not yet been
//! released, and translates absolute stream offsets into indices of its
//! local buffer. Scanners slice record text out of it and then release
//! everything before the next record, so memory stays proportional to the
//! largest record rather than to the whole input.

use std::io::{self, Read};

#[derive(Debug, Default)]
pub struct ScanWindow {
    buf: Vec<u8>,
    /// Absolute stream offset of `buf[0]`.
    base: u64,
}

impl ScanWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absolute offset of the first retained byte.
    pub fn start(&self) -> u64 {
        self.base
    }

    /// Absolute offset one past the last byte read so far.
    pub fn end(&self) -> u64 {
        self.base + self.buf.len() as u64
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Read up to `max` more bytes from `reader` into the window. Returns
    /// the number of bytes appended; zero means end of input.
    pub fn fill<R: Read>(&mut self, reader: &mut R, max: usize) -> io::Result<usize> {
        let old_len = self.buf.len();
        self.buf.resize(old_len + max, 0);
        loop {
            match reader.read(&mut self.buf[old_len..]) {
                Ok(n) => {
                    self.buf.truncate(old_len + n);
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.buf.truncate(old_len);
                    return Err(e);
                }
            }
        }
    }

    /// Local buffer index of absolute offset `abs`, if retained. `end()`
    /// itself maps to `len()`.
    pub fn local(&self, abs: u64) -> Option<usize> {
        if abs < self.base || abs > self.end() {
            return None;
        }
        Some((abs - self.base) as usize)
    }

    pub fn byte_at(&self, abs: u64) -> Option<u8> {
        let i = self.local(abs)?;
        self.buf.get(i).copied()
    }

    /// Bytes in the absolute range `[start, end)`.
    pub fn slice(&self, start: u64, end: u64) -> Option<&[u8]> {
        if start > end {
            return None;
        }
        let from = self.local(start)?;
        let to = self.local(end)?;
        Some(&self.buf[from..to])
    }

    /// Release every byte before absolute offset `abs`.
    pub fn release_to(&mut self, abs: u64) {
        let Some(i) = self.local(abs) else {
            return;
        };
        self.buf.drain(..i);
        self.base = abs;
    }
}
