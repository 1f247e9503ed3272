//! Dialect detection.
//!
//! Each scorer samples the start of the source and returns a confidence in
//! `[0, 1]`. A parse failure zeroes the score for that dialect. Only I/O
//! errors are returned as errors.

use std::io::{self, BufRead, BufReader, Read};
use std::time::Instant;

use serde_json::{Map, Value};
use tracing::debug;

use super::array::ArrayScanner;
use super::source::ReopenableSource;
use super::{Dialect, RecordScanner};
use crate::error::Result;

/// Score the source as a top-level JSON value.
///
/// An array scores 1.0 if at least one of its first `sample_size` elements
/// scans as an object. A lone object scores 1.0, except when it sits on a
/// single line: then it is equally valid line-delimited JSON, and 0.9 is
/// returned so that [`Dialect::Lines`] wins.
pub fn score_array(src: &dyn ReopenableSource, sample_size: usize) -> Result<f32> {
    let start = Instant::now();
    let score = do_score_array(src, sample_size)?;
    debug!(source = %src.describe(), score, elapsed = ?start.elapsed(), "JSON detection complete");
    Ok(score)
}

fn do_score_array(src: &dyn ReopenableSource, sample_size: usize) -> Result<f32> {
    let first = {
        let mut r = BufReader::new(src.open()?);
        first_non_whitespace(&mut r)?
    };

    match first {
        Some(b'{') => score_lone_object(src),
        Some(b'[') => {
            let mut sc = ArrayScanner::new(src.open()?);
            let mut valid = 0;
            while valid < sample_size {
                match sc.next_record() {
                    Ok(Some(_)) => valid += 1,
                    Ok(None) => break,
                    Err(e) if e.is_malformed_input() => return Ok(0.0),
                    Err(e) => return Err(e),
                }
            }
            Ok(if valid > 0 { 1.0 } else { 0.0 })
        }
        _ => Ok(0.0),
    }
}

/// A lone object is decoded as a stream so that only its own bytes are read.
/// A second value after it means the input is not a single JSON document.
fn score_lone_object(src: &dyn ReopenableSource) -> Result<f32> {
    let mut rec = BufReader::new(Recorder { inner: src.open()?, seen: Vec::new() });
    let mut stream = serde_json::Deserializer::from_reader(&mut rec).into_iter::<Map<String, Value>>();

    match stream.next() {
        None => return Ok(0.0),
        Some(Err(e)) if e.is_io() => return Err(io::Error::from(e).into()),
        Some(Err(_)) => return Ok(0.0),
        Some(Ok(_)) => {}
    }
    let offset = stream.byte_offset();
    if stream.next().is_some() {
        return Ok(0.0);
    }

    let seen = &rec.get_ref().seen;
    let lines = seen[..offset.min(seen.len())]
        .split(|&b| b == b'\n')
        .filter(|l| !l.trim_ascii().is_empty())
        .count();
    Ok(if lines <= 1 { 0.9 } else { 1.0 })
}

/// Keeps a copy of every byte read through it.
struct Recorder<R> {
    inner: R,
    seen: Vec<u8>,
}

impl<R: Read> Read for Recorder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.seen.extend_from_slice(&buf[..n]);
        Ok(n)
    }
}

/// Score the source as line-delimited JSON: every non-blank line among the
/// first `sample_size` must be a braced JSON object.
pub fn score_lines(src: &dyn ReopenableSource, sample_size: usize) -> Result<f32> {
    let start = Instant::now();
    let score = do_score_lines(src, sample_size)?;
    debug!(source = %src.describe(), score, elapsed = ?start.elapsed(), "JSONL detection complete");
    Ok(score)
}

fn do_score_lines(src: &dyn ReopenableSource, sample_size: usize) -> Result<f32> {
    let mut r = BufReader::new(src.open()?);
    let mut buf = Vec::new();
    let mut valid = 0;

    while valid < sample_size {
        buf.clear();
        if r.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let line = buf.trim_ascii();
        if line.is_empty() {
            continue;
        }
        if line[0] != b'{' || line[line.len() - 1] != b'}' {
            return Ok(0.0);
        }
        if serde_json::from_slice::<Map<String, Value>>(line).is_err() {
            return Ok(0.0);
        }
        valid += 1;
    }

    Ok(if valid > 0 { 1.0 } else { 0.0 })
}

/// Pick the most likely dialect. Line-delimited wins ties. Returns `None`
/// if neither dialect fits.
pub fn sniff(src: &dyn ReopenableSource, sample_size: usize) -> Result<Option<(Dialect, f32)>> {
    let array = score_array(src, sample_size)?;
    let lines = score_lines(src, sample_size)?;

    let best = if lines >= array {
        (Dialect::Lines, lines)
    } else {
        (Dialect::Array, array)
    };

    Ok((best.1 > 0.0).then_some(best))
}

/// True if the source holds nothing but whitespace.
pub fn is_blank(src: &dyn ReopenableSource) -> Result<bool> {
    let mut r = BufReader::new(src.open()?);
    Ok(first_non_whitespace(&mut r)?.is_none())
}

fn first_non_whitespace<R: BufRead>(r: &mut R) -> Result<Option<u8>> {
    loop {
        let buf = r.fill_buf()?;
        if buf.is_empty() {
            return Ok(None);
        }
        if let Some(i) = buf.iter().position(|b| !b.is_ascii_whitespace()) {
            return Ok(Some(buf[i]));
        }
        let n = buf.len();
        r.consume(n);
    }
}
