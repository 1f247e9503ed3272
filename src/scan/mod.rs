//! Streaming record scanners
//!
//! Scanners read raw JSON text and yield each top-level object together
//! with the exact bytes it was decoded from. Two dialects are supported:
//!
//! - **Array**: a single top-level array of objects, `[{...},{...}]`
//! - **Lines**: one object per non-blank line
//!
//! The raw chunk is what the schema model uses to recover the textual
//! order of fields, so it is sliced from the source rather than
//! re-serialized.

pub mod array;
pub mod lines;
pub mod sniff;
pub mod source;
pub mod window;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

pub use array::ArrayScanner;
pub use lines::LineScanner;
pub use sniff::{is_blank, score_array, score_lines, sniff};
pub use source::{BytesSource, FileSource, ReopenableSource};
pub use window::ScanWindow;

/// The JSON layouts a source can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// A single top-level array of objects.
    Array,
    /// One object per line.
    Lines,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Array => f.write_str("json"),
            Dialect::Lines => f.write_str("jsonl"),
        }
    }
}

/// One decoded record and the source text it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedObject {
    pub object: Map<String, Value>,
    pub chunk: Vec<u8>,
}

/// Yields records one at a time from a JSON source.
pub trait RecordScanner {
    /// Scan the next record. `Ok(None)` signals end of input.
    fn next_record(&mut self) -> Result<Option<ScannedObject>>;

    /// Number of records yielded so far.
    fn records(&self) -> usize;

    fn dialect(&self) -> Dialect;
}

/// Decode one record's raw text into an object.
///
/// simd-json is tried first; when it rejects the input, serde_json is
/// run over the same bytes so the reported error carries its line and
/// column detail.
pub(crate) fn decode_object(chunk: &[u8]) -> std::result::Result<Map<String, Value>, String> {
    let mut scratch = chunk.to_vec();
    if let Ok(obj) = simd_json::serde::from_slice::<Map<String, Value>>(&mut scratch) {
        return Ok(obj);
    }

    serde_json::from_slice::<Map<String, Value>>(chunk).map_err(|e| e.to_string())
}
