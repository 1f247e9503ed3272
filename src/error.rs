//! Error types for ingestion.
//!
//! Malformed input, unsupported operations, backend failures and
//! cancellation are distinct variants so callers can tell "the data is
//! broken" apart from "the data changed shape" or "the run was stopped".

use thiserror::Error;

use crate::sql::BackendError;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, IngestError>;

/// Errors that can occur while scanning, inferring or loading JSON.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Reading the source failed.
    #[error("read error: {0}")]
    Io(#[from] std::io::Error),

    /// Structural problem in array-of-objects input, at a byte offset.
    #[error("malformed JSON at byte {offset}: {message}")]
    Malformed { offset: u64, message: String },

    /// Structural problem in line-delimited input, at a 1-based line.
    #[error("malformed JSON on line {line}: {message}")]
    MalformedLine { line: usize, message: String },

    /// A record's text could not be decoded as a JSON object.
    #[error("record {record}: invalid JSON object: {message}")]
    Decode { record: usize, message: String },

    /// A field changed between scalar, object and array.
    #[error("field {field} was previously detected as {was}, but is now {now}")]
    ShapeConflict {
        field: String,
        was: &'static str,
        now: &'static str,
    },

    /// The source contained no records.
    #[error("empty JSON input")]
    EmptyInput,

    /// A value could not be converted to its column's kind.
    #[error("column {column}: {message}")]
    Coerce { column: String, message: String },

    /// Two entities produced the same flattened column in one record.
    #[error("column {column} already exists, but found column with same name in {entity}")]
    DuplicateColumn { column: String, entity: String },

    /// The structure changed after the destination table was created.
    #[error("schema evolution not supported: {0}")]
    SchemaEvolutionUnsupported(String),

    /// The requested mode of operation is not implemented.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A configuration value is invalid.
    #[error("invalid config key '{key}': {message}")]
    InvalidConfig { key: String, message: String },

    /// The SQL backend rejected a statement.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The run was cancelled before completion.
    #[error("ingest cancelled")]
    Cancelled,
}

impl IngestError {
    pub(crate) fn malformed(offset: u64, message: impl Into<String>) -> Self {
        IngestError::Malformed {
            offset,
            message: message.into(),
        }
    }

    /// True for errors caused by the input itself.
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            IngestError::Malformed { .. }
                | IngestError::MalformedLine { .. }
                | IngestError::Decode { .. }
                | IngestError::ShapeConflict { .. }
                | IngestError::EmptyInput
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, IngestError::Cancelled)
    }
}
