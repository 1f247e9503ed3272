//! # sq-ingest - JSON ingestion with schema inference
//!
//! Loads semi-structured JSON into a typed relational table. Records are
//! streamed from the source, a flat schema is inferred from the first
//! records, and rows are inserted as they arrive.
//!
//! ## Modules
//!
//! - **scan**: streaming record scanners and dialect sniffing
//! - **schema**: kind detection, the entity tree and the schema model
//! - **sql**: table definitions and the backend interface (SQLite, memory)
//! - **ingest**: the state machine tying it all together
//!
//! ## Quick Start
//!
//! ```rust
//! use sq_ingest::{ingest, BytesSource, CancelToken, Datum, IngestConfig, MemoryBackend};
//!
//! # fn main() -> anyhow::Result<()> {
//! let source = BytesSource::new(
//!     "{\"id\": 1, \"user\": {\"name\": \"Ada\"}}\n\
//!      {\"id\": 2.0, \"user\": {\"name\": \"Alan\"}}\n",
//! );
//!
//! let mut backend = MemoryBackend::new();
//! let report = ingest(&source, None, &mut backend, &IngestConfig::default(), &CancelToken::new())?;
//!
//! assert_eq!(report.rows_inserted, 2);
//! let table = backend.table("data").unwrap();
//! assert_eq!(table.def.column_names(), vec!["id", "user_name"]);
//! assert_eq!(table.rows[1][0], Datum::Int(2));
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod error;
pub mod ingest;
pub mod scan;
pub mod schema;
pub mod sql;
pub mod types;

// Re-export commonly used types for convenience
pub use cancel::CancelToken;
pub use error::{IngestError, Result};
pub use ingest::{detect_dialect, infer_schema, ingest, IngestEngine, IngestReport, IngestState};
pub use scan::{BytesSource, Dialect, FileSource, ReopenableSource};
pub use schema::{column_order_flat, ImportSchema, KindDetector, SchemaModel};
pub use sql::{ColumnDef, Insertion, MemoryBackend, SqlBackend, SqliteBackend, TableDef};
pub use types::{Datum, IngestConfig, Kind, MONOTABLE_NAME};
