//! Relational model and the SQL backend seam
//!
//! The ingest engine talks to its destination only through
//! [`SqlBackend`]: create a table, prepare an insert, execute it, close it.
//! Connection health and retries belong to the backend.
//!
//! Two backends ship with the crate:
//!
//! - [`SqliteBackend`]: a real database via rusqlite
//! - [`MemoryBackend`]: rows kept in memory, for tests and dry runs

pub mod memory;
pub mod sqlite;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Datum, Kind};

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

/// Errors raised by SQL backends.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("table {0:?} does not exist")]
    NoSuchTable(String),

    #[error("table {0:?} already exists")]
    TableExists(String),

    #[error("table {table:?} has no column {column:?}")]
    NoSuchColumn { table: String, column: String },

    #[error("statement expects {expected} values but got {actual}")]
    Arity { expected: usize, actual: usize },

    #[error("statement binds {actual} values, backend allows at most {limit}")]
    TooManyValues { limit: usize, actual: usize },

    #[error("{0}")]
    Other(String),
}

/// A column of a table definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub table: String,
    pub kind: Kind,
}

/// A table definition: a name and ordered columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        TableDef {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// One row ready to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct Insertion {
    pub table: String,
    pub columns: Vec<String>,
    pub values: Vec<Datum>,
}

impl Insertion {
    pub fn new(table: impl Into<String>, columns: Vec<String>, values: Vec<Datum>) -> Self {
        Insertion {
            table: table.into(),
            columns,
            values,
        }
    }

    /// True if `other` can share a multi-row statement with this row.
    pub fn same_statement(&self, other: &Insertion) -> bool {
        self.table == other.table && self.columns == other.columns
    }
}

/// DDL/DML operations the ingest engine needs from a destination.
pub trait SqlBackend {
    /// A prepared insert statement.
    type Stmt;

    fn create_table(&mut self, table: &TableDef) -> Result<(), BackendError>;

    /// Prepare an insert of `rows` rows into `columns` of `table`.
    fn prepare_insert(&mut self, table: &str, columns: &[String], rows: usize) -> Result<Self::Stmt, BackendError>;

    /// Execute with `values` laid out row after row. Returns rows affected.
    fn execute(&mut self, stmt: &mut Self::Stmt, values: &[Datum]) -> Result<u64, BackendError>;

    fn close(&mut self, stmt: Self::Stmt) -> Result<(), BackendError>;

    /// Most values a single statement may bind. Multi-row inserts are split
    /// so that rows times columns stays within it.
    fn max_batch_values(&self) -> usize {
        usize::MAX
    }
}

/// Rows of `columns` values that fit in one statement under `max_values`.
/// Always at least one.
pub fn max_batch_rows(max_values: usize, columns: usize) -> usize {
    (max_values / columns.max(1)).max(1)
}

/// Quote an SQL identifier with double quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
