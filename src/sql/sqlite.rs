use std::path::Path;

use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use tracing::trace;

use super::{quote_ident, BackendError, SqlBackend, TableDef};
use crate::types::{Datum, Kind};

/// Host parameter limit of the bundled SQLite (SQLITE_MAX_VARIABLE_NUMBER).
pub const SQLITE_MAX_VARIABLES: usize = 32766;

/// SQLite column type for a kind. Dates and datetimes are stored as ISO
/// text under declared DATE/DATETIME types.
pub fn sqlite_type(kind: Kind) -> &'static str {
    match kind {
        Kind::Null | Kind::Text => "TEXT",
        Kind::Bool => "BOOLEAN",
        Kind::Int => "INTEGER",
        Kind::Float => "REAL",
        Kind::Date => "DATE",
        Kind::Datetime => "DATETIME",
    }
}

impl ToSql for Datum {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Datum::Null => ToSqlOutput::Owned(SqlValue::Null),
            Datum::Bool(b) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*b))),
            Datum::Int(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Datum::Float(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
            Datum::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Datum::Date(_) | Datum::Datetime(_) => ToSqlOutput::Owned(SqlValue::Text(self.to_string())),
        })
    }
}

/// A prepared insert. The statement itself lives in the connection's
/// statement cache, keyed by its SQL.
#[derive(Debug, Clone)]
pub struct SqliteInsert {
    sql: String,
    width: usize,
    rows: usize,
}

impl SqliteInsert {
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

/// [`SqlBackend`] over a single rusqlite connection.
pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        Ok(Self::from_connection(Connection::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self, BackendError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        SqliteBackend { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }
}

/// CREATE TABLE statement for a table definition.
pub fn create_table_sql(table: &TableDef) -> String {
    let cols: Vec<String> = table
        .columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), sqlite_type(c.kind)))
        .collect();
    format!("CREATE TABLE {} ({})", quote_ident(&table.name), cols.join(", "))
}

/// INSERT statement for `rows` rows of `columns`.
pub fn insert_sql(table: &str, columns: &[String], rows: usize) -> String {
    if columns.is_empty() {
        return format!("INSERT INTO {} DEFAULT VALUES", quote_ident(table));
    }

    let names: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let tuple = format!("({})", vec!["?"; columns.len()].join(", "));
    let tuples = vec![tuple.as_str(); rows].join(", ");
    format!("INSERT INTO {} ({}) VALUES {}", quote_ident(table), names.join(", "), tuples)
}

impl SqlBackend for SqliteBackend {
    type Stmt = SqliteInsert;

    fn create_table(&mut self, table: &TableDef) -> Result<(), BackendError> {
        if table.columns.is_empty() {
            return Err(BackendError::Other(format!("table {:?} has no columns", table.name)));
        }
        let sql = create_table_sql(table);
        trace!(%sql, "sqlite create");
        self.conn.execute(&sql, [])?;
        Ok(())
    }

    fn prepare_insert(&mut self, table: &str, columns: &[String], rows: usize) -> Result<SqliteInsert, BackendError> {
        let sql = insert_sql(table, columns, rows);
        // Prepare once up front so unknown tables and columns fail here.
        self.conn.prepare_cached(&sql)?;
        Ok(SqliteInsert {
            sql,
            width: columns.len(),
            rows,
        })
    }

    fn execute(&mut self, stmt: &mut SqliteInsert, values: &[Datum]) -> Result<u64, BackendError> {
        let expected = stmt.width * stmt.rows;
        if values.len() != expected {
            return Err(BackendError::Arity {
                expected,
                actual: values.len(),
            });
        }

        let mut prepared = self.conn.prepare_cached(&stmt.sql)?;
        if stmt.width == 0 {
            // DEFAULT VALUES inserts a single row per execution
            for _ in 0..stmt.rows {
                prepared.execute([])?;
            }
            return Ok(stmt.rows as u64);
        }

        let n = prepared.execute(params_from_iter(values.iter()))?;
        Ok(n as u64)
    }

    fn close(&mut self, _stmt: SqliteInsert) -> Result<(), BackendError> {
        // Statements stay in the connection cache for reuse.
        Ok(())
    }

    fn max_batch_values(&self) -> usize {
        SQLITE_MAX_VARIABLES
    }
}
