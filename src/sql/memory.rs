use super::{BackendError, SqlBackend, TableDef};
use crate::types::Datum;

/// A table held in memory. Each row has one value per column; columns
/// absent from an insert are null.
#[derive(Debug, Clone)]
pub struct MemoryTable {
    pub def: TableDef,
    pub rows: Vec<Vec<Datum>>,
}

impl MemoryTable {
    /// Values of one column, top to bottom.
    pub fn column_values(&self, column: &str) -> Option<Vec<&Datum>> {
        let idx = self.def.columns.iter().position(|c| c.name == column)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }
}

/// Prepared insert for [`MemoryBackend`].
#[derive(Debug)]
pub struct MemoryInsert {
    table: usize,
    columns: Vec<usize>,
    rows: usize,
}

/// Backend keeping everything in memory, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: Vec<MemoryTable>,
    executed: usize,
    fail_on_execute: Option<usize>,
    max_values: Option<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `n`th execute call (1-based) fail.
    pub fn fail_on_execute(mut self, n: usize) -> Self {
        self.fail_on_execute = Some(n);
        self
    }

    /// Reject statements binding more than `n` values, like a real
    /// database's parameter limit.
    pub fn with_max_batch_values(mut self, n: usize) -> Self {
        self.max_values = Some(n);
        self
    }

    pub fn table(&self, name: &str) -> Option<&MemoryTable> {
        self.tables.iter().find(|t| t.def.name == name)
    }

    pub fn tables(&self) -> &[MemoryTable] {
        &self.tables
    }

    /// Number of successful execute calls.
    pub fn statements_executed(&self) -> usize {
        self.executed
    }
}

impl SqlBackend for MemoryBackend {
    type Stmt = MemoryInsert;

    fn create_table(&mut self, table: &TableDef) -> Result<(), BackendError> {
        if self.table(&table.name).is_some() {
            return Err(BackendError::TableExists(table.name.clone()));
        }
        self.tables.push(MemoryTable {
            def: table.clone(),
            rows: Vec::new(),
        });
        Ok(())
    }

    fn prepare_insert(&mut self, table: &str, columns: &[String], rows: usize) -> Result<MemoryInsert, BackendError> {
        let actual = columns.len() * rows;
        if actual > self.max_batch_values() {
            return Err(BackendError::TooManyValues {
                limit: self.max_batch_values(),
                actual,
            });
        }

        let idx = self
            .tables
            .iter()
            .position(|t| t.def.name == table)
            .ok_or_else(|| BackendError::NoSuchTable(table.to_string()))?;

        let def = &self.tables[idx].def;
        let columns = columns
            .iter()
            .map(|c| {
                def.columns
                    .iter()
                    .position(|d| &d.name == c)
                    .ok_or_else(|| BackendError::NoSuchColumn {
                        table: table.to_string(),
                        column: c.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(MemoryInsert { table: idx, columns, rows })
    }

    fn execute(&mut self, stmt: &mut MemoryInsert, values: &[Datum]) -> Result<u64, BackendError> {
        if self.fail_on_execute == Some(self.executed + 1) {
            return Err(BackendError::Other("injected execute failure".into()));
        }

        let expected = stmt.columns.len() * stmt.rows;
        if values.len() != expected {
            return Err(BackendError::Arity {
                expected,
                actual: values.len(),
            });
        }

        let table = &mut self.tables[stmt.table];
        let width = table.def.columns.len();
        for r in 0..stmt.rows {
            let mut row = vec![Datum::Null; width];
            for (i, &col) in stmt.columns.iter().enumerate() {
                row[col] = values[r * stmt.columns.len() + i].clone();
            }
            table.rows.push(row);
        }

        self.executed += 1;
        Ok(stmt.rows as u64)
    }

    fn close(&mut self, _stmt: MemoryInsert) -> Result<(), BackendError> {
        Ok(())
    }

    fn max_batch_values(&self) -> usize {
        self.max_values.unwrap_or(usize::MAX)
    }
}
