//! Ingest orchestration.
//!
//! [`IngestEngine`] is an explicit state machine:
//!
//! ```text
//! Sampling -> SchemaBuilt -> Draining -> Done
//!                  ^             |
//!                  +-- dirtied --+
//! ```
//!
//! with `Failed` reachable from every state. Each state has one handler
//! that does one step of work and returns the next state. Cancellation is
//! checked at every record boundary and before every SQL statement.

use std::io::BufReader;
use std::time::Instant;

use tracing::{debug, info, trace, warn};

use crate::cancel::CancelToken;
use crate::error::{IngestError, Result};
use crate::scan::{is_blank, sniff, ArrayScanner, Dialect, LineScanner, RecordScanner, ReopenableSource};
use crate::schema::{exec_schema_delta, ImportSchema, SchemaModel};
use crate::sql::{max_batch_rows, Insertion, SqlBackend};
use crate::types::{Datum, IngestConfig};

/// States of an ingest run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    /// Reading records to infer the schema.
    Sampling,
    /// A schema is ready to be applied and buffered rows flushed.
    SchemaBuilt,
    /// Schema exists; records are inserted as they arrive.
    Draining,
    Done,
    Failed,
}

/// Summary of a completed run.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub dialect: Dialect,
    pub records: usize,
    pub rows_inserted: u64,
    pub schema: ImportSchema,
}

/// Drives one scanner into one backend.
pub struct IngestEngine<'a, S, B> {
    scanner: S,
    backend: &'a mut B,
    config: IngestConfig,
    cancel: CancelToken,

    model: SchemaModel,
    schema: Option<ImportSchema>,
    state: IngestState,

    exhausted: bool,
    records: usize,
    rows_inserted: u64,
}

impl<'a, S: RecordScanner, B: SqlBackend> IngestEngine<'a, S, B> {
    pub fn new(scanner: S, backend: &'a mut B, config: IngestConfig, cancel: CancelToken) -> Self {
        let model = SchemaModel::new(config.separator.clone());
        IngestEngine {
            scanner,
            backend,
            config,
            cancel,
            model,
            schema: None,
            state: IngestState::Sampling,
            exhausted: false,
            records: 0,
            rows_inserted: 0,
        }
    }

    pub fn state(&self) -> IngestState {
        self.state
    }

    /// Run to completion. On error the engine is left in
    /// [`IngestState::Failed`]; rows committed before the failure stay.
    pub fn run(&mut self) -> Result<IngestReport> {
        loop {
            let step = match self.state {
                IngestState::Sampling => self.on_sampling(),
                IngestState::SchemaBuilt => self.on_schema_built(),
                IngestState::Draining => self.on_draining(),
                IngestState::Done => return self.report(),
                IngestState::Failed => {
                    return Err(IngestError::Unsupported("ingest run already failed".into()))
                }
            };

            match step {
                Ok(next) => {
                    if next != self.state {
                        debug!(from = ?self.state, to = ?next, records = self.records, "ingest state change");
                    }
                    self.state = next;
                }
                Err(e) => {
                    debug!(state = ?self.state, records = self.records, error = %e, "ingest failed");
                    self.state = IngestState::Failed;
                    return Err(e);
                }
            }
        }
    }

    fn on_sampling(&mut self) -> Result<IngestState> {
        self.cancel.check()?;

        match self.scanner.next_record()? {
            None => {
                self.exhausted = true;
                if self.records == 0 {
                    return Err(IngestError::EmptyInput);
                }
                Ok(IngestState::SchemaBuilt)
            }
            Some(rec) => {
                self.process(&rec.object, &rec.chunk)?;
                if self.records >= self.config.sample_size {
                    Ok(IngestState::SchemaBuilt)
                } else {
                    Ok(IngestState::Sampling)
                }
            }
        }
    }

    fn on_schema_built(&mut self) -> Result<IngestState> {
        self.cancel.check()?;

        let schema = self.model.build_schema()?;
        exec_schema_delta(&mut *self.backend, self.schema.as_ref(), &schema)?;
        self.model.mark_clean();
        self.schema = Some(schema);

        self.flush()?;
        Ok(if self.exhausted {
            IngestState::Done
        } else {
            IngestState::Draining
        })
    }

    fn on_draining(&mut self) -> Result<IngestState> {
        self.cancel.check()?;

        match self.scanner.next_record()? {
            None => {
                self.exhausted = true;
                self.flush()?;
                Ok(IngestState::Done)
            }
            Some(rec) => {
                if self.process(&rec.object, &rec.chunk)? {
                    return Ok(IngestState::SchemaBuilt);
                }
                if self.model.pending_rows() >= self.config.batch_size {
                    self.flush()?;
                }
                Ok(IngestState::Draining)
            }
        }
    }

    fn process(&mut self, object: &serde_json::Map<String, serde_json::Value>, chunk: &[u8]) -> Result<bool> {
        let dirtied = self.model.process_object(object, chunk)?;
        self.records += 1;
        trace!(record = self.records, dirtied, "processed record");
        Ok(dirtied)
    }

    fn flush(&mut self) -> Result<()> {
        let schema = self
            .schema
            .as_ref()
            .ok_or_else(|| IngestError::Unsupported("rows flushed before a schema was built".into()))?;
        let rows = self.model.build_insertions(schema)?;
        self.exec_insertions(rows)
    }

    /// Execute rows in source order. Consecutive rows with the same
    /// columns share one statement, up to `batch_size` rows and no more
    /// values than the backend can bind.
    fn exec_insertions(&mut self, rows: Vec<Insertion>) -> Result<()> {
        let max_values = self.backend.max_batch_values();
        let mut rows = rows.into_iter().peekable();

        while let Some(first) = rows.next() {
            let limit = self.config.batch_size.min(max_batch_rows(max_values, first.columns.len()));
            let mut group = vec![first];
            while group.len() < limit
                && rows.peek().is_some_and(|r| r.same_statement(&group[0]))
            {
                group.extend(rows.next());
            }
            self.exec_group(group)?;
        }

        Ok(())
    }

    fn exec_group(&mut self, group: Vec<Insertion>) -> Result<()> {
        self.cancel.check()?;

        let mut stmt = self
            .backend
            .prepare_insert(&group[0].table, &group[0].columns, group.len())?;
        let values: Vec<Datum> = group.into_iter().flat_map(|r| r.values).collect();

        let executed = self.backend.execute(&mut stmt, &values);
        let closed = self.backend.close(stmt);

        match (executed, closed) {
            (Ok(n), Ok(())) => {
                self.rows_inserted += n;
                Ok(())
            }
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), Ok(())) => Err(e.into()),
            (Err(e), Err(close_err)) => {
                warn!(error = %close_err, "failed to close insert statement after execute error");
                Err(e.into())
            }
        }
    }

    fn report(&self) -> Result<IngestReport> {
        let schema = self
            .schema
            .clone()
            .ok_or_else(|| IngestError::Unsupported("run finished without a schema".into()))?;
        Ok(IngestReport {
            dialect: self.scanner.dialect(),
            records: self.records,
            rows_inserted: self.rows_inserted,
            schema,
        })
    }
}

/// Work out the dialect of `source`, or fail if it is neither.
pub fn detect_dialect(source: &dyn ReopenableSource, sample_size: usize) -> Result<Dialect> {
    match sniff(source, sample_size)? {
        Some((dialect, score)) => {
            debug!(source = %source.describe(), %dialect, score, "detected dialect");
            Ok(dialect)
        }
        None if is_blank(source)? => Err(IngestError::EmptyInput),
        None => Err(IngestError::malformed(
            0,
            "input is neither a JSON array of objects nor line-delimited JSON objects",
        )),
    }
}

/// Ingest `source` into `backend`. The dialect is sniffed when not given.
pub fn ingest<B: SqlBackend>(
    source: &dyn ReopenableSource,
    dialect: Option<Dialect>,
    backend: &mut B,
    config: &IngestConfig,
    cancel: &CancelToken,
) -> Result<IngestReport> {
    config.validate()?;

    let dialect = match dialect {
        Some(d) => d,
        None => detect_dialect(source, config.sample_size)?,
    };

    let start = Instant::now();
    let reader = source.open()?;
    let report = match dialect {
        Dialect::Array => {
            IngestEngine::new(ArrayScanner::new(reader), backend, config.clone(), cancel.clone()).run()?
        }
        Dialect::Lines => IngestEngine::new(
            LineScanner::new(BufReader::new(reader)),
            backend,
            config.clone(),
            cancel.clone(),
        )
        .run()?,
    };

    info!(
        source = %source.describe(),
        %dialect,
        records = report.records,
        rows = report.rows_inserted,
        columns = report.schema.tables.iter().map(|t| t.columns.len()).sum::<usize>(),
        elapsed = ?start.elapsed(),
        "ingest complete"
    );
    Ok(report)
}

/// Sample `source` and return the schema an ingest would create, without
/// touching any backend.
pub fn infer_schema(
    source: &dyn ReopenableSource,
    dialect: Option<Dialect>,
    config: &IngestConfig,
) -> Result<(Dialect, ImportSchema)> {
    config.validate()?;

    let dialect = match dialect {
        Some(d) => d,
        None => detect_dialect(source, config.sample_size)?,
    };

    let reader = source.open()?;
    let schema = match dialect {
        Dialect::Array => sample_schema(ArrayScanner::new(reader), config)?,
        Dialect::Lines => sample_schema(LineScanner::new(BufReader::new(reader)), config)?,
    };
    Ok((dialect, schema))
}

fn sample_schema<S: RecordScanner>(mut scanner: S, config: &IngestConfig) -> Result<ImportSchema> {
    let mut model = SchemaModel::new(config.separator.clone());
    let mut seen = 0;

    while seen < config.sample_size {
        let Some(rec) = scanner.next_record()? else {
            break;
        };
        model.process_object(&rec.object, &rec.chunk)?;
        seen += 1;
    }

    if seen == 0 {
        return Err(IngestError::EmptyInput);
    }
    model.build_schema()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::BytesSource;
    use crate::sql::{BackendError, MemoryBackend, SqliteBackend, TableDef};
    use crate::types::Kind;

    /// Memory backend that cancels the run once `after` statements have run.
    struct CancelAfter {
        inner: MemoryBackend,
        after: usize,
        cancel: CancelToken,
    }

    impl SqlBackend for CancelAfter {
        type Stmt = <MemoryBackend as SqlBackend>::Stmt;

        fn create_table(&mut self, table: &TableDef) -> std::result::Result<(), BackendError> {
            self.inner.create_table(table)
        }

        fn prepare_insert(
            &mut self,
            table: &str,
            columns: &[String],
            rows: usize,
        ) -> std::result::Result<Self::Stmt, BackendError> {
            self.inner.prepare_insert(table, columns, rows)
        }

        fn execute(&mut self, stmt: &mut Self::Stmt, values: &[Datum]) -> std::result::Result<u64, BackendError> {
            let n = self.inner.execute(stmt, values)?;
            if self.inner.statements_executed() == self.after {
                self.cancel.cancel();
            }
            Ok(n)
        }

        fn close(&mut self, stmt: Self::Stmt) -> std::result::Result<(), BackendError> {
            self.inner.close(stmt)
        }
    }

    fn config(sample_size: usize) -> IngestConfig {
        IngestConfig {
            sample_size,
            ..IngestConfig::default()
        }
    }

    fn run_lines(input: &str, config: IngestConfig, backend: &mut MemoryBackend) -> Result<IngestReport> {
        let src = BytesSource::new(input);
        ingest(&src, Some(Dialect::Lines), backend, &config, &CancelToken::new())
    }

    fn columns(backend: &MemoryBackend) -> Vec<(String, Kind)> {
        backend
            .table("data")
            .unwrap()
            .def
            .columns
            .iter()
            .map(|c| (c.name.clone(), c.kind))
            .collect()
    }

    #[test]
    fn test_whole_floats_stay_int() {
        let mut be = MemoryBackend::new();
        let report = run_lines("{\"a\":1,\"b\":1}\n{\"a\":1.0,\"b\":2}\n", config(2), &mut be).unwrap();

        assert_eq!(columns(&be), vec![("a".to_string(), Kind::Int), ("b".to_string(), Kind::Int)]);
        assert_eq!(be.table("data").unwrap().rows, vec![
            vec![Datum::Int(1), Datum::Int(1)],
            vec![Datum::Int(1), Datum::Int(2)],
        ]);
        assert_eq!(report.records, 2);
        assert_eq!(report.rows_inserted, 2);
        assert_eq!(report.dialect, Dialect::Lines);
    }

    #[test]
    fn test_quoted_scalars_are_typed() {
        let mut be = MemoryBackend::new();
        run_lines(
            "{\"id\":\"1\",\"score\":\"2.5\",\"ok\":\"true\"}\n{\"id\":\"2\",\"score\":\"3\",\"ok\":\"\"}\n",
            IngestConfig::default(),
            &mut be,
        )
        .unwrap();

        assert_eq!(columns(&be), vec![
            ("id".to_string(), Kind::Int),
            ("score".to_string(), Kind::Float),
            ("ok".to_string(), Kind::Bool),
        ]);
        assert_eq!(be.table("data").unwrap().rows, vec![
            vec![Datum::Int(1), Datum::Float(2.5), Datum::Bool(true)],
            vec![Datum::Int(2), Datum::Float(3.0), Datum::Null],
        ]);
    }

    #[test]
    fn test_columns_in_first_seen_order() {
        let mut be = MemoryBackend::new();
        run_lines("{\"b\":1}\n{\"a\":1.1,\"b\":2}\n", IngestConfig::default(), &mut be).unwrap();

        assert_eq!(columns(&be), vec![("b".to_string(), Kind::Int), ("a".to_string(), Kind::Float)]);
        assert_eq!(be.table("data").unwrap().rows, vec![
            vec![Datum::Int(1), Datum::Null],
            vec![Datum::Int(2), Datum::Float(1.1)],
        ]);
    }

    #[test]
    fn test_shape_conflict_is_fatal() {
        let mut be = MemoryBackend::new();
        let err = run_lines("{\"x\":1}\n{\"x\":{\"y\":1}}\n", config(1), &mut be).unwrap_err();

        assert!(matches!(err, IngestError::ShapeConflict { .. }));
        assert!(err.is_malformed_input());
        // Only the record before the conflict made it.
        assert_eq!(be.table("data").unwrap().rows.len(), 1);
    }

    #[test]
    fn test_double_comma_commits_nothing() {
        let src = BytesSource::new(r#"[{"a":1},,{"a":2}]"#);
        let mut be = MemoryBackend::new();
        let err = ingest(&src, Some(Dialect::Array), &mut be, &config(1), &CancelToken::new()).unwrap_err();

        assert!(matches!(err, IngestError::Malformed { .. }));
        assert!(be.tables().is_empty());
    }

    #[test]
    fn test_empty_input() {
        let mut be = MemoryBackend::new();
        let err = run_lines("\n  \n", IngestConfig::default(), &mut be).unwrap_err();
        assert!(matches!(err, IngestError::EmptyInput));

        let src = BytesSource::new("[]");
        let err = ingest(&src, Some(Dialect::Array), &mut be, &IngestConfig::default(), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, IngestError::EmptyInput));

        let src = BytesSource::new("   ");
        let err = ingest(&src, None, &mut be, &IngestConfig::default(), &CancelToken::new()).unwrap_err();
        assert!(matches!(err, IngestError::EmptyInput));
    }

    #[test]
    fn test_new_field_after_schema_is_unsupported() {
        let mut be = MemoryBackend::new();
        let err = run_lines("{\"a\":1}\n{\"a\":2,\"b\":3}\n", config(1), &mut be).unwrap_err();

        assert!(matches!(err, IngestError::SchemaEvolutionUnsupported(_)));
        assert!(!err.is_malformed_input());
        assert_eq!(be.table("data").unwrap().rows.len(), 1);
    }

    #[test]
    fn test_new_empty_object_after_schema_is_harmless() {
        let mut be = MemoryBackend::new();
        let report = run_lines("{\"a\":1}\n{\"a\":2,\"e\":{}}\n", config(1), &mut be).unwrap();
        assert_eq!(report.rows_inserted, 2);
    }

    #[test]
    fn test_nested_and_array_fields() {
        let src = BytesSource::new(
            r#"[
                {"id": 1, "name": {"first": "Ada", "last": "Lovelace"}, "tags": ["x"]},
                {"id": 2, "name": {"first": "Alan"}, "seen": "2020-06-11T02:50:54Z"}
            ]"#,
        );
        let mut be = MemoryBackend::new();
        let report = ingest(&src, None, &mut be, &IngestConfig::default(), &CancelToken::new()).unwrap();

        assert_eq!(report.dialect, Dialect::Array);
        assert_eq!(report.schema.tables[0].column_names(), vec![
            "id",
            "name_first",
            "name_last",
            "tags",
            "seen"
        ]);
        assert_eq!(columns(&be)[4].1, Kind::Datetime);

        let table = be.table("data").unwrap();
        assert_eq!(table.column_values("tags").unwrap(), vec![&Datum::Null, &Datum::Null]);
        assert_eq!(table.column_values("name_last").unwrap()[1], &Datum::Null);
        assert!(matches!(table.column_values("seen").unwrap()[1], Datum::Datetime(_)));
    }

    #[test]
    fn test_batching_groups_rows() {
        let input = "{\"a\":1}\n{\"a\":2}\n{\"a\":3}\n{\"a\":4}\n{\"a\":5}\n";
        let mut be = MemoryBackend::new();
        let cfg = IngestConfig {
            sample_size: 1,
            batch_size: 2,
            ..IngestConfig::default()
        };
        let report = run_lines(input, cfg, &mut be).unwrap();

        assert_eq!(report.rows_inserted, 5);
        // 1 row flushed after sampling, then 2 + 2
        assert_eq!(be.statements_executed(), 3);
        let a: Vec<_> = be.table("data").unwrap().column_values("a").unwrap().into_iter().cloned().collect();
        assert_eq!(a, (1..=5).map(Datum::Int).collect::<Vec<_>>());
    }

    #[test]
    fn test_batches_split_on_column_set() {
        let input = "{\"a\":1,\"b\":1}\n{\"a\":2}\n{\"a\":3,\"b\":3}\n";
        let mut be = MemoryBackend::new();
        let cfg = IngestConfig {
            batch_size: 10,
            ..IngestConfig::default()
        };
        run_lines(input, cfg, &mut be).unwrap();
        assert_eq!(be.statements_executed(), 3);
        assert_eq!(be.table("data").unwrap().rows.len(), 3);
    }

    #[test]
    fn test_batches_respect_backend_value_limit() {
        let input: String = (1..=7).map(|i| format!("{{\"a\":{},\"b\":{},\"c\":{}}}\n", i, i, i)).collect();
        let mut be = MemoryBackend::new().with_max_batch_values(7);
        let cfg = IngestConfig {
            sample_size: 7,
            batch_size: 100,
            ..IngestConfig::default()
        };
        let report = run_lines(&input, cfg, &mut be).unwrap();

        // 3 columns under a limit of 7 values: rows go 2 + 2 + 2 + 1
        assert_eq!(report.rows_inserted, 7);
        assert_eq!(be.statements_executed(), 4);
    }

    #[test]
    fn test_wide_batches_fit_sqlite() {
        let mut input = String::new();
        for i in 0..2000 {
            let fields: Vec<String> = (0..20).map(|c| format!("\"c{}\":{}", c, i)).collect();
            input.push_str(&format!("{{{}}}\n", fields.join(",")));
        }
        let src = BytesSource::new(input);
        let mut be = SqliteBackend::open_in_memory().unwrap();
        let cfg = IngestConfig {
            sample_size: 1,
            batch_size: 2000,
            ..IngestConfig::default()
        };
        let report = ingest(&src, Some(Dialect::Lines), &mut be, &cfg, &CancelToken::new()).unwrap();

        assert_eq!(report.rows_inserted, 2000);
        let count: i64 = be
            .connection()
            .query_row("SELECT COUNT(*) FROM data", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2000);
    }

    #[test]
    fn test_cancelled_mid_run_keeps_committed_rows() {
        let src = BytesSource::new("{\"a\":1}\n{\"a\":2}\n{\"a\":3}\n");
        let cancel = CancelToken::new();
        let mut be = CancelAfter { inner: MemoryBackend::new(), after: 1, cancel: cancel.clone() };
        let cfg = IngestConfig {
            sample_size: 1,
            batch_size: 1,
            ..IngestConfig::default()
        };

        let err = ingest(&src, Some(Dialect::Lines), &mut be, &cfg, &cancel).unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(be.inner.table("data").unwrap().rows, vec![vec![Datum::Int(1)]]);
    }

    #[test]
    fn test_cancel_between_statements_of_one_flush() {
        // Three column sets need three statements in the first flush.
        let src = BytesSource::new("{\"a\":1,\"b\":1}\n{\"a\":2}\n{\"b\":3}\n");
        let cancel = CancelToken::new();
        let mut be = CancelAfter { inner: MemoryBackend::new(), after: 1, cancel: cancel.clone() };

        let err = ingest(&src, Some(Dialect::Lines), &mut be, &IngestConfig::default(), &cancel).unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(be.inner.statements_executed(), 1);
        assert_eq!(be.inner.table("data").unwrap().rows.len(), 1);
    }

    #[test]
    fn test_cancelled_before_start() {
        let src = BytesSource::new("{\"a\":1}\n");
        let mut be = MemoryBackend::new();
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = ingest(&src, Some(Dialect::Lines), &mut be, &IngestConfig::default(), &cancel).unwrap_err();
        assert!(err.is_cancelled());
        assert!(be.tables().is_empty());
    }

    #[test]
    fn test_engine_state_after_failure() {
        let src = BytesSource::new("{\"a\":1}\nnope\n");
        let mut be = MemoryBackend::new();
        let reader = src.open().unwrap();
        let mut engine = IngestEngine::new(
            LineScanner::new(BufReader::new(reader)),
            &mut be,
            IngestConfig::default(),
            CancelToken::new(),
        );

        let err = engine.run().unwrap_err();
        assert!(matches!(err, IngestError::MalformedLine { line: 2, .. }));
        assert_eq!(engine.state(), IngestState::Failed);
        assert!(engine.run().is_err());
    }

    #[test]
    fn test_backend_failure_keeps_earlier_rows() {
        let mut be = MemoryBackend::new().fail_on_execute(2);
        let err = run_lines("{\"a\":1}\n{\"a\":2}\n{\"a\":3}\n", config(1), &mut be).unwrap_err();

        assert!(matches!(err, IngestError::Backend(BackendError::Other(_))));
        assert_eq!(be.table("data").unwrap().rows.len(), 1);
    }

    #[test]
    fn test_infer_schema_does_not_need_backend() {
        let src = BytesSource::new("{\"a\":1,\"b\":\"2020-06-11\"}\n{\"a\":2.5,\"b\":null}\n");
        let (dialect, schema) = infer_schema(&src, None, &IngestConfig::default()).unwrap();

        assert_eq!(dialect, Dialect::Lines);
        let kinds: Vec<_> = schema.tables[0].columns.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![Kind::Float, Kind::Date]);
    }

    #[test]
    fn test_invalid_config_rejected_up_front() {
        let src = BytesSource::new("{\"a\":1}\n");
        let mut be = MemoryBackend::new();
        let cfg = IngestConfig {
            flatten: false,
            ..IngestConfig::default()
        };
        let err = ingest(&src, None, &mut be, &cfg, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, IngestError::Unsupported(_)));
    }

    #[test]
    fn test_unrecognised_input() {
        let src = BytesSource::new("hello");
        let mut be = MemoryBackend::new();
        let err = ingest(&src, None, &mut be, &IngestConfig::default(), &CancelToken::new()).unwrap_err();
        assert!(err.is_malformed_input());
    }
}
