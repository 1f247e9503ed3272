//! Flatten-mode schema model.
//!
//! [`SchemaModel`] walks each decoded record, grows the entity tree, feeds
//! the per-field detectors and buffers the record's values until the
//! engine asks for insertions. Nested objects fold into the single `data`
//! table with scope-joined column names.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};
use tracing::debug;

use super::columns::column_order_flat;
use super::detect::Coercion;
use super::entity::{EntityId, EntityTree, FieldShape};
use crate::error::{IngestError, Result};
use crate::sql::{ColumnDef, Insertion, SqlBackend, TableDef};
use crate::types::{Datum, Kind, MONOTABLE_NAME};

/// One record's values: flattened column name to value, keyed by the
/// entity that contributed them.
pub type ObjectValueSet = BTreeMap<EntityId, BTreeMap<String, Datum>>;

/// Immutable snapshot of the inferred relational schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportSchema {
    pub tables: Vec<TableDef>,

    /// Table each entity's fields land in.
    pub entity_tables: BTreeMap<EntityId, String>,

    /// Insert-time conversions, by column name.
    pub coercions: BTreeMap<String, Coercion>,
}

impl ImportSchema {
    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.name == name)
    }
}

/// Schema inference state for one ingest run.
#[derive(Debug)]
pub struct SchemaModel {
    separator: String,
    tree: EntityTree,

    /// Flattened column names in first-seen order. Positions never move.
    column_order: Vec<String>,

    /// Entities that gained a field since the last `mark_clean`.
    dirty: BTreeSet<EntityId>,

    pending: Vec<ObjectValueSet>,
    records: usize,
}

impl SchemaModel {
    pub fn new(separator: impl Into<String>) -> Self {
        SchemaModel {
            separator: separator.into(),
            tree: EntityTree::new(MONOTABLE_NAME),
            column_order: Vec::new(),
            dirty: BTreeSet::new(),
            pending: Vec::new(),
            records: 0,
        }
    }

    pub fn tree(&self) -> &EntityTree {
        &self.tree
    }

    pub fn column_order(&self) -> &[String] {
        &self.column_order
    }

    /// Number of records processed and buffered but not yet turned into
    /// insertions.
    pub fn pending_rows(&self) -> usize {
        self.pending.len()
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Forget dirtiness once a schema covering the current tree is built.
    pub fn mark_clean(&mut self) {
        self.dirty.clear();
    }

    /// Fold one decoded record into the model. `chunk` is the record's
    /// source text, used to recover column order.
    ///
    /// Returns whether the model is dirty. A record that fails is not
    /// buffered.
    pub fn process_object(&mut self, object: &Map<String, Value>, chunk: &[u8]) -> Result<bool> {
        self.records += 1;

        let mut values = ObjectValueSet::new();
        let grew = self.walk(EntityId::ROOT, object, &mut values)?;

        if grew {
            let cols = column_order_flat(chunk, &self.separator).map_err(|e| IngestError::Decode {
                record: self.records,
                message: e.to_string(),
            })?;
            for col in cols {
                if !self.column_order.contains(&col) {
                    self.column_order.push(col);
                }
            }
        }

        self.pending.push(values);
        Ok(self.is_dirty())
    }

    /// Returns true if a new field or entity was registered.
    fn walk(&mut self, id: EntityId, object: &Map<String, Value>, values: &mut ObjectValueSet) -> Result<bool> {
        let mut grew = false;

        for (field, value) in object {
            let shape = self.tree.get(id).shape(field);

            match value {
                Value::Object(child) => {
                    let child_id = match shape {
                        Some(FieldShape::Object(c)) => c,
                        Some(other) => return Err(self.conflict(id, field, other, "object")),
                        None => {
                            self.dirty.insert(id);
                            grew = true;
                            self.tree.add_child(id, field)
                        }
                    };
                    grew |= self.walk(child_id, child, values)?;
                }

                Value::Array(_) => match shape {
                    Some(FieldShape::Array) => {}
                    Some(other) => return Err(self.conflict(id, field, other, "array")),
                    None => {
                        self.dirty.insert(id);
                        grew = true;
                        self.tree.get_mut(id).add_field(field, FieldShape::Array);
                    }
                },

                scalar => {
                    let Some(datum) = Datum::from_json(scalar) else {
                        continue;
                    };

                    match shape {
                        Some(FieldShape::Scalar) => {}
                        // null carries no shape
                        Some(_) if datum.is_null() => continue,
                        Some(other) => return Err(self.conflict(id, field, other, "scalar")),
                        None => {
                            self.dirty.insert(id);
                            grew = true;
                            self.tree.get_mut(id).add_field(field, FieldShape::Scalar);
                        }
                    }

                    if let Some(detector) = self.tree.get_mut(id).detectors.get_mut(field.as_str()) {
                        detector.sample(&datum);
                    }

                    let column = self.tree.column_name(id, field, &self.separator);
                    values.entry(id).or_default().insert(column, datum);
                }
            }
        }

        Ok(grew)
    }

    fn conflict(&self, id: EntityId, field: &str, was: FieldShape, now: &'static str) -> IngestError {
        IngestError::ShapeConflict {
            field: self.tree.qualified_field(id, field),
            was: was.describe(),
            now,
        }
    }

    /// Build the flat table definition from the current tree and
    /// detectors.
    pub fn build_schema(&self) -> Result<ImportSchema> {
        let mut columns: Vec<ColumnDef> = Vec::new();
        let mut coercions = BTreeMap::new();
        let mut entity_tables = BTreeMap::new();

        for id in self.tree.pre_order() {
            entity_tables.insert(id, MONOTABLE_NAME.to_string());
            let entity = self.tree.get(id);

            for field in &entity.field_names {
                let name = self.tree.column_name(id, field, &self.separator);

                let kind = match entity.shape(field) {
                    Some(FieldShape::Scalar) => {
                        let (kind, coercion) = entity
                            .detectors
                            .get(field)
                            .map(|d| d.detect())
                            .unwrap_or((Kind::Null, None));
                        if let Some(c) = coercion {
                            coercions.insert(name.clone(), c);
                        }
                        if kind == Kind::Null {
                            Kind::Text
                        } else {
                            kind
                        }
                    }
                    // Array contents are not projected; the column stays null.
                    Some(FieldShape::Array) => Kind::Text,
                    Some(FieldShape::Object(_)) | None => continue,
                };

                if columns.iter().any(|c| c.name == name) {
                    return Err(IngestError::DuplicateColumn {
                        column: name,
                        entity: self.tree.qualified_name(id),
                    });
                }

                columns.push(ColumnDef {
                    name,
                    table: MONOTABLE_NAME.to_string(),
                    kind,
                });
            }
        }

        // Stable: columns missing from the running order keep tree order
        // at the end.
        columns.sort_by_key(|c| {
            self.column_order
                .iter()
                .position(|n| *n == c.name)
                .unwrap_or(usize::MAX)
        });

        debug!(
            table = MONOTABLE_NAME,
            columns = columns.len(),
            entities = self.tree.len(),
            "built schema"
        );

        Ok(ImportSchema {
            tables: vec![TableDef {
                name: MONOTABLE_NAME.to_string(),
                columns,
            }],
            entity_tables,
            coercions,
        })
    }

    /// Drain buffered records into insertions against `schema`. Each row's
    /// columns are sorted by name.
    pub fn build_insertions(&mut self, schema: &ImportSchema) -> Result<Vec<Insertion>> {
        let table = match schema.tables.as_slice() {
            [table] => table,
            tables => {
                return Err(IngestError::Unsupported(format!(
                    "flatten mode expects exactly one table, schema has {}",
                    tables.len()
                )))
            }
        };

        let pending = std::mem::take(&mut self.pending);
        let mut rows = Vec::with_capacity(pending.len());

        for record in pending {
            let mut row: BTreeMap<String, Datum> = BTreeMap::new();

            for (id, values) in record {
                for (column, value) in values {
                    if row.contains_key(&column) {
                        return Err(IngestError::DuplicateColumn {
                            column,
                            entity: self.tree.qualified_name(id),
                        });
                    }

                    let def = table.column(&column).ok_or_else(|| {
                        IngestError::SchemaEvolutionUnsupported(format!(
                            "column {} is not in table {}",
                            column, table.name
                        ))
                    })?;
                    let value = conform(def, schema.coercions.get(&column), value)?;
                    row.insert(column, value);
                }
            }

            let (columns, values) = row.into_iter().unzip();
            rows.push(Insertion::new(table.name.clone(), columns, values));
        }

        Ok(rows)
    }
}

/// Apply the column's coercion, then check the value fits the column kind.
fn conform(column: &ColumnDef, coercion: Option<&Coercion>, value: Datum) -> Result<Datum> {
    let value = match coercion {
        Some(c) => c.apply(value).map_err(|message| IngestError::Coerce {
            column: column.name.clone(),
            message,
        })?,
        None => value,
    };

    match (column.kind, value) {
        (_, Datum::Null) => Ok(Datum::Null),
        (Kind::Text, v @ Datum::Text(_)) => Ok(v),
        (Kind::Text, v) => Ok(Datum::Text(v.to_string())),
        (Kind::Float, Datum::Int(i)) => Ok(Datum::Float(i as f64)),
        (kind, v) if kind.as_str() == v.type_name() => Ok(v),
        (kind, v) => Err(IngestError::Coerce {
            column: column.name.clone(),
            message: format!("{} value {} does not fit a {} column", v.type_name(), v, kind),
        }),
    }
}

/// Apply the DDL needed to move the destination from `current` to `new`.
///
/// Only initial creation is supported. A changed schema after the tables
/// exist is reported as [`IngestError::SchemaEvolutionUnsupported`].
pub fn exec_schema_delta<B: SqlBackend>(
    backend: &mut B,
    current: Option<&ImportSchema>,
    new: &ImportSchema,
) -> Result<()> {
    match current {
        None => {
            for table in &new.tables {
                debug!(table = %table.name, columns = table.columns.len(), "creating table");
                backend.create_table(table)?;
            }
            Ok(())
        }
        Some(cur) if cur.tables == new.tables => {
            debug!("schema unchanged");
            Ok(())
        }
        Some(cur) => Err(IngestError::SchemaEvolutionUnsupported(describe_delta(cur, new))),
    }
}

fn describe_delta(current: &ImportSchema, new: &ImportSchema) -> String {
    let mut changes = Vec::new();

    for table in &new.tables {
        let Some(old) = current.table(&table.name) else {
            changes.push(format!("new table {}", table.name));
            continue;
        };
        for col in &table.columns {
            match old.column(&col.name) {
                None => changes.push(format!("new column {}.{} ({})", table.name, col.name, col.kind)),
                Some(prev) if prev.kind != col.kind => changes.push(format!(
                    "column {}.{} changed from {} to {}",
                    table.name, col.name, prev.kind, col.kind
                )),
                Some(_) => {}
            }
        }
    }

    if changes.is_empty() {
        "table structure changed after creation".to_string()
    } else {
        format!("structure changed after table creation: {}", changes.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::MemoryBackend;
    use serde_json::json;

    fn feed(model: &mut SchemaModel, value: Value) -> Result<bool> {
        let chunk = serde_json::to_vec(&value).unwrap();
        model.process_object(value.as_object().unwrap(), &chunk)
    }

    fn kinds(schema: &ImportSchema) -> Vec<(String, Kind)> {
        schema.tables[0]
            .columns
            .iter()
            .map(|c| (c.name.clone(), c.kind))
            .collect()
    }

    #[test]
    fn test_nested_objects_flatten() {
        let mut model = SchemaModel::new("_");
        assert!(feed(&mut model, json!({"a": 1, "b": {"c": 2, "d": 3}})).unwrap());

        let schema = model.build_schema().unwrap();
        assert_eq!(schema.tables[0].name, "data");
        assert_eq!(schema.tables[0].column_names(), vec!["a", "b_c", "b_d"]);
        assert_eq!(schema.entity_tables.len(), 2);
    }

    #[test]
    fn test_first_seen_order_is_kept() {
        let mut model = SchemaModel::new("_");
        feed(&mut model, json!({"b": 1})).unwrap();
        feed(&mut model, json!({"a": 1.1, "b": 2})).unwrap();

        let schema = model.build_schema().unwrap();
        assert_eq!(kinds(&schema), vec![("b".to_string(), Kind::Int), ("a".to_string(), Kind::Float)]);
        assert_eq!(model.column_order(), &["b", "a"]);
    }

    #[test]
    fn test_detected_kinds() {
        let mut model = SchemaModel::new("_");
        feed(&mut model, json!({"a": 1, "b": 1, "c": true, "d": "2020-06-11", "e": 2.0})).unwrap();
        feed(&mut model, json!({"a": 1.0, "b": 1, "c": false, "d": "2020-06-12", "e": 2.01})).unwrap();

        let schema = model.build_schema().unwrap();
        let want: Vec<(String, Kind)> = vec![
            ("a".into(), Kind::Int),
            ("b".into(), Kind::Int),
            ("c".into(), Kind::Bool),
            ("d".into(), Kind::Date),
            ("e".into(), Kind::Float),
        ];
        assert_eq!(kinds(&schema), want);

        let rows = model.build_insertions(&schema).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].values[4], Datum::Float(2.0));
        assert!(matches!(rows[0].values[3], Datum::Date(_)));
        assert_eq!(model.pending_rows(), 0);
    }

    #[test]
    fn test_all_null_becomes_text() {
        let mut model = SchemaModel::new("_");
        feed(&mut model, json!({"n": null})).unwrap();
        feed(&mut model, json!({"n": null})).unwrap();

        let schema = model.build_schema().unwrap();
        assert_eq!(kinds(&schema), vec![("n".to_string(), Kind::Text)]);
    }

    #[test]
    fn test_scalar_then_object_conflicts() {
        let mut model = SchemaModel::new("_");
        feed(&mut model, json!({"x": 1})).unwrap();

        let err = feed(&mut model, json!({"x": {"y": 1}})).unwrap_err();
        match err {
            IngestError::ShapeConflict { field, was, now } => {
                assert_eq!(field, "data.x");
                assert_eq!(was, "scalar");
                assert_eq!(now, "object");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(model.pending_rows(), 1);
    }

    #[test]
    fn test_object_and_array_conflicts() {
        let mut model = SchemaModel::new("_");
        feed(&mut model, json!({"o": {"k": 1}, "t": [1, 2]})).unwrap();

        assert!(matches!(feed(&mut model, json!({"o": 5})), Err(IngestError::ShapeConflict { .. })));
        assert!(matches!(feed(&mut model, json!({"t": {"k": 1}})), Err(IngestError::ShapeConflict { .. })));
        assert!(matches!(feed(&mut model, json!({"o": [1]})), Err(IngestError::ShapeConflict { .. })));
    }

    #[test]
    fn test_null_for_object_field_is_ignored() {
        let mut model = SchemaModel::new("_");
        feed(&mut model, json!({"o": {"k": 1}, "t": ["x"]})).unwrap();
        feed(&mut model, json!({"o": null, "t": null})).unwrap();

        let schema = model.build_schema().unwrap();
        assert_eq!(kinds(&schema), vec![("o_k".to_string(), Kind::Int), ("t".to_string(), Kind::Text)]);

        let rows = model.build_insertions(&schema).unwrap();
        assert_eq!(rows[0].columns, vec!["o_k"]);
        assert!(rows[1].columns.is_empty());
    }

    #[test]
    fn test_dirty_tracking() {
        let mut model = SchemaModel::new("_");
        assert!(feed(&mut model, json!({"a": 1})).unwrap());
        model.mark_clean();
        assert!(!feed(&mut model, json!({"a": 2})).unwrap());
        assert!(feed(&mut model, json!({"a": 3, "z": {"q": true}})).unwrap());
        assert!(model.is_dirty());
    }

    #[test]
    fn test_insertion_columns_sorted() {
        let mut model = SchemaModel::new("_");
        feed(&mut model, json!({"z": 1, "m": {"b": "x"}, "a": null})).unwrap();

        let schema = model.build_schema().unwrap();
        assert_eq!(schema.tables[0].column_names(), vec!["z", "m_b", "a"]);

        let rows = model.build_insertions(&schema).unwrap();
        assert_eq!(rows[0].columns, vec!["a", "m_b", "z"]);
        assert_eq!(rows[0].values, vec![Datum::Null, Datum::Text("x".into()), Datum::Int(1)]);
    }

    #[test]
    fn test_custom_separator() {
        let mut model = SchemaModel::new("__");
        feed(&mut model, json!({"name": {"first": "a", "inner": {"x": 1}}})).unwrap();
        let schema = model.build_schema().unwrap();
        assert_eq!(schema.tables[0].column_names(), vec!["name__first", "name__inner__x"]);
    }

    #[test]
    fn test_colliding_flattened_names() {
        let mut model = SchemaModel::new("_");
        feed(&mut model, json!({"a_b": 1, "a": {"b": 2}})).unwrap();
        assert!(matches!(model.build_schema(), Err(IngestError::DuplicateColumn { .. })));
    }

    #[test]
    fn test_late_value_that_does_not_fit() {
        let mut model = SchemaModel::new("_");
        feed(&mut model, json!({"a": 1})).unwrap();
        let schema = model.build_schema().unwrap();
        model.build_insertions(&schema).unwrap();

        feed(&mut model, json!({"a": "nope"})).unwrap();
        let err = model.build_insertions(&schema).unwrap_err();
        assert!(matches!(err, IngestError::Coerce { ref column, .. } if column == "a"));
    }

    #[test]
    fn test_text_column_stringifies_late_scalars() {
        let mut model = SchemaModel::new("_");
        feed(&mut model, json!({"s": "hello"})).unwrap();
        let schema = model.build_schema().unwrap();
        model.build_insertions(&schema).unwrap();

        feed(&mut model, json!({"s": 42})).unwrap();
        let rows = model.build_insertions(&schema).unwrap();
        assert_eq!(rows[0].values, vec![Datum::Text("42".into())]);
    }

    #[test]
    fn test_schema_delta() {
        let mut model = SchemaModel::new("_");
        feed(&mut model, json!({"a": 1})).unwrap();
        let first = model.build_schema().unwrap();

        let mut backend = MemoryBackend::new();
        exec_schema_delta(&mut backend, None, &first).unwrap();
        assert!(backend.table("data").is_some());

        exec_schema_delta(&mut backend, Some(&first), &first.clone()).unwrap();

        feed(&mut model, json!({"a": 2, "b": "x"})).unwrap();
        let second = model.build_schema().unwrap();
        let err = exec_schema_delta(&mut backend, Some(&first), &second).unwrap_err();
        match err {
            IngestError::SchemaEvolutionUnsupported(msg) => assert!(msg.contains("data.b")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
