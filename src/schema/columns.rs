//! Column order as it appears in the raw record text.

use serde_json::{Map, Value};

/// Parse a record's raw text and return its flattened column names in the
/// order they appear. Nested objects are descended into; arrays are not.
///
/// ```
/// use sq_ingest::schema::column_order_flat;
///
/// let cols = column_order_flat(br#"{"a":1, "b": {"c":2, "d":3}}"#, "_").unwrap();
/// assert_eq!(cols, vec!["a", "b_c", "b_d"]);
/// ```
pub fn column_order_flat(chunk: &[u8], sep: &str) -> serde_json::Result<Vec<String>> {
    // serde_json is built with preserve_order, so map iteration follows
    // the source text.
    let obj: Map<String, Value> = serde_json::from_slice(chunk)?;
    let mut cols = Vec::new();
    let mut scope = Vec::new();
    collect(&obj, &mut scope, sep, &mut cols);
    Ok(cols)
}

fn collect<'a>(obj: &'a Map<String, Value>, scope: &mut Vec<&'a str>, sep: &str, cols: &mut Vec<String>) {
    for (key, val) in obj {
        scope.push(key);
        match val {
            Value::Object(child) => collect(child, scope, sep, cols),
            _ => cols.push(scope.join(sep)),
        }
        scope.pop();
    }
}
