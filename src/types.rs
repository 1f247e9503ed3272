use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{IngestError, Result};

/// Name of the single table produced in flatten mode.
pub const MONOTABLE_NAME: &str = "data";

/// Inferred storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Null,
    Bool,
    Int,
    Float,
    Date,
    Datetime,
    Text,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Null => "null",
            Kind::Bool => "bool",
            Kind::Int => "int",
            Kind::Float => "float",
            Kind::Date => "date",
            Kind::Datetime => "datetime",
            Kind::Text => "text",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single cell value, as handed to the SQL backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Datetime(NaiveDateTime),
}

impl Datum {
    /// Convert a scalar JSON value. Objects and arrays return `None`.
    ///
    /// A float with a zero fractional part becomes `Int`: JSON producers
    /// routinely write integer ids as `1.0`, and those should not type the
    /// column as float.
    pub fn from_json(value: &Value) -> Option<Datum> {
        match value {
            Value::Null => Some(Datum::Null),
            Value::Bool(b) => Some(Datum::Bool(*b)),
            Value::String(s) => Some(Datum::Text(s.clone())),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    return Some(Datum::Int(i));
                }
                let f = n.as_f64()?;
                Some(float_to_int(f).map_or(Datum::Float(f), Datum::Int))
            }
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    /// Short name of the value's type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Datum::Null => "null",
            Datum::Bool(_) => "bool",
            Datum::Int(_) => "int",
            Datum::Float(_) => "float",
            Datum::Text(_) => "text",
            Datum::Date(_) => "date",
            Datum::Datetime(_) => "datetime",
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Null => f.write_str("NULL"),
            Datum::Bool(b) => write!(f, "{}", b),
            Datum::Int(i) => write!(f, "{}", i),
            Datum::Float(x) => write!(f, "{}", x),
            Datum::Text(s) => f.write_str(s),
            Datum::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Datum::Datetime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.f")),
        }
    }
}

/// Returns the integer value of `f` if it has no fractional part and
/// fits in an i64.
pub(crate) fn float_to_int(f: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, hence the exclusive bound.
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

/// Configuration for an ingest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Maximum number of records inspected before the schema is committed.
    pub sample_size: usize,

    /// Fold nested objects into the parent table. Only flatten mode is
    /// implemented.
    pub flatten: bool,

    /// Separator used to join nested field names into column names.
    pub separator: String,

    /// Number of rows accumulated before an insert is executed once the
    /// schema exists.
    pub batch_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            sample_size: 1024,
            flatten: true,
            separator: String::from("_"),
            batch_size: 1,
        }
    }
}

impl IngestConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_size == 0 {
            return Err(IngestError::InvalidConfig {
                key: "sample_size".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.batch_size == 0 {
            return Err(IngestError::InvalidConfig {
                key: "batch_size".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.separator.is_empty() {
            return Err(IngestError::InvalidConfig {
                key: "separator".into(),
                message: "must not be empty".into(),
            });
        }
        if !self.flatten {
            return Err(IngestError::Unsupported(
                "only flatten mode is implemented for JSON ingestion".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_datum_from_json() {
        assert_eq!(Datum::from_json(&json!(null)), Some(Datum::Null));
        assert_eq!(Datum::from_json(&json!(true)), Some(Datum::Bool(true)));
        assert_eq!(Datum::from_json(&json!(7)), Some(Datum::Int(7)));
        assert_eq!(Datum::from_json(&json!("x")), Some(Datum::Text("x".into())));
        assert_eq!(Datum::from_json(&json!([1])), None);
        assert_eq!(Datum::from_json(&json!({"a": 1})), None);
    }

    #[test]
    fn test_whole_float_becomes_int() {
        assert_eq!(Datum::from_json(&json!(1.0)), Some(Datum::Int(1)));
        assert_eq!(Datum::from_json(&json!(-3.0)), Some(Datum::Int(-3)));
        assert_eq!(Datum::from_json(&json!(2.5)), Some(Datum::Float(2.5)));
        assert_eq!(Datum::from_json(&json!(1e300)), Some(Datum::Float(1e300)));
    }

    #[test]
    fn test_large_unsigned_stays_float() {
        let v: Value = serde_json::from_str("18446744073709551615").unwrap();
        assert!(matches!(Datum::from_json(&v), Some(Datum::Float(_))));
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = IngestConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.separator, "_");
        assert!(config.flatten);
    }

    #[test]
    fn test_config_rejects_nonsense() {
        let mut config = IngestConfig::default();
        config.sample_size = 0;
        assert!(matches!(config.validate(), Err(IngestError::InvalidConfig { .. })));

        let mut config = IngestConfig::default();
        config.flatten = false;
        assert!(matches!(config.validate(), Err(IngestError::Unsupported(_))));
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: IngestConfig = serde_json::from_value(json!({"sample_size": 10})).unwrap();
        assert_eq!(config.sample_size, 10);
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.separator, "_");
    }
}
