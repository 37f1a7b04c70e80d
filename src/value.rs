//! The dynamic row value union (Design Notes, "Dynamic row shape"). Records
//! are unordered maps of named typed values (spec §1); a [`Row`] is exactly
//! that map.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value as Json;

/// A single cell in a row. `Variant` carries an opaque JSON payload for maps
/// and arrays embedded in a record (spec §4.4 step 3: "maps/arrays become a
/// `variant` (opaque JSON) type").
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
    Instant(DateTime<Utc>),
    Variant(Json),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Total order used for min/max statistics and comparison operators
    /// (spec §4.6: "String order is lexicographic...Dates compare by
    /// absolute timestamp. NaN never equals NaN."). Returns `None` for
    /// values of different kinds or containing NaN, matching the
    /// "non-comparable" escape hatch used throughout the pruning layer.
    pub fn partial_cmp(&self, other: &Value) -> Option<std::cmp::Ordering> {
        use Value::*;
        match (self, other) {
            (Null, Null) => None,
            (Bool(a), Bool(b)) => a.partial_cmp(b),
            (I32(a), I32(b)) => a.partial_cmp(b),
            (I64(a), I64(b)) => a.partial_cmp(b),
            (I32(a), I64(b)) => (*a as i64).partial_cmp(b),
            (I64(a), I32(b)) => a.partial_cmp(&(*b as i64)),
            (F32(a), F32(b)) => (*a as f64).partial_cmp(&(*b as f64)),
            (F64(a), F64(b)) => a.partial_cmp(b),
            (F32(a), F64(b)) => (*a as f64).partial_cmp(b),
            (F64(a), F32(b)) => a.partial_cmp(&(*b as f64)),
            (I32(a), F64(b)) => (*a as f64).partial_cmp(b),
            (F64(a), I32(b)) => a.partial_cmp(&(*b as f64)),
            (I64(a), F64(b)) => (*a as f64).partial_cmp(b),
            (F64(a), I64(b)) => a.partial_cmp(&(*b as f64)),
            (Str(a), Str(b)) => a.partial_cmp(b),
            (Bytes(a), Bytes(b)) => a.partial_cmp(b),
            (Instant(a), Instant(b)) => a.partial_cmp(b),
            _ => None,
        }
    }

    /// Equality under filter-evaluation semantics (spec §4.6): NaN never
    /// equals NaN even though `self == other` would hold structurally, and
    /// an explicit null field is equal to null (spec §4.6, §8: "`$eq null`"
    /// behaves the same whether the field is absent or present-and-null).
    /// `partial_cmp` deliberately leaves `(Null, Null)` as `None` since it
    /// also backs ordering comparisons, where null has no order — equality
    /// is special-cased here instead.
    pub fn filter_eq(&self, other: &Value) -> bool {
        if self.is_null() && other.is_null() {
            return true;
        }
        if let (Value::F32(a), Value::F32(b)) = (self, other) {
            if a.is_nan() || b.is_nan() {
                return false;
            }
        }
        if let (Value::F64(a), Value::F64(b)) = (self, other) {
            if a.is_nan() || b.is_nan() {
                return false;
            }
        }
        self.partial_cmp(other) == Some(std::cmp::Ordering::Equal)
    }

    /// Render as the partition-value string used in `add.partitionValues`
    /// and Hive-style path segments (spec §4.4 step 5). `None` denotes the
    /// Delta null-partition sentinel.
    pub fn as_partition_string(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::I32(i) => Some(i.to_string()),
            Value::I64(i) => Some(i.to_string()),
            Value::F32(f) => Some(f.to_string()),
            Value::F64(f) => Some(f.to_string()),
            Value::Str(s) => Some(s.clone()),
            Value::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
            Value::Instant(t) => Some(t.to_rfc3339()),
            Value::Variant(v) => Some(v.to_string()),
        }
    }
}

/// A single record: an unordered map of named typed values.
pub type Row = HashMap<String, Value>;

/// Look up a (possibly nested, dot-separated) field path within a row (spec
/// §4.6: "Nested fields addressed by `a.b.c` dot notation"), descending into
/// [`Value::Variant`], returning an owned [`Json`] representation so the
/// filter evaluator can compare through nesting without lifetime games.
pub fn get_path_json(row: &Row, path: &str) -> Option<Json> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let top = row.get(first)?;
    let mut current: Json = match top {
        Value::Variant(j) => j.clone(),
        other => value_to_json(other),
    };
    for part in parts {
        current = current.as_object()?.get(part)?.clone();
    }
    Some(current)
}

/// Look up a field path (dot-notation nested, or a bare top-level key) as a
/// [`Value`], the way the filter evaluator needs it (spec §4.6). Top-level
/// lookups return the stored `Value` directly (preserving its numeric kind
/// for comparisons); nested lookups through a `Variant` convert the found
/// JSON leaf back to a `Value`. Absent paths yield `None`, which the
/// evaluator treats as "absent" per spec semantics, distinct from a present
/// `Value::Null`.
pub fn lookup(row: &Row, path: &str) -> Option<Value> {
    if !path.contains('.') {
        return row.get(path).cloned();
    }
    get_path_json(row, path).map(|j| json_to_value(&j))
}

fn json_to_value(j: &Json) -> Value {
    match j {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::I64(i)
            } else {
                Value::F64(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Json::String(s) => Value::Str(s.clone()),
        other => Value::Variant(other.clone()),
    }
}

pub fn value_to_json(v: &Value) -> Json {
    match v {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::I32(i) => Json::from(*i),
        Value::I64(i) => Json::from(*i),
        Value::F32(f) => serde_json::Number::from_f64(*f as f64)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::F64(f) => serde_json::Number::from_f64(*f)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::Str(s) => Json::String(s.clone()),
        Value::Bytes(b) => Json::String(String::from_utf8_lossy(b).into_owned()),
        Value::Instant(t) => Json::String(t.to_rfc3339()),
        Value::Variant(j) => j.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_is_never_equal() {
        assert!(!Value::F64(f64::NAN).filter_eq(&Value::F64(f64::NAN)));
    }

    #[test]
    fn cross_numeric_comparison_widens() {
        assert_eq!(
            Value::I32(3).partial_cmp(&Value::F64(3.0)),
            Some(std::cmp::Ordering::Equal)
        );
    }

    #[test]
    fn null_partition_value_is_none() {
        assert_eq!(Value::Null.as_partition_string(), None);
    }

    #[test]
    fn dotted_path_descends_into_variant() {
        let mut row: Row = Row::new();
        row.insert(
            "meta".to_string(),
            Value::Variant(serde_json::json!({"a": {"b": 7}})),
        );
        let found = get_path_json(&row, "meta.a.b").unwrap();
        assert_eq!(found, serde_json::json!(7));
    }
}
