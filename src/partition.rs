//! Partition key grouping, Hive-style path encoding, and the I4
//! partition/path consistency check (spec §4.4, §4.6, §6).

use std::collections::HashMap;

use crate::error::{DeltaResult, Error};
use crate::value::{Row, Value};

/// The literal placeholder Delta uses for a null partition value in a path
/// segment (spec §6).
pub const NULL_PARTITION_VALUE: &str = "__HIVE_DEFAULT_PARTITION__";

/// URL-escape any byte outside `[A-Za-z0-9_\-.]` as `%HH` (spec §4.4).
pub fn encode_partition_value(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-' | b'.' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Reverse [`encode_partition_value`].
pub fn decode_partition_value(encoded: &str) -> DeltaResult<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded
                .get(i + 1..i + 3)
                .ok_or_else(|| Error::malformed("truncated percent-escape in partition path"))?;
            let byte = u8::from_str_radix(hex, 16)
                .map_err(|_| Error::malformed(format!("invalid percent-escape `%{hex}`")))?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|e| Error::malformed(format!("non-utf8 partition value: {e}")))
}

/// Render a row's partition value for the path segment `col=val`, using the
/// null sentinel when the value is absent or `Value::Null`.
pub fn partition_value_for_path(row: &Row, column: &str) -> String {
    match row.get(column) {
        Some(v) => match v.as_partition_string() {
            Some(s) => encode_partition_value(&s),
            None => NULL_PARTITION_VALUE.to_string(),
        },
        None => NULL_PARTITION_VALUE.to_string(),
    }
}

/// Build the Hive-style partition path prefix `col=val/col2=val2/...` for a
/// row under `partition_columns` (in order).
pub fn partition_path(row: &Row, partition_columns: &[String]) -> String {
    partition_columns
        .iter()
        .map(|col| format!("{col}={}", partition_value_for_path(row, col)))
        .collect::<Vec<_>>()
        .join("/")
}

/// Group rows by their partition key, preserving first-seen key order and
/// in-partition row order.
pub fn group_by_partition<'a>(
    rows: &'a [Row],
    partition_columns: &[String],
) -> Vec<(String, Vec<&'a Row>)> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<&'a Row>> = HashMap::new();
    for row in rows {
        let key = partition_path(row, partition_columns);
        groups.entry(key.clone()).or_insert_with(|| {
            order.push(key.clone());
            Vec::new()
        });
        groups.get_mut(&key).unwrap().push(row);
    }
    order
        .into_iter()
        .map(|key| {
            let rows = groups.remove(&key).unwrap();
            (key, rows)
        })
        .collect()
}

/// The `col=val` segments parsed back out of a stored partition path, in
/// path order.
pub fn parse_partition_path(path: &str) -> DeltaResult<Vec<(String, String)>> {
    let mut out = Vec::new();
    for segment in path.split('/') {
        let Some((col, val)) = segment.split_once('=') else {
            continue;
        };
        out.push((col.to_string(), decode_partition_value(val)?));
    }
    Ok(out)
}

/// Invariant I4: partition values recorded on an `add` action must agree
/// with the Hive-style segments embedded in its path, when both are
/// present.
pub fn check_partition_path_consistency(
    path: &str,
    partition_values: &HashMap<String, Option<String>>,
) -> DeltaResult<()> {
    let embedded = parse_partition_path(path)?;
    for (col, embedded_val) in &embedded {
        if let Some(declared) = partition_values.get(col) {
            let declared_str = declared.clone().unwrap_or_else(|| NULL_PARTITION_VALUE.to_string());
            if &declared_str != embedded_val && !(declared.is_none() && embedded_val == NULL_PARTITION_VALUE) {
                return Err(Error::malformed(format!(
                    "partition value mismatch for column `{col}` in path `{path}`: declared `{declared_str}`, embedded `{embedded_val}`"
                )));
            }
        }
    }
    Ok(())
}

/// A row's partition values as a `col -> Option<String>` map (`None`
/// denotes null), for embedding in an `add` action.
pub fn extract_partition_values(
    row: &Row,
    partition_columns: &[String],
) -> HashMap<String, Option<String>> {
    partition_columns
        .iter()
        .map(|col| {
            let value = match row.get(col) {
                Some(v) => v.as_partition_string(),
                None => None,
            };
            (col.clone(), value)
        })
        .collect()
}

/// Strip partition columns out of a row before encoding it into a data
/// file — Delta stores partition values only in the `add` action, not in
/// the file body.
pub fn strip_partition_columns(row: &Row, partition_columns: &[String]) -> Row {
    row.iter()
        .filter(|(k, _)| !partition_columns.contains(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Merge a file's declared partition values back into a materialized row
/// during query (spec §4.5 step 4).
pub fn merge_partition_values(row: &mut Row, partition_values: &HashMap<String, Option<String>>) {
    for (col, val) in partition_values {
        let value = match val {
            Some(s) => Value::Str(s.clone()),
            None => Value::Null,
        };
        row.entry(col.clone()).or_insert(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_special_characters() {
        assert_eq!(encode_partition_value("a b/c"), "a%20b%2Fc");
        assert_eq!(encode_partition_value("2024"), "2024");
    }

    #[test]
    fn round_trips_encoding() {
        let raw = "hello world/value=1";
        let encoded = encode_partition_value(raw);
        assert_eq!(decode_partition_value(&encoded).unwrap(), raw);
    }

    #[test]
    fn groups_rows_by_partition_key_preserving_order() {
        let mut r1 = Row::new();
        r1.insert("year".to_string(), Value::Str("2024".to_string()));
        let mut r2 = Row::new();
        r2.insert("year".to_string(), Value::Str("2023".to_string()));
        let mut r3 = Row::new();
        r3.insert("year".to_string(), Value::Str("2024".to_string()));

        let rows = vec![r1, r2, r3];
        let groups = group_by_partition(&rows, &["year".to_string()]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "year=2024");
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, "year=2023");
    }

    #[test]
    fn i4_detects_mismatched_partition_value() {
        let mut declared = HashMap::new();
        declared.insert("year".to_string(), Some("2024".to_string()));
        let err = check_partition_path_consistency("year=2023/file.parquet", &declared);
        assert!(err.is_err());
    }

    #[test]
    fn i4_accepts_consistent_partition_value() {
        let mut declared = HashMap::new();
        declared.insert("year".to_string(), Some("2024".to_string()));
        assert!(check_partition_path_consistency("year=2024/file.parquet", &declared).is_ok());
    }

    #[test]
    fn null_partition_value_uses_sentinel() {
        let row = Row::new();
        assert_eq!(partition_value_for_path(&row, "year"), NULL_PARTITION_VALUE);
    }
}
