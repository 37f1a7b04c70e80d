//! Zone-map row-group skipping and partition pruning (spec §4.6, P8).

use std::collections::HashMap;

use crate::actions::Add;
use crate::codec::ZoneMap;
use crate::filter::{ColumnPredicate, PredicateOp, PredicateValue};
use crate::value::Value;

/// `can_skip(zm, pred)`: true iff no row in the row group can satisfy
/// `pred`, given only its `(min, max, nullCount)` per column (spec §4.6).
/// Non-comparable or type-mismatched predicates are never skippable — the
/// safe default (P8: soundness, never false positives).
pub fn can_skip(zone_map: &ZoneMap, predicate: &ColumnPredicate) -> bool {
    let Some(min) = zone_map.min.get(&predicate.column) else {
        return false;
    };
    let Some(max) = zone_map.max.get(&predicate.column) else {
        return false;
    };

    match (&predicate.op, &predicate.value) {
        (PredicateOp::Eq, PredicateValue::Scalar(v)) => {
            lt(v, min).unwrap_or(false) || gt(v, max).unwrap_or(false)
        }
        (PredicateOp::Ne, PredicateValue::Scalar(v)) => {
            min.filter_eq(max) && max.filter_eq(v)
        }
        (PredicateOp::Gt, PredicateValue::Scalar(v)) => lte(max, v).unwrap_or(false),
        (PredicateOp::Gte, PredicateValue::Scalar(v)) => lt(max, v).unwrap_or(false),
        (PredicateOp::Lt, PredicateValue::Scalar(v)) => gte(min, v).unwrap_or(false),
        (PredicateOp::Lte, PredicateValue::Scalar(v)) => gt(min, v).unwrap_or(false),
        (PredicateOp::In, PredicateValue::Set(values)) => values
            .iter()
            .all(|v| lt(v, min).unwrap_or(false) || gt(v, max).unwrap_or(false)),
        (PredicateOp::Between, PredicateValue::Range(a, b)) => {
            lt(b, min).unwrap_or(false) || gt(a, max).unwrap_or(false)
        }
        _ => false,
    }
}

fn lt(a: &Value, b: &Value) -> Option<bool> {
    a.partial_cmp(b).map(|o| o == std::cmp::Ordering::Less)
}
fn gt(a: &Value, b: &Value) -> Option<bool> {
    a.partial_cmp(b).map(|o| o == std::cmp::Ordering::Greater)
}
fn lte(a: &Value, b: &Value) -> Option<bool> {
    a.partial_cmp(b).map(|o| o != std::cmp::Ordering::Greater)
}
fn gte(a: &Value, b: &Value) -> Option<bool> {
    a.partial_cmp(b).map(|o| o != std::cmp::Ordering::Less)
}

/// Indices of the row groups worth reading: a group is dropped only when
/// some predicate proves no row inside it can match (spec §4.6, P8). Columns
/// the zone map says nothing about (partition columns, which never appear in
/// the file's own statistics) never cause a skip, by `can_skip`'s own
/// not-comparable default.
pub fn prune_row_groups(zone_maps: &[ZoneMap], predicates: &[ColumnPredicate]) -> Vec<usize> {
    zone_maps
        .iter()
        .enumerate()
        .filter(|(_, zm)| !predicates.iter().any(|p| can_skip(zm, p)))
        .map(|(i, _)| i)
        .collect()
}

/// Drop files whose declared partition values cannot satisfy `predicates`
/// restricted to `partition_columns`, before any data I/O (spec §4.6 "for
/// each file, evaluate equality/in predicates on partition columns...").
pub fn prune_by_partition<'a>(
    files: &'a [Add],
    partition_columns: &[String],
    predicates: &[ColumnPredicate],
) -> Vec<&'a Add> {
    let relevant: Vec<&ColumnPredicate> = predicates
        .iter()
        .filter(|p| partition_columns.contains(&p.column))
        .filter(|p| matches!(p.op, PredicateOp::Eq | PredicateOp::In))
        .collect();

    files
        .iter()
        .filter(|file| relevant.iter().all(|p| partition_satisfies(&file.partition_values, p)))
        .collect()
}

fn partition_satisfies(values: &HashMap<String, Option<String>>, predicate: &ColumnPredicate) -> bool {
    let stored = values.get(&predicate.column).cloned().flatten();
    let stored_value = match &stored {
        Some(s) => Value::Str(s.clone()),
        None => Value::Null,
    };
    match (&predicate.op, &predicate.value) {
        (PredicateOp::Eq, PredicateValue::Scalar(v)) => {
            stored_value.filter_eq(&Value::Str(v.as_partition_string().unwrap_or_default()))
                || (stored.is_none() && v.is_null())
        }
        (PredicateOp::In, PredicateValue::Set(values)) => values.iter().any(|v| {
            stored_value.filter_eq(&Value::Str(v.as_partition_string().unwrap_or_default()))
                || (stored.is_none() && v.is_null())
        }),
        _ => true, // not a partition-prunable predicate; don't exclude
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zm(min: i64, max: i64) -> ZoneMap {
        let mut m = ZoneMap {
            row_count: 10,
            ..Default::default()
        };
        m.min.insert("n".to_string(), Value::I64(min));
        m.max.insert("n".to_string(), Value::I64(max));
        m
    }

    #[test]
    fn eq_outside_range_can_skip() {
        let pred = ColumnPredicate {
            column: "n".to_string(),
            op: PredicateOp::Eq,
            value: PredicateValue::Scalar(Value::I64(100)),
        };
        assert!(can_skip(&zm(0, 10), &pred));
        assert!(!can_skip(&zm(0, 200), &pred));
    }

    #[test]
    fn gt_value_above_max_can_skip() {
        let pred = ColumnPredicate {
            column: "n".to_string(),
            op: PredicateOp::Gt,
            value: PredicateValue::Scalar(Value::I64(50)),
        };
        assert!(can_skip(&zm(0, 10), &pred));
    }

    #[test]
    fn unknown_column_never_skips() {
        let pred = ColumnPredicate {
            column: "missing".to_string(),
            op: PredicateOp::Eq,
            value: PredicateValue::Scalar(Value::I64(1)),
        };
        assert!(!can_skip(&zm(0, 10), &pred));
    }

    #[test]
    fn prune_row_groups_keeps_only_possibly_matching_groups() {
        let pred = ColumnPredicate {
            column: "n".to_string(),
            op: PredicateOp::Eq,
            value: PredicateValue::Scalar(Value::I64(100)),
        };
        let groups = vec![zm(0, 10), zm(50, 200), zm(300, 400)];
        assert_eq!(prune_row_groups(&groups, &[pred]), vec![1]);
    }

    #[test]
    fn prune_row_groups_keeps_everything_with_no_predicates() {
        let groups = vec![zm(0, 10), zm(50, 200)];
        assert_eq!(prune_row_groups(&groups, &[]), vec![0, 1]);
    }

    #[test]
    fn between_outside_range_can_skip() {
        let pred = ColumnPredicate {
            column: "n".to_string(),
            op: PredicateOp::Between,
            value: PredicateValue::Range(Value::I64(100), Value::I64(200)),
        };
        assert!(can_skip(&zm(0, 10), &pred));
        assert!(!can_skip(&zm(0, 150), &pred));
    }
}
