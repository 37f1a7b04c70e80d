//! Converts single-field filter clauses into column predicates for codec
//! pushdown and zone-map skipping (spec §4.6).
//!
//! `$regex`, `$exists`, and top-level logical operators do not push down;
//! callers must still apply [`super::evaluate`] as a residual filter over
//! whatever this pass could not convert (spec §4.6, Design Notes Open
//! Questions: `$not` under logical operators is conservatively never pushed
//! down, matching the source).

use std::collections::HashMap;

use crate::value::Value;

use super::{FieldOp, Filter};

#[derive(Debug, Clone, PartialEq)]
pub enum PredicateOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    Between,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnPredicate {
    pub column: String,
    pub op: PredicateOp,
    pub value: PredicateValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PredicateValue {
    Scalar(Value),
    Set(Vec<Value>),
    Range(Value, Value),
}

/// Extract column predicates from the top level of a filter tree.
///
/// Only clauses directly under an (implicit or explicit) top-level `$and`
/// convert; anything under `$or`, `$nor`, `$not`, or using `$regex`/
/// `$exists` is left for residual evaluation. When both a `$gte`/`$gt` and a
/// `$lte`/`$lt` bound appear on the same field, they synthesize a single
/// `between` predicate (spec §4.6).
pub fn to_column_predicates(filter: &Filter) -> Vec<ColumnPredicate> {
    let top_level = match filter {
        Filter::And(clauses) => clauses.iter().collect(),
        other => vec![other],
    };

    let mut lower_bounds: HashMap<String, (Value, bool)> = HashMap::new(); // value, inclusive
    let mut upper_bounds: HashMap<String, (Value, bool)> = HashMap::new();
    let mut predicates = Vec::new();

    for clause in top_level {
        let Filter::Field(column, op) = clause else {
            continue; // nested logical clauses are not pushed down
        };
        match op {
            FieldOp::Eq(v) => predicates.push(ColumnPredicate {
                column: column.clone(),
                op: PredicateOp::Eq,
                value: PredicateValue::Scalar(v.clone()),
            }),
            FieldOp::Ne(v) => predicates.push(ColumnPredicate {
                column: column.clone(),
                op: PredicateOp::Ne,
                value: PredicateValue::Scalar(v.clone()),
            }),
            FieldOp::Gt(v) => {
                lower_bounds.insert(column.clone(), (v.clone(), false));
            }
            FieldOp::Gte(v) => {
                lower_bounds.insert(column.clone(), (v.clone(), true));
            }
            FieldOp::Lt(v) => {
                upper_bounds.insert(column.clone(), (v.clone(), false));
            }
            FieldOp::Lte(v) => {
                upper_bounds.insert(column.clone(), (v.clone(), true));
            }
            FieldOp::In(set) => predicates.push(ColumnPredicate {
                column: column.clone(),
                op: PredicateOp::In,
                value: PredicateValue::Set(set.clone()),
            }),
            // $nin, $exists, $regex: not pushed down.
            FieldOp::Nin(_) | FieldOp::Exists(_) | FieldOp::Regex(_) => {}
        }
    }

    let mut handled_as_range: Vec<String> = Vec::new();
    for (column, (low, low_inclusive)) in &lower_bounds {
        if let Some((high, high_inclusive)) = upper_bounds.get(column) {
            // Synthesize `between` only when both bounds are inclusive, the
            // common `$gte`+`$lte` (or `$gt`+`$lt`) shape (spec §4.6).
            if *low_inclusive == *high_inclusive {
                predicates.push(ColumnPredicate {
                    column: column.clone(),
                    op: PredicateOp::Between,
                    value: PredicateValue::Range(low.clone(), high.clone()),
                });
                handled_as_range.push(column.clone());
            }
        }
    }
    for (column, (value, inclusive)) in &lower_bounds {
        if handled_as_range.contains(column) {
            continue;
        }
        predicates.push(ColumnPredicate {
            column: column.clone(),
            op: if *inclusive { PredicateOp::Gte } else { PredicateOp::Gt },
            value: PredicateValue::Scalar(value.clone()),
        });
    }
    for (column, (value, inclusive)) in &upper_bounds {
        if handled_as_range.contains(column) {
            continue;
        }
        predicates.push(ColumnPredicate {
            column: column.clone(),
            op: if *inclusive { PredicateOp::Lte } else { PredicateOp::Lt },
            value: PredicateValue::Scalar(value.clone()),
        });
    }

    predicates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::parse;

    #[test]
    fn synthesizes_between_from_gte_and_lte() {
        let filter = parse(&serde_json::json!({
            "$and": [{"month": {"$gte": 1}}, {"month": {"$lte": 6}}]
        }))
        .unwrap();
        let preds = to_column_predicates(&filter);
        assert_eq!(preds.len(), 1);
        assert_eq!(preds[0].op, PredicateOp::Between);
    }

    #[test]
    fn does_not_push_down_or_regex_exists() {
        let filter = parse(&serde_json::json!({
            "$or": [{"a": 1}, {"b": 2}]
        }))
        .unwrap();
        assert!(to_column_predicates(&filter).is_empty());

        let filter = parse(&serde_json::json!({"a": {"$regex": "^x"}})).unwrap();
        assert!(to_column_predicates(&filter).is_empty());
    }

    #[test]
    fn converts_in_predicate() {
        let filter = parse(&serde_json::json!({"month": {"$in": [1, 2]}})).unwrap();
        let preds = to_column_predicates(&filter);
        assert_eq!(preds.len(), 1);
        assert_eq!(preds[0].op, PredicateOp::In);
    }
}
