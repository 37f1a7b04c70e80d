//! Document-style filter language: AST, JSON parsing, evaluation, and
//! pushdown conversion to column predicates (spec §4.6, Design Notes
//! "Filter AST").

pub mod eval;
pub mod pushdown;

use std::collections::HashSet;

use serde_json::Value as Json;

use crate::error::{DeltaResult, Error};
use crate::value::Value;

pub use eval::evaluate;
pub use pushdown::{to_column_predicates, ColumnPredicate, PredicateOp};

/// A recursive tagged filter tree: `Field(path, op) | And/Or/Nor([...]) |
/// Not(node)` (Design Notes).
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Field(String, FieldOp),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Nor(Vec<Filter>),
    Not(Box<Filter>),
}

/// A single-field comparison operator (spec §4.6).
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Regex(String),
}

const COMPARISON_OPS: &[&str] = &[
    "$eq", "$ne", "$gt", "$gte", "$lt", "$lte", "$in", "$nin", "$exists", "$regex",
];

/// Parse a document-style filter from its JSON form, e.g.
/// `{"year": 2024, "month": {"$in": [1, 2]}}` or
/// `{"$and": [{"a": 1}, {"b": {"$gt": 2}}]}`.
pub fn parse(json: &Json) -> DeltaResult<Filter> {
    let obj = json
        .as_object()
        .ok_or_else(|| Error::validation("filter must be a JSON object"))?;

    if obj.len() == 1 {
        if let Some((key, value)) = obj.iter().next() {
            match key.as_str() {
                "$and" => return Ok(Filter::And(parse_subquery_list(value)?)),
                "$or" => return Ok(Filter::Or(parse_subquery_list(value)?)),
                "$nor" => return Ok(Filter::Nor(parse_subquery_list(value)?)),
                "$not" => return Ok(Filter::Not(Box::new(parse(value)?))),
                _ => {}
            }
        }
    }

    let mut clauses = Vec::with_capacity(obj.len());
    for (field, value) in obj {
        if field.starts_with('$') {
            return Err(Error::validation(format!(
                "unexpected logical operator `{field}` alongside field constraints"
            )));
        }
        clauses.push(Filter::Field(field.clone(), parse_field_op(value)?));
    }
    Ok(match clauses.len() {
        1 => clauses.into_iter().next().unwrap(),
        _ => Filter::And(clauses),
    })
}

fn parse_subquery_list(json: &Json) -> DeltaResult<Vec<Filter>> {
    json.as_array()
        .ok_or_else(|| Error::validation("logical operator expects an array of subqueries"))?
        .iter()
        .map(parse)
        .collect()
}

fn parse_field_op(json: &Json) -> DeltaResult<FieldOp> {
    // A bare scalar value on a field denotes `$eq` (spec §4.6).
    let Some(obj) = json.as_object() else {
        return Ok(FieldOp::Eq(json_to_filter_value(json)));
    };
    let is_op_object = obj.keys().all(|k| COMPARISON_OPS.contains(&k.as_str())) && !obj.is_empty();
    if !is_op_object {
        // A plain JSON object value (no operator keys): treat as `$eq` of
        // the object's variant form.
        return Ok(FieldOp::Eq(Value::Variant(json.clone())));
    }
    if obj.len() != 1 {
        return Err(Error::validation(
            "combining multiple comparison operators on one field within a single clause is not supported; use $and",
        ));
    }
    let (op, value) = obj.iter().next().unwrap();
    Ok(match op.as_str() {
        "$eq" => FieldOp::Eq(json_to_filter_value(value)),
        "$ne" => FieldOp::Ne(json_to_filter_value(value)),
        "$gt" => FieldOp::Gt(json_to_filter_value(value)),
        "$gte" => FieldOp::Gte(json_to_filter_value(value)),
        "$lt" => FieldOp::Lt(json_to_filter_value(value)),
        "$lte" => FieldOp::Lte(json_to_filter_value(value)),
        "$in" => FieldOp::In(json_array_to_values(value)?),
        "$nin" => FieldOp::Nin(json_array_to_values(value)?),
        "$exists" => FieldOp::Exists(
            value
                .as_bool()
                .ok_or_else(|| Error::validation("$exists expects a boolean"))?,
        ),
        "$regex" => FieldOp::Regex(
            value
                .as_str()
                .ok_or_else(|| Error::validation("$regex expects a string pattern"))?
                .to_string(),
        ),
        other => return Err(Error::validation(format!("unknown filter operator `{other}`"))),
    })
}

fn json_array_to_values(json: &Json) -> DeltaResult<Vec<Value>> {
    json.as_array()
        .ok_or_else(|| Error::validation("$in/$nin expect an array"))?
        .iter()
        .map(json_to_filter_value)
        .map(Ok)
        .collect()
}

fn json_to_filter_value(json: &Json) -> Value {
    match json {
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

/// All field paths referenced anywhere in a filter tree, used to decide
/// which partition/zone-map predicates can be extracted.
pub fn referenced_fields(filter: &Filter) -> HashSet<String> {
    let mut out = HashSet::new();
    collect_fields(filter, &mut out);
    out
}

fn collect_fields(filter: &Filter, out: &mut HashSet<String>) {
    match filter {
        Filter::Field(path, _) => {
            out.insert(path.clone());
        }
        Filter::And(clauses) | Filter::Or(clauses) | Filter::Nor(clauses) => {
            for c in clauses {
                collect_fields(c, out);
            }
        }
        Filter::Not(inner) => collect_fields(inner, out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_scalar_is_eq() {
        let filter = parse(&serde_json::json!({"year": 2024})).unwrap();
        assert_eq!(
            filter,
            Filter::Field("year".to_string(), FieldOp::Eq(Value::I64(2024)))
        );
    }

    #[test]
    fn parses_and_or_nor_not() {
        let filter = parse(&serde_json::json!({
            "$and": [{"a": 1}, {"b": {"$gt": 2}}]
        }))
        .unwrap();
        match filter {
            Filter::And(clauses) => assert_eq!(clauses.len(), 2),
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn multi_field_object_is_implicit_and() {
        let filter = parse(&serde_json::json!({"year": 2024, "month": {"$in": [1, 2]}})).unwrap();
        match filter {
            Filter::And(clauses) => assert_eq!(clauses.len(), 2),
            other => panic!("expected implicit And, got {other:?}"),
        }
    }
}
