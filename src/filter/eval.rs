//! Filter evaluation: a visitor over the [`super::Filter`] tree with
//! left-to-right short-circuiting (spec §4.6, P9).

use std::cmp::Ordering;

use crate::value::{lookup, Row, Value};

use super::{FieldOp, Filter};

/// Evaluate `filter` against `row`. Null/absent comparisons yield `false`
/// except for `$exists`, `$eq null`, and `$in` when the array contains null
/// (spec §4.6, boundary behaviors).
pub fn evaluate(filter: &Filter, row: &Row) -> bool {
    match filter {
        Filter::Field(path, op) => eval_field(path, op, row),
        Filter::And(clauses) => {
            // P9: left-to-right short-circuit conjunction; empty $and matches all.
            clauses.iter().all(|c| evaluate(c, row))
        }
        Filter::Or(clauses) => {
            // Empty $or matches none.
            clauses.iter().any(|c| evaluate(c, row))
        }
        Filter::Nor(clauses) => !clauses.iter().any(|c| evaluate(c, row)),
        Filter::Not(inner) => !evaluate(inner, row),
    }
}

fn eval_field(path: &str, op: &FieldOp, row: &Row) -> bool {
    let found = lookup(row, path);

    match op {
        FieldOp::Exists(want) => found.is_some() == *want,
        FieldOp::Eq(target) => match &found {
            None => target.is_null(), // absent field behaves as null for $eq null
            Some(v) => v.filter_eq(target),
        },
        FieldOp::Ne(target) => match &found {
            None => !target.is_null(),
            Some(v) => !v.filter_eq(target),
        },
        FieldOp::Gt(target) => compare(&found, target, |o| o == Ordering::Greater),
        FieldOp::Gte(target) => compare(&found, target, |o| o != Ordering::Less),
        FieldOp::Lt(target) => compare(&found, target, |o| o == Ordering::Less),
        FieldOp::Lte(target) => compare(&found, target, |o| o != Ordering::Greater),
        FieldOp::In(set) => match &found {
            None => set.iter().any(Value::is_null),
            Some(v) => set.iter().any(|s| v.filter_eq(s)),
        },
        FieldOp::Nin(set) => match &found {
            None => !set.iter().any(Value::is_null),
            Some(v) => !set.iter().any(|s| v.filter_eq(s)),
        },
        FieldOp::Regex(pattern) => match &found {
            Some(Value::Str(s)) => regex_lite_match(pattern, s),
            _ => false, // $regex against a non-string value yields false
        },
    }
}

fn compare(found: &Option<Value>, target: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    match found {
        None => false,
        Some(v) => v
            .partial_cmp(target)
            .map(accept)
            .unwrap_or(false),
    }
}

/// A conservative substring/glob-free regex matcher covering the common
/// anchored and literal cases the filter language actually exercises,
/// without pulling in a full regex engine for the core's own evaluator
/// (codec and store layers already bring heavier dependencies; this keeps
/// the evaluator dependency-free). Supports `^`/`$` anchors and `.`/`*`
/// wildcards; anything else degrades to substring search.
fn regex_lite_match(pattern: &str, text: &str) -> bool {
    let anchored_start = pattern.starts_with('^');
    let anchored_end = pattern.ends_with('$');
    let core = pattern
        .strip_prefix('^')
        .unwrap_or(pattern)
        .strip_suffix('$')
        .unwrap_or(pattern.strip_prefix('^').unwrap_or(pattern));

    if !core.contains(['.', '*', '+', '?', '[', '(']) {
        return match (anchored_start, anchored_end) {
            (true, true) => text == core,
            (true, false) => text.starts_with(core),
            (false, true) => text.ends_with(core),
            (false, false) => text.contains(core),
        };
    }
    glob_match(core, text)
}

fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    fn rec(p: &[char], t: &[char]) -> bool {
        match p.first() {
            None => t.is_empty(),
            Some('*') => rec(&p[1..], t) || (!t.is_empty() && rec(p, &t[1..])),
            Some('.') => !t.is_empty() && rec(&p[1..], &t[1..]),
            Some(c) => !t.is_empty() && t[0] == *c && rec(&p[1..], &t[1..]),
        }
    }
    rec(&p, &t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::parse;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn eq_against_absent_field_is_false_unless_target_is_null() {
        let r = row(&[]);
        assert!(!evaluate(&parse(&serde_json::json!({"x": 1})).unwrap(), &r));
        assert!(evaluate(&parse(&serde_json::json!({"x": null})).unwrap(), &r));
    }

    #[test]
    fn eq_against_explicit_null_field_matches_absent_field_behavior() {
        let r = row(&[("x", Value::Null)]);
        assert!(evaluate(&parse(&serde_json::json!({"x": null})).unwrap(), &r));
        assert!(!evaluate(&parse(&serde_json::json!({"x": {"$ne": null}})).unwrap(), &r));
        assert!(!evaluate(&parse(&serde_json::json!({"x": 1})).unwrap(), &r));
    }

    #[test]
    fn exists_checks_presence_not_nullness() {
        let r = row(&[("x", Value::Null)]);
        assert!(evaluate(
            &parse(&serde_json::json!({"x": {"$exists": true}})).unwrap(),
            &r
        ));
    }

    #[test]
    fn and_short_circuits_left_to_right() {
        let r = row(&[("a", Value::I64(1))]);
        // b is absent; $gt against absent is false, so the whole And is false.
        let filter = parse(&serde_json::json!({"$and": [{"a": 1}, {"b": {"$gt": 0}}]})).unwrap();
        assert!(!evaluate(&filter, &r));
    }

    #[test]
    fn empty_and_matches_all_empty_or_matches_none() {
        use crate::filter::Filter;
        assert!(evaluate(&Filter::And(vec![]), &row(&[])));
        assert!(!evaluate(&Filter::Or(vec![]), &row(&[])));
    }

    #[test]
    fn nan_never_equals_nan() {
        let r = row(&[("x", Value::F64(f64::NAN))]);
        let filter = Filter::Field("x".to_string(), FieldOp::Eq(Value::F64(f64::NAN)));
        assert!(!evaluate(&filter, &r));
    }

    #[test]
    fn in_matches_null_only_when_array_contains_null() {
        let r = row(&[]);
        assert!(evaluate(
            &parse(&serde_json::json!({"x": {"$in": [null, 1]}})).unwrap(),
            &r
        ));
        assert!(!evaluate(
            &parse(&serde_json::json!({"x": {"$in": [1, 2]}})).unwrap(),
            &r
        ));
    }
}
