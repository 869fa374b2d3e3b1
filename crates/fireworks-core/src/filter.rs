// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Document filters over JSON.
//!
//! Worker queries, duplicate-finder queries and the id queries of the LaunchPad are
//! expressed as JSON filter documents in the familiar document-store dialect:
//!
//! | Form | Meaning |
//! |------|---------|
//! | `{"a.b": v}` | some value at path `a.b` equals `v` (arrays match by element) |
//! | `{"a": {"$gt": v}}` | comparison: `$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte` |
//! | `{"a": {"$in": [..]}}` | membership: `$in`, `$nin` |
//! | `{"a": {"$exists": b}}` | presence of the path |
//! | `{"a": {"$size": n}}` | array length |
//! | `{"a": {"$elemMatch": f}}` | some array element matches `f` |
//! | `{"a": {"$not": c}}` | negated condition |
//! | `{"$and": [..]}` | logical combinators: `$and`, `$or`, `$nor` |
//!
//! Dotted paths fan out over arrays, and numeric segments index into them.
//! A `null` condition also matches a missing path.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::error::{CoreError, Result};

/// True when `doc` satisfies `filter`.
pub fn matches(doc: &Value, filter: &Value) -> Result<bool> {
    let clauses = filter
        .as_object()
        .ok_or_else(|| CoreError::validation("filter", format!("expected an object, got {}", filter)))?;

    for (key, cond) in clauses {
        let ok = match key.as_str() {
            "$and" => {
                let mut all = true;
                for sub in logical_operands(key, cond)? {
                    if !matches(doc, sub)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => any_match(doc, logical_operands(key, cond)?)?,
            "$nor" => !any_match(doc, logical_operands(key, cond)?)?,
            op if op.starts_with('$') => {
                return Err(CoreError::validation(
                    "filter",
                    format!("unsupported top-level operator {}", op),
                ));
            }
            path => {
                let values = lookup(doc, path);
                condition_matches(&values, cond)?
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn logical_operands<'a>(op: &str, cond: &'a Value) -> Result<&'a Vec<Value>> {
    cond.as_array()
        .ok_or_else(|| CoreError::validation("filter", format!("{} expects an array", op)))
}

fn any_match(doc: &Value, filters: &[Value]) -> Result<bool> {
    for sub in filters {
        if matches(doc, sub)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Every value reachable at the dotted `path`.
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    collect(doc, &segments, &mut out);
    out
}

fn collect<'a>(value: &'a Value, segments: &[&str], out: &mut Vec<&'a Value>) {
    let Some((head, rest)) = segments.split_first() else {
        out.push(value);
        return;
    };
    match value {
        Value::Object(map) => {
            if let Some(next) = map.get(*head) {
                collect(next, rest, out);
            }
        }
        Value::Array(items) => {
            if let Ok(idx) = head.parse::<usize>() {
                if let Some(next) = items.get(idx) {
                    collect(next, rest, out);
                }
            } else {
                for item in items {
                    if item.is_object() {
                        collect(item, segments, out);
                    }
                }
            }
        }
        _ => {}
    }
}

/// The single value at `path` without array fan-out; used for sort keys.
pub fn get_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |value, segment| match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn is_operator_object(cond: &Value) -> Option<&Map<String, Value>> {
    match cond {
        Value::Object(map) if !map.is_empty() && map.keys().all(|k| k.starts_with('$')) => {
            Some(map)
        }
        _ => None,
    }
}

fn condition_matches(values: &[&Value], cond: &Value) -> Result<bool> {
    let Some(ops) = is_operator_object(cond) else {
        return Ok(equals_any(values, cond));
    };

    for (op, arg) in ops {
        let ok = match op.as_str() {
            "$eq" => equals_any(values, arg),
            "$ne" => !equals_any(values, arg),
            "$gt" => compare_any(values, arg, |o| o == Ordering::Greater),
            "$gte" => compare_any(values, arg, |o| o != Ordering::Less),
            "$lt" => compare_any(values, arg, |o| o == Ordering::Less),
            "$lte" => compare_any(values, arg, |o| o != Ordering::Greater),
            "$in" => in_list(values, op, arg)?,
            "$nin" => !in_list(values, op, arg)?,
            "$exists" => {
                let want = arg.as_bool().unwrap_or(!arg.is_null());
                values.is_empty() != want
            }
            "$not" => !condition_matches(values, arg)?,
            "$size" => {
                let n = arg
                    .as_u64()
                    .ok_or_else(|| CoreError::validation("filter", "$size expects a non-negative integer"))?;
                values
                    .iter()
                    .any(|v| v.as_array().is_some_and(|a| a.len() as u64 == n))
            }
            "$elemMatch" => elem_match(values, arg)?,
            other => {
                return Err(CoreError::validation(
                    "filter",
                    format!("unsupported operator {}", other),
                ));
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn equals_any(values: &[&Value], target: &Value) -> bool {
    if target.is_null() && values.is_empty() {
        return true;
    }
    values.iter().any(|v| {
        values_equal(v, target)
            || v.as_array()
                .is_some_and(|items| items.iter().any(|item| values_equal(item, target)))
    })
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

fn compare_any(values: &[&Value], target: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    let check = |v: &Value| compare_values(v, target).is_some_and(&accept);
    values.iter().any(|v| match v {
        Value::Array(items) => items.iter().any(check),
        other => check(other),
    })
}

fn in_list(values: &[&Value], op: &str, arg: &Value) -> Result<bool> {
    let list = arg
        .as_array()
        .ok_or_else(|| CoreError::validation("filter", format!("{} expects an array", op)))?;
    Ok(list.iter().any(|candidate| equals_any(values, candidate)))
}

fn elem_match(values: &[&Value], arg: &Value) -> Result<bool> {
    for value in values {
        let Some(items) = value.as_array() else {
            continue;
        };
        for item in items {
            let ok = if is_operator_object(arg).is_some() {
                condition_matches(&[item], arg)?
            } else {
                matches(item, arg)?
            };
            if ok {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Compare two scalars of the same kind; `None` across kinds.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Total order for sorting documents: missing and null first, then numbers,
/// strings, objects, arrays and booleans.
pub fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn kind(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Number(_)) => 1,
            Some(Value::String(_)) => 2,
            Some(Value::Object(_)) => 3,
            Some(Value::Array(_)) => 4,
            Some(Value::Bool(_)) => 5,
        }
    }
    match (a, b) {
        (Some(x), Some(y)) => compare_values(x, y).unwrap_or_else(|| kind(a).cmp(&kind(b))),
        _ => kind(a).cmp(&kind(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fw() -> Value {
        json!({
            "fw_id": 4,
            "state": "READY",
            "name": "relax",
            "spec": {"_priority": 3, "_category": "gpu", "tags": ["a", "b"], "n": {"k": 2.5}},
            "launches": [11, 12],
            "history": [{"state": "RUNNING"}, {"state": "COMPLETED"}]
        })
    }

    #[test]
    fn test_equality_and_paths() {
        let doc = fw();
        assert!(matches(&doc, &json!({"state": "READY"})).unwrap());
        assert!(matches(&doc, &json!({"spec.n.k": 2.5})).unwrap());
        assert!(matches(&doc, &json!({"spec.tags": "b"})).unwrap());
        assert!(matches(&doc, &json!({"launches": 12})).unwrap());
        assert!(matches(&doc, &json!({"history.state": "COMPLETED"})).unwrap());
        assert!(!matches(&doc, &json!({"name": "other"})).unwrap());
        assert!(matches(&doc, &json!({})).unwrap());
    }

    #[test]
    fn test_null_matches_missing() {
        let doc = fw();
        assert!(matches(&doc, &json!({"spec._fworker": null})).unwrap());
        assert!(!matches(&doc, &json!({"spec._category": null})).unwrap());
    }

    #[test]
    fn test_comparisons_and_membership() {
        let doc = fw();
        assert!(matches(&doc, &json!({"spec._priority": {"$gte": 3, "$lt": 4}})).unwrap());
        assert!(!matches(&doc, &json!({"spec._priority": {"$gt": 3}})).unwrap());
        assert!(matches(&doc, &json!({"state": {"$in": ["READY", "WAITING"]}})).unwrap());
        assert!(matches(&doc, &json!({"state": {"$nin": ["COMPLETED"]}})).unwrap());
        assert!(matches(&doc, &json!({"fw_id": {"$ne": 5}})).unwrap());
        assert!(!matches(&doc, &json!({"name": {"$gt": 1}})).unwrap());
    }

    #[test]
    fn test_logical_and_array_operators() {
        let doc = fw();
        assert!(matches(&doc, &json!({"$or": [{"state": "X"}, {"fw_id": 4}]})).unwrap());
        assert!(!matches(&doc, &json!({"$and": [{"state": "READY"}, {"fw_id": 5}]})).unwrap());
        assert!(matches(&doc, &json!({"$nor": [{"state": "X"}]})).unwrap());
        assert!(matches(&doc, &json!({"launches": {"$size": 2}})).unwrap());
        assert!(matches(&doc, &json!({"spec.missing": {"$exists": false}})).unwrap());
        assert!(matches(&doc, &json!({"state": {"$not": {"$eq": "WAITING"}}})).unwrap());
        assert!(
            matches(&doc, &json!({"history": {"$elemMatch": {"state": "RUNNING"}}})).unwrap()
        );
        assert!(matches(&doc, &json!({"launches": {"$elemMatch": {"$gt": 11}}})).unwrap());
    }

    #[test]
    fn test_unknown_operator_is_rejected() {
        let err = matches(&fw(), &json!({"state": {"$regex": "R.*"}})).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert!(matches(&fw(), &json!([1])).is_err());
    }

    #[test]
    fn test_sort_order() {
        assert_eq!(sort_order(None, Some(&json!(1))), Ordering::Less);
        assert_eq!(sort_order(Some(&json!(2)), Some(&json!(1))), Ordering::Greater);
        assert_eq!(sort_order(Some(&json!("a")), Some(&json!(1))), Ordering::Greater);
        assert_eq!(get_path(&fw(), "spec.n.k"), Some(&json!(2.5)));
    }
}
