// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-place modification of a spec by a dict-mod instruction.
//!
//! An instruction is `{"_op": {key: value, ...}}`. Keys address nested objects with
//! `->` separators (`{"_set": {"a->b": 1}}`). Supported operators: `_set`, `_unset`,
//! `_push`, `_push_all`, `_inc`, `_rename`, `_add_to_set`, `_pull`, `_pull_all`, `_pop`.

use serde_json::{Map, Value};

use crate::error::{CoreError, Result};

/// Apply one instruction to `obj`.
pub fn apply_mod(modification: &Value, obj: &mut Map<String, Value>) -> Result<()> {
    let ops = modification
        .as_object()
        .ok_or_else(|| CoreError::validation("mod_spec", format!("expected an object, got {}", modification)))?;

    for (op, settings) in ops {
        let settings = settings.as_object().ok_or_else(|| {
            CoreError::validation("mod_spec", format!("{} expects an object of settings", op))
        })?;
        for (key, value) in settings {
            match op.as_str() {
                "_set" => {
                    let (parent, last) = nested(obj, key)?;
                    parent.insert(last, value.clone());
                }
                "_unset" => {
                    let (parent, last) = nested(obj, key)?;
                    parent.remove(&last);
                }
                "_push" => {
                    let (parent, last) = nested(obj, key)?;
                    array_at(parent, &last, key)?.push(value.clone());
                }
                "_push_all" => {
                    let items = value.as_array().ok_or_else(|| not_array(key))?;
                    let (parent, last) = nested(obj, key)?;
                    array_at(parent, &last, key)?.extend(items.iter().cloned());
                }
                "_inc" => {
                    let (parent, last) = nested(obj, key)?;
                    let current = parent.get(&last).cloned().unwrap_or(Value::from(0));
                    parent.insert(last, add_numbers(&current, value, key)?);
                }
                "_rename" => {
                    let new_key = value.as_str().ok_or_else(|| {
                        CoreError::validation(key.clone(), "_rename expects a string target")
                    })?;
                    if let Some(moved) = obj.remove(key) {
                        obj.insert(new_key.to_string(), moved);
                    }
                }
                "_add_to_set" => {
                    let (parent, last) = nested(obj, key)?;
                    let items = array_at(parent, &last, key)?;
                    if !items.contains(value) {
                        items.push(value.clone());
                    }
                }
                "_pull" => {
                    let (parent, last) = nested(obj, key)?;
                    if parent.contains_key(&last) {
                        array_at(parent, &last, key)?.retain(|item| item != value);
                    }
                }
                "_pull_all" => {
                    let drop = value.as_array().ok_or_else(|| not_array(key))?;
                    let (parent, last) = nested(obj, key)?;
                    if parent.contains_key(&last) {
                        array_at(parent, &last, key)?.retain(|item| !drop.contains(item));
                    }
                }
                "_pop" => {
                    let (parent, last) = nested(obj, key)?;
                    if parent.contains_key(&last) {
                        let items = array_at(parent, &last, key)?;
                        match value.as_i64() {
                            Some(1) => {
                                items.pop();
                            }
                            Some(-1) if !items.is_empty() => {
                                items.remove(0);
                            }
                            _ => {}
                        }
                    }
                }
                other => {
                    return Err(CoreError::validation(
                        "mod_spec",
                        format!("{} is not a supported action", other),
                    ));
                }
            }
        }
    }
    Ok(())
}

/// Walk `a->b->c` to the object holding `c`, creating intermediate objects.
pub(crate) fn nested<'a>(
    obj: &'a mut Map<String, Value>,
    key: &str,
) -> Result<(&'a mut Map<String, Value>, String)> {
    let mut toks: Vec<&str> = key.split("->").collect();
    let last = toks.pop().unwrap_or_default().to_string();
    let mut current = obj;
    for tok in toks {
        let next = current
            .entry(tok.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        current = next.as_object_mut().ok_or_else(|| {
            CoreError::validation(key.to_string(), format!("'{}' is not an object", tok))
        })?;
    }
    Ok((current, last))
}

fn array_at<'a>(
    parent: &'a mut Map<String, Value>,
    last: &str,
    key: &str,
) -> Result<&'a mut Vec<Value>> {
    parent
        .entry(last.to_string())
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .ok_or_else(|| not_array(key))
}

fn not_array(key: &str) -> CoreError {
    CoreError::validation(key.to_string(), "keyword does not refer to an array")
}

fn add_numbers(current: &Value, inc: &Value, key: &str) -> Result<Value> {
    let bad = || CoreError::validation(key.to_string(), "_inc requires numbers");
    if let (Some(a), Some(b)) = (current.as_i64(), inc.as_i64()) {
        return Ok(Value::from(a + b));
    }
    let a = current.as_f64().ok_or_else(bad)?;
    let b = inc.as_f64().ok_or_else(bad)?;
    Ok(Value::from(a + b))
}
