// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reserved spec keys.
//!
//! Keys starting with an underscore form the contract between the LaunchPad, the
//! Rocket and user tasks. They are listed here once and checked when a workflow is
//! submitted.

use serde_json::{Map, Value};

use super::tracker::Tracker;
use crate::error::{CoreError, Result};

/// Shape a reserved key must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// Integer.
    Int,
    /// Boolean.
    Bool,
    /// String.
    Str,
    /// String or `null`.
    OptStr,
    /// String or list of strings.
    StrOrStrList,
    /// JSON object.
    Object,
    /// Serialized object carrying `_fw_name`.
    Serialized,
    /// JSON array.
    List,
    /// List of tracker documents.
    Trackers,
    /// List of background task documents.
    BackgroundTasks,
    /// Not checked.
    Any,
}

/// A reserved spec key and its expected shape.
#[derive(Debug, Clone, Copy)]
pub struct ReservedKey {
    /// Key name.
    pub name: &'static str,
    /// Expected shape.
    pub kind: KeyKind,
    /// What the key does.
    pub description: &'static str,
}

/// Every reserved key understood by the engine.
pub const RESERVED_KEYS: &[ReservedKey] = &[
    ReservedKey { name: "_priority", kind: KeyKind::Int, description: "higher runs first" },
    ReservedKey { name: "_category", kind: KeyKind::StrOrStrList, description: "worker category filter" },
    ReservedKey { name: "_launch_dir", kind: KeyKind::Str, description: "run in this directory instead" },
    ReservedKey { name: "_dupefinder", kind: KeyKind::Serialized, description: "duplicate detector" },
    ReservedKey { name: "_allow_fizzled_parents", kind: KeyKind::Bool, description: "run even if parents fizzled" },
    ReservedKey { name: "_pass_job_info", kind: KeyKind::Bool, description: "pass launch info to children" },
    ReservedKey { name: "_preserve_fworker", kind: KeyKind::Bool, description: "pin children to this worker" },
    ReservedKey { name: "_trackers", kind: KeyKind::Trackers, description: "files to tail while running" },
    ReservedKey { name: "_background_tasks", kind: KeyKind::BackgroundTasks, description: "tasks run periodically alongside" },
    ReservedKey { name: "_fworker", kind: KeyKind::OptStr, description: "only run on the named worker" },
    ReservedKey { name: "_job_info", kind: KeyKind::List, description: "launch info passed from parents" },
    ReservedKey { name: "_fizzled_parents", kind: KeyKind::List, description: "fizzled parents, filled by refresh" },
    ReservedKey { name: "_queueadapter", kind: KeyKind::Object, description: "queue adapter overrides" },
    ReservedKey { name: "_files_in", kind: KeyKind::Object, description: "files to copy in" },
    ReservedKey { name: "_files_out", kind: KeyKind::Object, description: "files to pass on" },
    ReservedKey { name: "_files_prev", kind: KeyKind::Object, description: "files passed by parents" },
    ReservedKey { name: "_recovery", kind: KeyKind::Object, description: "resume data for a rerun" },
    ReservedKey { name: "_recover_launch", kind: KeyKind::Object, description: "task-level rerun request" },
    ReservedKey { name: "_exception_details", kind: KeyKind::Any, description: "details of the last failure" },
    ReservedKey { name: "_add_launchpad_and_fw_id", kind: KeyKind::Bool, description: "expose LaunchPad and fw_id to tasks" },
    ReservedKey { name: "_add_fworker", kind: KeyKind::Bool, description: "expose the worker to tasks" },
    ReservedKey { name: "_fw_env", kind: KeyKind::Object, description: "worker environment, set at run time" },
];

/// Look up a reserved key.
pub fn reserved_key(name: &str) -> Option<&'static ReservedKey> {
    RESERVED_KEYS.iter().find(|k| k.name == name)
}

/// Check the reserved keys of a spec. Unknown underscore keys are allowed.
pub fn validate_spec(spec: &Map<String, Value>) -> Result<()> {
    for (name, value) in spec {
        let Some(key) = reserved_key(name) else {
            continue;
        };
        if !kind_matches(key.kind, value) {
            return Err(CoreError::validation(
                format!("spec.{}", name),
                format!("expected {}, got {}", describe(key.kind), value),
            ));
        }
    }
    Ok(())
}

fn kind_matches(kind: KeyKind, value: &Value) -> bool {
    match kind {
        KeyKind::Int => value.is_i64() || value.is_u64(),
        KeyKind::Bool => value.is_boolean(),
        KeyKind::Str => value.is_string(),
        KeyKind::OptStr => value.is_string() || value.is_null(),
        KeyKind::StrOrStrList => match value {
            Value::String(_) => true,
            Value::Array(items) => items.iter().all(Value::is_string),
            _ => false,
        },
        KeyKind::Object => value.is_object(),
        KeyKind::Serialized => value
            .get("_fw_name")
            .is_some_and(Value::is_string),
        KeyKind::List => value.is_array(),
        KeyKind::Trackers => serde_json::from_value::<Vec<Tracker>>(value.clone()).is_ok(),
        KeyKind::BackgroundTasks => value
            .as_array()
            .is_some_and(|items| items.iter().all(|i| i.get("tasks").is_some_and(Value::is_array))),
        KeyKind::Any => true,
    }
}

fn describe(kind: KeyKind) -> &'static str {
    match kind {
        KeyKind::Int => "an integer",
        KeyKind::Bool => "a boolean",
        KeyKind::Str => "a string",
        KeyKind::OptStr => "a string or null",
        KeyKind::StrOrStrList => "a string or a list of strings",
        KeyKind::Object => "an object",
        KeyKind::Serialized => "an object with _fw_name",
        KeyKind::List => "a list",
        KeyKind::Trackers => "a list of trackers",
        KeyKind::BackgroundTasks => "a list of background tasks",
        KeyKind::Any => "anything",
    }
}
