// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Name → constructor lookup for tasks and duplicate finders.
//!
//! Stored documents reference executable behavior by `_fw_name`. A [`Registry`] turns
//! those names back into [`FireTask`] and [`DupeFinder`] objects. Unknown names fail with
//! [`CoreError::Deserialization`], which the checkout path treats as a malformed firework.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::dupefinder::{DupeFinder, DupeFinderExact};
use crate::error::{CoreError, Result};
use crate::model::{FireTask, Firework, ScriptTask, Task};

/// Builds a task from its stored parameters.
pub type TaskFactory = Arc<dyn Fn(&Map<String, Value>) -> Result<Arc<dyn FireTask>> + Send + Sync>;

/// Builds a duplicate finder from its stored parameters.
pub type DupeFinderFactory =
    Arc<dyn Fn(&Map<String, Value>) -> Result<Arc<dyn DupeFinder>> + Send + Sync>;

/// Registered task and duplicate-finder kinds.
#[derive(Clone)]
pub struct Registry {
    tasks: HashMap<String, TaskFactory>,
    dupefinders: HashMap<String, DupeFinderFactory>,
}

impl Default for Registry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register_task(ScriptTask::NAME, |params| {
            Ok(Arc::new(ScriptTask::from_params(params)?) as Arc<dyn FireTask>)
        });
        registry.register_dupefinder(DupeFinderExact::NAME, |_| {
            Ok(Arc::new(DupeFinderExact) as Arc<dyn DupeFinder>)
        });
        registry
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tasks: Vec<&String> = self.tasks.keys().collect();
        tasks.sort();
        let mut dupefinders: Vec<&String> = self.dupefinders.keys().collect();
        dupefinders.sort();
        f.debug_struct("Registry")
            .field("tasks", &tasks)
            .field("dupefinders", &dupefinders)
            .finish()
    }
}

impl Registry {
    /// A registry with the built-in kinds.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry without any kinds.
    pub fn empty() -> Self {
        Self {
            tasks: HashMap::new(),
            dupefinders: HashMap::new(),
        }
    }

    /// Register (or replace) a task kind.
    pub fn register_task<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Map<String, Value>) -> Result<Arc<dyn FireTask>> + Send + Sync + 'static,
    {
        self.tasks.insert(name.into(), Arc::new(factory));
        self
    }

    /// Register (or replace) a duplicate-finder kind.
    pub fn register_dupefinder<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Map<String, Value>) -> Result<Arc<dyn DupeFinder>> + Send + Sync + 'static,
    {
        self.dupefinders.insert(name.into(), Arc::new(factory));
        self
    }

    /// Whether a task kind is registered.
    pub fn has_task(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Instantiate a stored task.
    pub fn task(&self, task: &Task) -> Result<Arc<dyn FireTask>> {
        let factory = self.tasks.get(&task.fw_name).ok_or_else(|| {
            CoreError::deserialization("task", format!("unregistered task kind '{}'", task.fw_name))
        })?;
        factory(&task.params)
    }

    /// Instantiate every task of a firework, in order.
    pub fn tasks_for(&self, fw: &Firework) -> Result<Vec<Arc<dyn FireTask>>> {
        fw.tasks.iter().map(|t| self.task(t)).collect()
    }

    /// Instantiate a serialized duplicate finder (`{"_fw_name": kind, ...}`).
    pub fn dupefinder(&self, doc: &Value) -> Result<Arc<dyn DupeFinder>> {
        let params = doc
            .as_object()
            .ok_or_else(|| CoreError::deserialization("_dupefinder", "expected an object"))?;
        let name = params
            .get("_fw_name")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::deserialization("_dupefinder", "missing _fw_name"))?;
        let factory = self.dupefinders.get(name).ok_or_else(|| {
            CoreError::deserialization("_dupefinder", format!("unregistered dupefinder '{}'", name))
        })?;
        factory(params)
    }

    /// Check that every task of `fw` resolves.
    pub fn check_firework(&self, fw: &Firework) -> Result<()> {
        self.tasks_for(fw).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtins_resolve() {
        let registry = Registry::new();
        assert!(registry.task(&Task::script("echo hi")).is_ok());
        let finder = registry
            .dupefinder(&json!({"_fw_name": "DupeFinderExact"}))
            .unwrap();
        assert_eq!(finder.verify(&Map::new(), &Map::new()), Some(true));
    }

    #[test]
    fn test_unknown_kinds_are_deserialization_failures() {
        let registry = Registry::new();
        let err = registry
            .task(&Task::new("PyTask", json!({"func": "os.getcwd"})))
            .err()
            .unwrap();
        assert_eq!(err.error_code(), "DESERIALIZATION_FAILURE");

        let err = registry.dupefinder(&json!({"_fw_name": "Nope"})).err().unwrap();
        assert!(err.to_string().contains("Nope"));
    }

    #[test]
    fn test_bad_params_fail_construction() {
        let registry = Registry::new();
        let err = registry
            .task(&Task::new(ScriptTask::NAME, json!({"store_stdout": true})))
            .err()
            .unwrap();
        assert_eq!(err.error_code(), "DESERIALIZATION_FAILURE");
    }
}
