// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The structured return value of a firework.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::workflow::Workflow;

/// What a completed firework asks the LaunchPad to do next.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FWAction {
    /// Arbitrary data recorded with the launch.
    pub stored_data: Map<String, Value>,
    /// Skip the remaining tasks of this firework.
    pub exit: bool,
    /// Shallow overrides merged into the children's specs.
    pub update_spec: Map<String, Value>,
    /// Dict-mod operations applied to the children's specs, in order.
    pub mod_spec: Vec<Value>,
    /// Workflows grafted as new children.
    pub additions: Vec<Workflow>,
    /// Workflows grafted between this firework and its children.
    pub detours: Vec<Workflow>,
    /// Defuse the children and their unfinished descendants.
    pub defuse_children: bool,
    /// Defuse every unfinished firework of the workflow.
    pub defuse_workflow: bool,
    /// Apply `update_spec` and `mod_spec` to every descendant.
    pub propagate: bool,
}

impl FWAction {
    /// An empty action.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a stored-data entry.
    pub fn with_stored_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.stored_data.insert(key.into(), value);
        self
    }

    /// Add a shallow spec override for the children.
    pub fn with_update_spec(mut self, key: impl Into<String>, value: Value) -> Self {
        self.update_spec.insert(key.into(), value);
        self
    }

    /// Append a dict-mod operation.
    pub fn with_mod_spec(mut self, dict_mod: Value) -> Self {
        self.mod_spec.push(dict_mod);
        self
    }

    /// Graft a workflow as new children.
    pub fn with_addition(mut self, wf: Workflow) -> Self {
        self.additions.push(wf);
        self
    }

    /// Graft a workflow between this firework and its children.
    pub fn with_detour(mut self, wf: Workflow) -> Self {
        self.detours.push(wf);
        self
    }

    /// Whether the remaining tasks of the firework should be skipped.
    pub fn skip_remaining_tasks(&self) -> bool {
        self.exit
            || !self.detours.is_empty()
            || !self.additions.is_empty()
            || self.defuse_children
            || self.defuse_workflow
    }
}
