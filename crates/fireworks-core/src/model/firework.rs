// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fireworks: the atomic units of a workflow.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::launch::Launch;
use super::state::State;
use super::task::Task;

static NEXT_PLACEHOLDER_ID: AtomicI64 = AtomicI64::new(-1);

/// A fresh negative id for a firework that has not been stored yet.
pub fn next_placeholder_id() -> i64 {
    NEXT_PLACEHOLDER_ID.fetch_sub(1, Ordering::Relaxed)
}

fn default_name() -> String {
    "Unnamed FW".to_string()
}

/// A unit of work: ordered tasks plus the `spec` document they run against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Firework {
    /// Identifier; negative until the LaunchPad assigns a real one.
    pub fw_id: i64,
    /// Current state.
    pub state: State,
    /// Display name.
    #[serde(default = "default_name")]
    pub name: String,
    /// Tasks, run in order.
    #[serde(default)]
    pub tasks: Vec<Task>,
    /// Free-form spec; underscore keys are reserved.
    #[serde(default)]
    pub spec: Map<String, Value>,
    /// Creation time.
    pub created_on: DateTime<Utc>,
    /// Last modification time.
    pub updated_on: DateTime<Utc>,
    /// Current launches.
    #[serde(default)]
    pub launches: Vec<Launch>,
    /// Launches archived by reruns.
    #[serde(default)]
    pub archived_launches: Vec<Launch>,
}

impl Firework {
    /// A WAITING firework with a placeholder id.
    pub fn new(tasks: Vec<Task>, spec: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            fw_id: next_placeholder_id(),
            state: State::Waiting,
            name: default_name(),
            tasks,
            spec,
            created_on: now,
            updated_on: now,
            launches: Vec::new(),
            archived_launches: Vec::new(),
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Use an explicit (negative) placeholder id.
    pub fn with_id(mut self, fw_id: i64) -> Self {
        self.fw_id = fw_id;
        self
    }

    /// Set a spec key.
    pub fn with_spec(mut self, key: impl Into<String>, value: Value) -> Self {
        self.spec.insert(key.into(), value);
        self
    }

    /// `_priority`, defaulting to 0.
    pub fn priority(&self) -> i64 {
        self.spec
            .get("_priority")
            .and_then(Value::as_i64)
            .unwrap_or(0)
    }

    /// `_category` when it is a single string.
    pub fn category(&self) -> Option<&str> {
        self.spec.get("_category").and_then(Value::as_str)
    }

    /// Whether this firework may run after fizzled parents.
    pub fn allow_fizzled_parents(&self) -> bool {
        self.spec
            .get("_allow_fizzled_parents")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Ids of the current launches.
    pub fn launch_ids(&self) -> Vec<i64> {
        self.launches.iter().map(|l| l.launch_id).collect()
    }

    /// Ids of the archived launches.
    pub fn archived_launch_ids(&self) -> Vec<i64> {
        self.archived_launches.iter().map(|l| l.launch_id).collect()
    }

    /// Whether `launch_id` is one of the current launches.
    pub fn has_launch(&self, launch_id: i64) -> bool {
        self.launches.iter().any(|l| l.launch_id == launch_id)
    }

    /// The launch that decides this firework's state: the highest ranked one, and among
    /// COMPLETED launches the one that ended last.
    pub fn representative_launch(&self) -> Option<&Launch> {
        let completed = self
            .launches
            .iter()
            .filter(|l| l.state() == State::Completed)
            .max_by_key(|l| l.time_end());
        if completed.is_some() {
            return completed;
        }
        self.launches
            .iter()
            .filter(|l| l.state().rank() > State::Archived.rank())
            .fold(None, |best: Option<&Launch>, l| match best {
                Some(b) if b.state().rank() >= l.state().rank() => Some(b),
                _ => Some(l),
            })
    }

    /// Archive the launches and go back to WAITING.
    ///
    /// A FIZZLED firework records the `_exception._details` of its last launch in
    /// `spec._exception_details` when `except_details` is set, and drops stale details
    /// otherwise.
    pub fn rerun(&mut self, except_details: bool) {
        if self.state == State::Fizzled {
            let details = self
                .launches
                .last()
                .and_then(|l| l.action.as_ref())
                .and_then(|a| a.stored_data.get("_exception"))
                .and_then(|e| e.get("_details"))
                .filter(|d| !d.is_null())
                .cloned();
            match details {
                Some(details) if except_details => {
                    self.spec.insert("_exception_details".into(), details);
                }
                _ => {
                    self.spec.remove("_exception_details");
                }
            }
        }

        for launch in self.launches.drain(..) {
            if !self
                .archived_launches
                .iter()
                .any(|a| a.launch_id == launch.launch_id)
            {
                self.archived_launches.push(launch);
            }
        }
        self.state = State::Waiting;
        self.updated_on = Utc::now();
    }
}
