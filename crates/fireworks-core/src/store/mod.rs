// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for fireworks-core.
//!
//! The [`Store`] trait is the only way the LaunchPad touches durable state. Every
//! method is a single statement or a single transaction, so concurrent LaunchPads on
//! the same database coordinate through the database's own atomicity:
//!
//! | Concern | Mechanism |
//! |---------|-----------|
//! | id allocation | `UPDATE fw_id_assigner ... RETURNING` |
//! | checkout | compare-and-set on `(fw_id, state)` |
//! | workflow lock | compare-and-set on `workflows.locked` |
//! | workflow writes | one transaction per workflow |

pub mod retry;
pub mod sqlite;

pub use self::sqlite::SqliteStore;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};

use crate::config::SortOrder;
use crate::error::Result;
use crate::model::{Firework, Launch, State};
use crate::workflow::{Links, Workflow};

/// Workflow row without its fireworks.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowRecord {
    /// Store-internal row id, used for ordering.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Aggregate state.
    pub state: State,
    /// Parent → children adjacency.
    pub links: Links,
    /// Cached firework states.
    pub fw_states: BTreeMap<i64, State>,
    /// Free-form metadata.
    pub metadata: Map<String, Value>,
    /// Creation time.
    pub created_on: DateTime<Utc>,
    /// Last modification time.
    pub updated_on: DateTime<Utc>,
    /// Whether a WFLock is held.
    pub locked: bool,
}

impl WorkflowRecord {
    /// Node ids in ascending order.
    pub fn nodes(&self) -> Vec<i64> {
        self.links.nodes()
    }

    /// Document form used by workflow filters.
    pub fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "state": self.state,
            "nodes": self.nodes(),
            "links": self.links,
            "parent_links": self.links.parent_links(),
            "fw_states": self.fw_states,
            "metadata": self.metadata,
            "created_on": self.created_on,
            "updated_on": self.updated_on,
        })
    }
}

/// A firework row as read for matching: indexed columns plus the stored document.
///
/// The document lists launch ids rather than launches. A document that no longer parses
/// is replaced by a minimal `{fw_id, state, name, spec: {}}` stand-in with `malformed` set.
#[derive(Debug, Clone)]
pub struct FireworkRow {
    /// Firework id.
    pub fw_id: i64,
    /// Authoritative state column.
    pub state: State,
    /// Stored document.
    pub doc: Value,
    /// The stored document could not be parsed.
    pub malformed: bool,
}

/// Indexed columns of a firework, read without touching its document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FireworkHead {
    /// Firework id.
    pub fw_id: i64,
    /// Display name.
    pub name: String,
    /// Current state.
    pub state: State,
}

/// Outcome of one lock attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAttempt {
    /// The lock is now held by the caller.
    Acquired,
    /// Someone else holds it.
    Busy,
    /// No workflow contains the firework.
    Missing,
}

/// A launch that runs without database access.
#[derive(Debug, Clone, PartialEq)]
pub struct OfflineRun {
    /// Launch id.
    pub launch_id: i64,
    /// Firework id.
    pub fw_id: i64,
    /// Firework name at launch time.
    pub name: String,
    /// Registration time.
    pub created_on: DateTime<Utc>,
    /// Last recovery attempt.
    pub updated_on: DateTime<Utc>,
    /// Excluded from recovery.
    pub deprecated: bool,
    /// Results have been recovered.
    pub completed: bool,
}

/// Durable state of a LaunchPad.
#[async_trait::async_trait]
#[allow(missing_docs)]
pub trait Store: Send + Sync {
    // ========== Setup ==========

    /// Drop every entity and seed the id counters at (1, 1).
    async fn reset(&self) -> Result<()>;

    /// Refresh planner statistics; `full` also compacts the file.
    async fn tuneup(&self, full: bool) -> Result<()>;

    async fn health_check(&self) -> Result<bool>;

    /// Claim `n` consecutive firework ids and return the first.
    async fn allocate_fw_ids(&self, n: i64) -> Result<i64>;

    async fn allocate_launch_id(&self) -> Result<i64>;

    // ========== Workflows ==========

    /// Insert workflows, their fireworks and node memberships in one transaction.
    async fn insert_workflows(&self, wfs: &[Workflow]) -> Result<()>;

    /// Write the workflow row and the listed fireworks in one transaction. Fireworks
    /// not yet registered as nodes are added to the workflow.
    async fn save_workflow(&self, wf: &Workflow, fw_ids: &BTreeSet<i64>) -> Result<()>;

    async fn get_workflow_record(&self, fw_id: i64) -> Result<Option<WorkflowRecord>>;

    /// The full workflow containing `fw_id`, fireworks and launches hydrated.
    async fn get_workflow(&self, fw_id: i64) -> Result<Option<Workflow>>;

    async fn list_workflow_records(&self) -> Result<Vec<WorkflowRecord>>;

    async fn count_workflows(&self) -> Result<i64>;

    /// Remove the given fireworks with their workflow, plus the listed launches and
    /// everything attached to them, in one transaction.
    async fn delete_workflow(&self, fw_ids: &[i64], launch_ids: &[i64]) -> Result<()>;

    async fn try_lock_workflow(&self, fw_id: i64) -> Result<LockAttempt>;

    /// Take the lock regardless of its holder. Returns false when the workflow is missing.
    async fn force_lock_workflow(&self, fw_id: i64) -> Result<bool>;

    async fn unlock_workflow(&self, fw_id: i64) -> Result<()>;

    // ========== Fireworks ==========

    async fn get_firework(&self, fw_id: i64) -> Result<Option<Firework>>;

    /// The stored document with launches expanded into launch documents.
    async fn get_firework_doc(&self, fw_id: i64) -> Result<Option<Value>>;

    /// Id, name and state of each of `fw_ids` that exists, in ascending id order.
    async fn firework_heads(&self, fw_ids: &[i64]) -> Result<Vec<FireworkHead>>;

    async fn put_firework(&self, fw: &Firework) -> Result<()>;

    /// Move a firework from one of `from` to `to` if nobody else did first.
    async fn claim_firework(&self, fw_id: i64, from: &[State], to: State) -> Result<bool>;

    /// FIZZLE a firework whose stored document cannot be used, recording `details`.
    async fn mark_malformed_fizzled(&self, fw_id: i64, details: &str) -> Result<()>;

    /// Fireworks in `states` (all when `None`), highest priority first, then by
    /// creation time per `order`, ties by ascending id.
    async fn find_fireworks(&self, states: Option<&[State]>, order: SortOrder) -> Result<Vec<FireworkRow>>;

    /// Fireworks other than `except_fw_id` holding at least one unarchived launch, in
    /// [`Store::find_fireworks`] order.
    async fn find_launch_holders(&self, except_fw_id: i64, order: SortOrder) -> Result<Vec<FireworkRow>>;

    /// Fireworks listing `launch_id` among their launches (and archived ones if asked).
    async fn fw_ids_holding_launch(&self, launch_id: i64, include_archived: bool) -> Result<Vec<i64>>;

    // ========== Launches ==========

    async fn get_launch(&self, launch_id: i64) -> Result<Option<Launch>>;

    /// Upsert a launch. With `action_blob`, the stored action is a pointer to that blob.
    /// Any other blob held for the launch is dropped.
    async fn put_launch(&self, launch: &Launch, action_blob: Option<i64>) -> Result<()>;

    /// Launches in `state` (all when `None`) whose heartbeat is at or before the cutoff.
    async fn find_launches(
        &self,
        state: Option<State>,
        heartbeat_before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Launch>>;

    async fn launch_ids_by_reservation(&self, reservation_id: &str) -> Result<Vec<i64>>;

    /// Store an oversize action and return its blob id.
    async fn insert_action_blob(&self, launch_id: i64, data: &str) -> Result<i64>;

    // ========== Offline runs ==========

    async fn insert_offline_run(&self, run: &OfflineRun) -> Result<()>;

    async fn get_offline_run(&self, launch_id: i64) -> Result<Option<OfflineRun>>;

    async fn update_offline_run(
        &self,
        launch_id: i64,
        completed: Option<bool>,
        deprecated: Option<bool>,
    ) -> Result<()>;

    async fn deprecate_offline_runs_for_fw(&self, fw_id: i64) -> Result<u64>;

    async fn list_offline_runs(&self, include_completed: bool) -> Result<Vec<OfflineRun>>;
}
