// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for fireworks-core integration tests.
//!
//! Provides an in-memory LaunchPad and a few task kinds with predictable behavior.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use fireworks_core::config::Config;
use fireworks_core::launchpad::LaunchPad;
use fireworks_core::migrations;
use fireworks_core::model::{FWAction, FWorker, FireTask, Firework, State, Task, TaskContext};
use fireworks_core::registry::Registry;
use fireworks_core::store::{SqliteStore, Store};
use fireworks_core::workflow::Workflow;

/// Task kind that stores its `value` param under `stored_data.value`.
pub const STORE_TASK: &str = "StoreTask";
/// Task kind that always fails.
pub const FAIL_TASK: &str = "FailTask";
/// Task kind that passes its `update` param to the children as `update_spec`.
pub const UPDATE_TASK: &str = "UpdateTask";
/// Task kind that fails while its firework spec has `break_me: true`.
pub const FLAKY_TASK: &str = "FlakyTask";

struct StoreTask {
    value: Value,
}

#[async_trait]
impl FireTask for StoreTask {
    async fn run_task(
        &self,
        _fw_spec: &Map<String, Value>,
        _ctx: &TaskContext,
    ) -> anyhow::Result<Option<FWAction>> {
        Ok(Some(FWAction::new().with_stored_data("value", self.value.clone())))
    }
}

struct FailTask;

#[async_trait]
impl FireTask for FailTask {
    async fn run_task(
        &self,
        _fw_spec: &Map<String, Value>,
        _ctx: &TaskContext,
    ) -> anyhow::Result<Option<FWAction>> {
        anyhow::bail!("task failed on purpose")
    }
}

struct FlakyTask;

#[async_trait]
impl FireTask for FlakyTask {
    async fn run_task(
        &self,
        fw_spec: &Map<String, Value>,
        _ctx: &TaskContext,
    ) -> anyhow::Result<Option<FWAction>> {
        if fw_spec.get("break_me") == Some(&Value::Bool(true)) {
            anyhow::bail!("spec asked to break");
        }
        Ok(None)
    }
}

struct UpdateTask {
    update: Map<String, Value>,
}

#[async_trait]
impl FireTask for UpdateTask {
    async fn run_task(
        &self,
        _fw_spec: &Map<String, Value>,
        _ctx: &TaskContext,
    ) -> anyhow::Result<Option<FWAction>> {
        let mut action = FWAction::new();
        action.update_spec = self.update.clone();
        Ok(Some(action))
    }
}

/// Built-in kinds plus the test kinds above.
pub fn test_registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .register_task(STORE_TASK, |params| {
            Ok(Arc::new(StoreTask {
                value: params.get("value").cloned().unwrap_or(Value::Null),
            }) as Arc<dyn FireTask>)
        })
        .register_task(FAIL_TASK, |_| Ok(Arc::new(FailTask) as Arc<dyn FireTask>))
        .register_task(FLAKY_TASK, |_| Ok(Arc::new(FlakyTask) as Arc<dyn FireTask>))
        .register_task(UPDATE_TASK, |params| {
            Ok(Arc::new(UpdateTask {
                update: params
                    .get("update")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default(),
            }) as Arc<dyn FireTask>)
        });
    registry
}

/// A fresh, reset LaunchPad over an in-memory database.
pub async fn test_launchpad() -> Arc<LaunchPad> {
    test_launchpad_with(Config::default()).await
}

pub async fn test_launchpad_with(config: Config) -> Arc<LaunchPad> {
    test_launchpad_with_pool(config).await.0
}

/// Like [`test_launchpad_with`], also handing back the pool for direct SQL.
pub async fn test_launchpad_with_pool(config: Config) -> (Arc<LaunchPad>, SqlitePool) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool");
    migrations::run_sqlite(&pool)
        .await
        .expect("Failed to run migrations");

    let store = SqliteStore::new(pool.clone());
    store.reset().await.expect("Failed to reset store");

    let lp = LaunchPad::builder()
        .store(Arc::new(store))
        .config(config)
        .registry(test_registry())
        .build()
        .expect("Failed to build LaunchPad");
    (Arc::new(lp), pool)
}

pub fn store_task(value: Value) -> Task {
    Task::new(STORE_TASK, json!({"value": value}))
}

pub fn fail_task() -> Task {
    Task::new(FAIL_TASK, json!({}))
}

pub fn flaky_task() -> Task {
    Task::new(FLAKY_TASK, json!({}))
}

pub fn update_task(update: Value) -> Task {
    Task::new(UPDATE_TASK, json!({"update": update}))
}

/// A firework with one StoreTask.
pub fn firework(name: &str) -> Firework {
    Firework::new(vec![store_task(json!(name))], Map::new()).with_name(name)
}

pub fn worker() -> FWorker {
    FWorker::new("test-worker")
}

/// Submit a chain of fireworks and return their stored ids in chain order.
pub async fn add_chain(lp: &LaunchPad, fws: Vec<Firework>) -> Vec<i64> {
    let placeholders: Vec<i64> = fws.iter().map(|fw| fw.fw_id).collect();
    let wf = Workflow::chain(fws, None).expect("Failed to build chain");
    let ids: HashMap<i64, i64> = lp.add_wf(wf).await.expect("Failed to add workflow");
    placeholders.iter().map(|p| ids[p]).collect()
}

/// Check out the next firework into RUNNING. Panics if nothing is ready.
pub async fn checkout(lp: &LaunchPad) -> (Firework, i64) {
    lp.checkout_fw(&worker(), "/tmp", None, None, None, State::Running)
        .await
        .expect("Failed to check out")
        .expect("Nothing was ready")
}

pub async fn fw_state(lp: &LaunchPad, fw_id: i64) -> State {
    lp.get_fw_by_id(fw_id)
        .await
        .expect("Failed to load firework")
        .state
}
