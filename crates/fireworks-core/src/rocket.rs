// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The Rocket: checks out one firework, runs its tasks and reports the result.
//!
//! # Run sequence
//!
//! 1. Check out a firework (online) or read `FW.json` (offline).
//! 2. Move into `_launch_dir` if the firework asks for one.
//! 3. Resume from `_recover_launch` at the task that failed, with its accumulators.
//! 4. Write `FW.json`, inject `_fw_env` and start the heartbeat and `_background_tasks`.
//! 5. Run the tasks in order, folding each action into the firework spec seen by the next task.
//! 6. Complete the launch (online) or write the result into `FW_offline.json`.
//!
//! A task error fizzles the launch with a recovery record. An error while processing the
//! results restores the checkout backups and fizzles the launch without one.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use sysinfo::System;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::launchpad::LaunchPad;
use crate::model::{FWAction, FWorker, FireTask, Firework, State, Task, TaskContext};
use crate::offline;
use crate::registry::Registry;
use crate::workflow::dict_mods::apply_mod;

/// Action file a non-native task may leave in the launch directory.
pub const ACTION_FILE: &str = "FWAction.json";

/// One entry of `_background_tasks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundTask {
    /// Tasks run on every iteration.
    pub tasks: Vec<Task>,
    /// Iterations before stopping; 0 is unlimited.
    #[serde(default)]
    pub num_launches: u32,
    /// Seconds between iterations.
    #[serde(default)]
    pub sleep_time: f64,
    /// Run the tasks once more when the firework finishes.
    #[serde(default)]
    pub run_on_finish: bool,
}

/// Where heartbeats go.
#[derive(Clone)]
enum PingTarget {
    Online { launchpad: Arc<LaunchPad>, launch_id: i64 },
    Offline { launch_dir: PathBuf },
}

impl PingTarget {
    async fn ping(&self) {
        let result = match self {
            Self::Online {
                launchpad,
                launch_id,
            } => launchpad.ping_launch(*launch_id, None, None).await,
            Self::Offline { launch_dir } => offline::write_ping(launch_dir, Utc::now()).await,
        };
        if let Err(e) = result {
            warn!(error = %e, "Heartbeat failed");
        }
    }
}

/// Heartbeat and background loops of one run, stopped together.
struct Backgrounds {
    stop: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Backgrounds {
    fn new() -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            stop,
            handles: Vec::new(),
        }
    }

    fn start_ping(&mut self, target: PingTarget, interval: Duration) {
        let mut stop = self.stop.subscribe();
        self.handles.push(tokio::spawn(async move {
            loop {
                if *stop.borrow() {
                    break;
                }
                target.ping().await;
                tokio::select! {
                    biased;
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        }));
    }

    fn start_background(
        &mut self,
        bt: BackgroundTask,
        tasks: Vec<Arc<dyn FireTask>>,
        spec: Map<String, Value>,
        ctx: TaskContext,
    ) {
        let mut stop = self.stop.subscribe();
        self.handles.push(tokio::spawn(async move {
            let mut launched = 0u32;
            let pause = Duration::from_secs_f64(bt.sleep_time.max(0.0));
            loop {
                if *stop.borrow() {
                    break;
                }
                for task in &tasks {
                    if let Err(e) = task.run_task(&spec, &ctx).await {
                        warn!(error = %e, "Background task failed");
                    }
                }
                launched += 1;
                if bt.num_launches > 0 && launched >= bt.num_launches {
                    break;
                }
                tokio::select! {
                    biased;
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }));
    }

    async fn stop(&mut self) {
        let _ = self.stop.send(true);
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background loop ended abnormally");
            }
        }
    }
}

/// Accumulated results of the tasks run so far.
#[derive(Debug, Default)]
struct Accumulated {
    stored_data: Map<String, Value>,
    update_spec: Map<String, Value>,
    mod_spec: Vec<Value>,
}

impl Accumulated {
    fn absorb(&mut self, action: &FWAction) {
        self.stored_data
            .extend(action.stored_data.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.update_spec
            .extend(action.update_spec.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.mod_spec.extend(action.mod_spec.iter().cloned());
    }

    fn restore(recovery: &Value) -> Self {
        let object = |key: &str| match recovery.get(key) {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        Self {
            stored_data: object("_all_stored_data"),
            update_spec: object("_all_update_spec"),
            mod_spec: match recovery.get("_all_mod_spec") {
                Some(Value::Array(items)) => items.clone(),
                _ => Vec::new(),
            },
        }
    }

    fn to_value(&self) -> Value {
        json!({
            "_all_stored_data": self.stored_data,
            "_all_update_spec": self.update_spec,
            "_all_mod_spec": self.mod_spec,
        })
    }
}

/// Runs one firework.
pub struct Rocket {
    launchpad: Option<Arc<LaunchPad>>,
    fworker: FWorker,
    fw_id: Option<i64>,
    registry: Arc<Registry>,
    config: Config,
}

impl Rocket {
    /// A rocket that checks out from `launchpad`, optionally only `fw_id`.
    pub fn new(launchpad: Arc<LaunchPad>, fworker: FWorker, fw_id: Option<i64>) -> Self {
        let registry = launchpad.registry().clone();
        let config = launchpad.config().clone();
        Self {
            launchpad: Some(launchpad),
            fworker,
            fw_id,
            registry,
            config,
        }
    }

    /// A rocket that runs the `FW.json` of its launch directory without a database.
    pub fn offline(fworker: FWorker, registry: Arc<Registry>, config: Config) -> Self {
        Self {
            launchpad: None,
            fworker,
            fw_id: None,
            registry,
            config,
        }
    }

    /// Run one firework in `launch_dir`. Returns false when nothing was ready.
    #[instrument(skip(self, launch_dir), fields(worker = %self.fworker.name))]
    pub async fn run(&self, launch_dir: &Path) -> Result<bool> {
        let mut launch_dir = launch_dir.to_path_buf();

        let (fw, launch_id) = match &self.launchpad {
            Some(lp) => {
                let host = System::host_name();
                let ip = match host.as_deref() {
                    Some(h) => resolve_ip(h).await,
                    None => None,
                };
                let checked_out = lp
                    .checkout_fw(
                        &self.fworker,
                        &launch_dir.to_string_lossy(),
                        self.fw_id,
                        host.as_deref(),
                        ip.as_deref(),
                        State::Running,
                    )
                    .await?;
                match checked_out {
                    Some((fw, launch_id)) => (fw, Some(launch_id)),
                    None => {
                        info!(query = %self.fworker.query()?, "No FireWorks are ready to run and match query!");
                        return Ok(false);
                    }
                }
            }
            None => {
                let fw = offline::read_firework(&launch_dir).await?;
                let mut data = offline::read_offline(&launch_dir).await?;
                data.started_on = Some(Utc::now());
                offline::write_offline(&launch_dir, &data).await?;
                (fw, None)
            }
        };

        let mut backgrounds = Backgrounds::new();
        let mut final_state = None;
        let outcome = self
            .execute(&fw, launch_id, &mut launch_dir, &mut backgrounds, &mut final_state)
            .await;
        backgrounds.stop().await;

        match outcome {
            Ok(()) => Ok(true),
            Err(e @ CoreError::LockedWorkflow { .. }) => {
                warn!(
                    fw_id = fw.fw_id,
                    final_state = ?final_state,
                    error = %e,
                    "Firework {} reached final state {:?} but couldn't complete the update of the \
                     database. Refresh the WF to recover the result.",
                    fw.fw_id,
                    final_state
                );
                Ok(true)
            }
            Err(e) => {
                error!(fw_id = fw.fw_id, error = %e, "Error while processing the results of the run");
                self.fizzle_after_error(&fw, launch_id, &launch_dir, &e).await?;
                Ok(true)
            }
        }
    }

    async fn execute(
        &self,
        fw: &Firework,
        launch_id: Option<i64>,
        launch_dir: &mut PathBuf,
        backgrounds: &mut Backgrounds,
        final_state: &mut Option<State>,
    ) -> Result<()> {
        if let (Some(lp), Some(id), Some(dir)) = (
            &self.launchpad,
            launch_id,
            fw.spec.get("_launch_dir").and_then(Value::as_str),
        ) {
            self.enter_launch_dir(lp, id, launch_dir, dir).await?;
        }

        let mut starting_task = 0;
        let mut acc = Accumulated::default();
        if let Some(recover) = fw.spec.get("_recover_launch") {
            let recover_id = recover
                .get("_launch_id")
                .and_then(Value::as_i64)
                .ok_or_else(|| CoreError::validation("_recover_launch", "missing _launch_id"))?;
            if let Some(lp) = &self.launchpad {
                let previous = lp.get_launch_by_id(recover_id).await?;
                let stored = previous.action.map(|a| a.stored_data).unwrap_or_default();
                starting_task = stored
                    .get("_exception")
                    .and_then(|e| e.get("_failed_task_n"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as usize;
                if let Some(recovery) = stored.get("_recovery") {
                    acc = Accumulated::restore(recovery);
                }
                info!(
                    starting_task,
                    dir = %previous.launch_dir,
                    "Recovering from task number {} in folder {}.",
                    starting_task,
                    previous.launch_dir
                );
                let mode = recover.get("_recover_mode").and_then(Value::as_str);
                self.copy_previous(mode, Path::new(&previous.launch_dir), launch_dir)
                    .await?;
            }
        } else if let Some(recovery) = fw.spec.get("_recovery") {
            let mode = recovery.get("_mode").and_then(Value::as_str);
            if let Some(prev) = recovery.get("_prev_dir").and_then(Value::as_str) {
                self.copy_previous(mode, Path::new(prev), launch_dir).await?;
            }
        }

        info!(fw_id = fw.fw_id, dir = %launch_dir.display(), "RUNNING fw_id: {} in directory: {}", fw.fw_id, launch_dir.display());
        offline::write_firework(launch_dir, fw).await?;

        let mut my_spec = fw.spec.clone();
        my_spec.insert("_fw_env".into(), Value::Object(self.fworker.env.clone()));

        let ctx = TaskContext {
            launch_dir: launch_dir.clone(),
            fw_id: flag(&my_spec, "_add_launchpad_and_fw_id").then_some(fw.fw_id),
            launchpad: self
                .launchpad
                .clone()
                .filter(|_| flag(&my_spec, "_add_launchpad_and_fw_id")),
            fworker: flag(&my_spec, "_add_fworker").then(|| self.fworker.clone()),
        };

        let ping_target = self.ping_target(launch_id, launch_dir);
        backgrounds.start_ping(ping_target.clone(), self.config.ping_interval());

        let background_tasks: Vec<BackgroundTask> = match my_spec.get("_background_tasks") {
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| CoreError::validation("_background_tasks", e.to_string()))?,
            None => Vec::new(),
        };
        for bt in &background_tasks {
            let tasks = bt
                .tasks
                .iter()
                .map(|t| self.registry.task(t))
                .collect::<Result<Vec<_>>>()?;
            backgrounds.start_background(bt.clone(), tasks, fw.spec.clone(), ctx.clone());
        }

        let tasks = self.registry.tasks_for(fw)?;
        let mut action = FWAction::default();
        for (n, task) in tasks.iter().enumerate().skip(starting_task) {
            let name = &fw.tasks[n].fw_name;
            info!(task = %name, "Task started: {}.", name);

            let result = match task.run_task(&my_spec, &ctx).await {
                Ok(result) => result,
                Err(e) => {
                    error!(task = %name, error = %format!("{:#}", e), "Task failed");
                    backgrounds.stop().await;
                    ping_target.ping().await;
                    let failure = FWAction {
                        exit: true,
                        ..FWAction::default()
                    }
                    .with_stored_data("_message", json!("runtime error during task"))
                    .with_stored_data("_task", serde_json::to_value(&fw.tasks[n])?)
                    .with_stored_data(
                        "_exception",
                        json!({
                            "_stacktrace": format!("{:?}", e),
                            "_details": null,
                            "_failed_task_n": n,
                        }),
                    )
                    .with_stored_data("_recovery", acc.to_value());
                    let failure = self.decorate_fwaction(failure, &my_spec, fw, launch_dir);
                    *final_state = Some(State::Fizzled);
                    return self.finish(launch_id, launch_dir, failure, State::Fizzled).await;
                }
            };

            action = match read_action_file(launch_dir).await? {
                Some(from_file) => from_file,
                None => result.unwrap_or_default(),
            };
            acc.absorb(&action);
            my_spec.extend(action.update_spec.iter().map(|(k, v)| (k.clone(), v.clone())));
            for m in &action.mod_spec {
                apply_mod(m, &mut my_spec)?;
            }
            info!(task = %name, "Task completed: {} ", name);
            if action.skip_remaining_tasks() {
                break;
            }
        }

        backgrounds.stop().await;
        ping_target.ping().await;
        for bt in background_tasks.iter().filter(|bt| bt.run_on_finish) {
            for task in &bt.tasks {
                if let Err(e) = self.registry.task(task)?.run_task(&fw.spec, &ctx).await {
                    warn!(task = %task.fw_name, error = %e, "Finishing background task failed");
                }
            }
        }

        action.stored_data = acc.stored_data;
        action.update_spec = acc.update_spec;
        action.mod_spec = acc.mod_spec;
        let action = self.decorate_fwaction(action, &my_spec, fw, launch_dir);
        *final_state = Some(State::Completed);
        self.finish(launch_id, launch_dir, action, State::Completed).await
    }

    async fn enter_launch_dir(
        &self,
        lp: &LaunchPad,
        launch_id: i64,
        launch_dir: &mut PathBuf,
        requested: &str,
    ) -> Result<()> {
        let prev_dir = launch_dir.clone();
        let target = if Path::new(requested).is_absolute() {
            PathBuf::from(requested)
        } else {
            prev_dir.join(requested)
        };
        tokio::fs::create_dir_all(&target)
            .await
            .map_err(|e| CoreError::io(&target, e))?;

        if target != prev_dir {
            lp.change_launch_dir(launch_id, &target.to_string_lossy())
                .await?;
            if self.config.remove_useless_dirs && dir_is_empty(&prev_dir).await {
                if let Err(e) = tokio::fs::remove_dir(&prev_dir).await {
                    debug!(dir = %prev_dir.display(), error = %e, "Could not remove unused launch directory");
                }
            }
        }
        *launch_dir = target;
        Ok(())
    }

    async fn copy_previous(&self, mode: Option<&str>, prev: &Path, launch_dir: &Path) -> Result<()> {
        if mode != Some("cp") || prev == launch_dir {
            return Ok(());
        }
        info!(
            from = %prev.display(),
            to = %launch_dir.display(),
            "Copying data from recovery folder {} to folder {}.",
            prev.display(),
            launch_dir.display()
        );
        copy_tree(prev, launch_dir).await
    }

    fn ping_target(&self, launch_id: Option<i64>, launch_dir: &Path) -> PingTarget {
        match (&self.launchpad, launch_id) {
            (Some(lp), Some(launch_id)) => PingTarget::Online {
                launchpad: lp.clone(),
                launch_id,
            },
            _ => PingTarget::Offline {
                launch_dir: launch_dir.to_path_buf(),
            },
        }
    }

    /// Add job info and worker pinning when the firework asks for them.
    pub fn decorate_fwaction(
        &self,
        mut action: FWAction,
        spec: &Map<String, Value>,
        fw: &Firework,
        launch_dir: &Path,
    ) -> FWAction {
        if flag(spec, "_pass_job_info") {
            let mut job_info = match spec.get("_job_info") {
                Some(Value::Array(items)) => items.clone(),
                _ => Vec::new(),
            };
            job_info.push(json!({
                "fw_id": fw.fw_id,
                "name": fw.name,
                "launch_dir": launch_dir.to_string_lossy(),
            }));
            action
                .mod_spec
                .push(json!({"_push_all": {"_job_info": job_info}}));
        }
        if flag(spec, "_preserve_fworker") {
            action
                .update_spec
                .insert("_fworker".into(), json!(self.fworker.name));
        }
        action
    }

    async fn finish(
        &self,
        launch_id: Option<i64>,
        launch_dir: &Path,
        action: FWAction,
        state: State,
    ) -> Result<()> {
        match (&self.launchpad, launch_id) {
            (Some(lp), Some(launch_id)) => {
                lp.complete_launch(launch_id, Some(action), state).await?;
            }
            _ => {
                let mut data = offline::read_offline(launch_dir).await?;
                data.fwaction = Some(action);
                data.state = Some(state);
                data.completed_on = Some(Utc::now());
                offline::write_offline(launch_dir, &data).await?;
            }
        }
        Ok(())
    }

    async fn fizzle_after_error(
        &self,
        fw: &Firework,
        launch_id: Option<i64>,
        launch_dir: &Path,
        cause: &CoreError,
    ) -> Result<()> {
        if let (Some(lp), Some(id)) = (&self.launchpad, launch_id) {
            if let Err(e) = lp.restore_backup_data(id, fw.fw_id).await {
                warn!(launch_id = id, error = %e, "Could not restore checkout backup");
            }
        }
        self.ping_target(launch_id, launch_dir).ping().await;

        let action = FWAction {
            exit: true,
            ..FWAction::default()
        }
        .with_stored_data("_message", json!("runtime error during task"))
        .with_stored_data("_task", Value::Null)
        .with_stored_data(
            "_exception",
            json!({"_stacktrace": cause.to_string(), "_details": null}),
        );
        let action = self.decorate_fwaction(action, &fw.spec, fw, launch_dir);

        match self.finish(launch_id, launch_dir, action, State::Fizzled).await {
            Err(e @ CoreError::LockedWorkflow { .. }) => {
                warn!(
                    fw_id = fw.fw_id,
                    error = %e,
                    "Firework {} fizzled but couldn't complete the update of the database. \
                     Refresh the WF to recover the result.",
                    fw.fw_id
                );
                Ok(())
            }
            other => other,
        }
    }
}

fn flag(spec: &Map<String, Value>, key: &str) -> bool {
    spec.get(key).and_then(Value::as_bool).unwrap_or(false)
}

async fn resolve_ip(host: &str) -> Option<String> {
    let mut addrs = tokio::net::lookup_host((host, 0)).await.ok()?;
    addrs.next().map(|addr| addr.ip().to_string())
}

async fn read_action_file(launch_dir: &Path) -> Result<Option<FWAction>> {
    let path = launch_dir.join(ACTION_FILE);
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Ok(None);
    }
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| CoreError::io(&path, e))?;
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| CoreError::deserialization(ACTION_FILE, e))
}

async fn dir_is_empty(dir: &Path) -> bool {
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
        Err(_) => false,
    }
}

async fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    let mut pending = vec![(src.to_path_buf(), dst.to_path_buf())];
    while let Some((from, to)) = pending.pop() {
        tokio::fs::create_dir_all(&to)
            .await
            .map_err(|e| CoreError::io(&to, e))?;
        let mut entries = tokio::fs::read_dir(&from)
            .await
            .map_err(|e| CoreError::io(&from, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CoreError::io(&from, e))?
        {
            let target = to.join(entry.file_name());
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| CoreError::io(entry.path(), e))?;
            if file_type.is_dir() {
                pending.push((entry.path(), target));
            } else {
                tokio::fs::copy(entry.path(), &target)
                    .await
                    .map_err(|e| CoreError::io(&target, e))?;
            }
        }
    }
    Ok(())
}
