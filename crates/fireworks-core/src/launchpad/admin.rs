// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Administrative operations on fireworks and workflows.
//!
//! Every state change happens inside [`LaunchPad::modify_wf`], so the workflow lock is
//! held while the in-memory workflow is changed and written back.
//!
//! | From \ Op | rerun | defuse | pause | reignite | resume |
//! |-----------|-------|--------|-------|----------|--------|
//! | WAITING   | skip  | yes    | yes   |          |        |
//! | READY     | yes   | yes    | yes   |          |        |
//! | RESERVED  | yes   | rerun, then defuse | cancel, then pause | | |
//! | RUNNING   | yes   |        |       |          |        |
//! | COMPLETED | yes   |        |       |          |        |
//! | FIZZLED   | yes   | yes    |       |          |        |
//! | PAUSED    | yes   | yes    |       |          | yes    |
//! | DEFUSED   | skip  | yes    |       | yes      |        |
//! | ARCHIVED  | skip  |        |       |          |        |

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument, warn};

use super::LaunchPad;
use crate::error::{CoreError, Result};
use crate::model::State;
use crate::workflow::dict_mods::apply_mod;

/// Which launch a rerun recovers from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverLaunch {
    /// The firework's most recent launch.
    Last,
    /// A specific launch.
    Id(i64),
}

/// How a recovered run treats the previous launch directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoverMode {
    /// Run again inside the previous directory.
    PrevDir,
    /// Copy the previous directory into the new one.
    Cp,
}

impl RecoverMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PrevDir => "prev_dir",
            Self::Cp => "cp",
        }
    }
}

/// Recovery request attached to a rerun.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recovery {
    pub launch: RecoverLaunch,
    pub mode: Option<RecoverMode>,
}

impl Recovery {
    pub fn new(launch: RecoverLaunch, mode: Option<RecoverMode>) -> Self {
        Self { launch, mode }
    }
}

/// Spec edits written together with a rerun.
#[derive(Debug, Default)]
struct SpecPatch {
    set: Map<String, Value>,
    unset: Vec<&'static str>,
}

const DEFUSABLE: [State; 5] = [
    State::Defused,
    State::Waiting,
    State::Ready,
    State::Fizzled,
    State::Paused,
];
const PAUSABLE: [State; 3] = [State::Waiting, State::Ready, State::Reserved];
const SPEC_EDITABLE: [State; 4] = [State::Ready, State::Waiting, State::Fizzled, State::Defused];

fn invalid(fw_id: i64, operation: &'static str, state: State) -> CoreError {
    CoreError::InvalidState {
        fw_id,
        operation,
        actual: state.to_string(),
    }
}

impl LaunchPad {
    /// Send `fw_id` and its finished descendants back to WAITING.
    ///
    /// With `rerun_duplicates`, fireworks sharing a launch with a dupefinder-enabled
    /// `fw_id` are rerun too. Returns every rerun id.
    #[instrument(skip(self, recovery))]
    pub async fn rerun_fw(
        &self,
        fw_id: i64,
        rerun_duplicates: bool,
        recovery: Option<Recovery>,
    ) -> Result<Vec<i64>> {
        let duplicates = if rerun_duplicates {
            self.duplicate_ids(fw_id).await?
        } else {
            Vec::new()
        };

        let mut reruns = Vec::new();
        if self.rerun_single(fw_id, recovery).await? {
            reruns.push(fw_id);
        }
        for dup in duplicates {
            info!(fw_id = dup, "Also rerunning duplicate fw_id: {}", dup);
            if self.rerun_single(dup, recovery).await? {
                reruns.push(dup);
            }
        }
        Ok(reruns)
    }

    /// Rerun only when the launch failed inside a task, and make the next run resume at
    /// the failed task.
    ///
    /// Defaults to the firework's last launch. Returns the rerun ids, empty when the
    /// launch recorded no failed task.
    #[instrument(skip(self))]
    pub async fn rerun_fws_task_level(
        &self,
        fw_id: i64,
        rerun_duplicates: bool,
        launch_id: Option<i64>,
        recover_mode: Option<RecoverMode>,
    ) -> Result<Vec<i64>> {
        let fw = self.get_fw(fw_id).await?;
        let launch = match launch_id {
            Some(id) => self.get_launch(id).await?,
            None => fw
                .launches
                .last()
                .cloned()
                .ok_or_else(|| CoreError::validation("launch_id", format!("fw_id {} has no launch", fw_id)))?,
        };

        let failed = launch
            .action
            .as_ref()
            .and_then(|a| a.stored_data.get("_exception"))
            .and_then(|e| e.get("_failed_task_n"))
            .is_some_and(|n| !n.is_null());
        if !failed {
            info!(fw_id, launch_id = launch.launch_id, "No failed task recorded, not rerunning");
            return Ok(Vec::new());
        }

        let mut patch = SpecPatch::default();
        patch.set.insert(
            "_recover_launch".into(),
            json!({"_launch_id": launch.launch_id, "_recover_mode": recover_mode}),
        );
        if recover_mode == Some(RecoverMode::PrevDir) {
            patch.set.insert("_launch_dir".into(), json!(launch.launch_dir));
        }
        patch.unset.push("_recovery");

        let duplicates = if rerun_duplicates {
            self.duplicate_ids(fw_id).await?
        } else {
            Vec::new()
        };
        let mut reruns = Vec::new();
        if self.rerun_patched(fw_id, false, patch).await? {
            reruns.push(fw_id);
        }
        for dup in duplicates {
            if self.rerun_single(dup, None).await? {
                reruns.push(dup);
            }
        }
        Ok(reruns)
    }

    /// Fireworks sharing a launch with `fw_id`, when `fw_id` has a dupefinder.
    async fn duplicate_ids(&self, fw_id: i64) -> Result<Vec<i64>> {
        let fw = self.get_fw(fw_id).await?;
        if !fw.spec.contains_key("_dupefinder") {
            return Ok(Vec::new());
        }
        let mut ids = BTreeSet::new();
        for launch_id in fw.launch_ids() {
            ids.extend(self.store.fw_ids_holding_launch(launch_id, false).await?);
        }
        ids.remove(&fw_id);
        Ok(ids.into_iter().collect())
    }

    async fn rerun_single(&self, fw_id: i64, recovery: Option<Recovery>) -> Result<bool> {
        let mut patch = SpecPatch::default();
        match recovery {
            Some(recovery) => {
                let mut doc = self.get_recovery(fw_id, recovery.launch).await?;
                doc.insert("_mode".into(), json!(recovery.mode));
                if recovery.mode == Some(RecoverMode::PrevDir) {
                    if let Some(dir) = doc.get("_prev_dir").cloned() {
                        patch.set.insert("_launch_dir".into(), dir);
                    }
                }
                patch.set.insert("_recovery".into(), Value::Object(doc));
            }
            None => patch.unset.push("_recovery"),
        }
        self.rerun_patched(fw_id, recovery.is_some(), patch).await
    }

    async fn rerun_patched(&self, fw_id: i64, force: bool, patch: SpecPatch) -> Result<bool> {
        let state = self.fw_state(fw_id).await?;
        match state {
            State::Archived | State::Defused => {
                info!(fw_id, state = %state, "Cannot rerun fw_id: {}: it is {}.", fw_id, state);
                return Ok(false);
            }
            State::Waiting if !force => {
                debug!(fw_id, "Skipping rerun fw_id: {}: it is already WAITING.", fw_id);
                return Ok(false);
            }
            _ => {}
        }

        let except_details = self.config.except_details_on_rerun;
        self.modify_wf(fw_id, |wf| {
            let mut updated = wf.rerun_fw(fw_id, except_details)?;
            let fw = wf.fw_mut(fw_id)?;
            for key in &patch.unset {
                fw.spec.remove(*key);
            }
            fw.spec.extend(patch.set);
            updated.insert(fw_id);
            Ok(((), updated))
        })
        .await?;
        info!(fw_id, "Rerun firework");
        Ok(true)
    }

    /// Stop `fw_id` and its descendants from running until reignited.
    #[instrument(skip(self))]
    pub async fn defuse_fw(&self, fw_id: i64, rerun_duplicates: bool) -> Result<()> {
        let state = self.fw_state(fw_id).await?;
        match state {
            State::Running | State::Completed | State::Archived => {
                return Err(invalid(fw_id, "defuse", state));
            }
            State::Reserved => {
                self.rerun_fw(fw_id, rerun_duplicates, None).await?;
            }
            _ => {}
        }
        self.modify_wf(fw_id, |wf| {
            let state = wf.fw(fw_id).map(|fw| fw.state).unwrap_or(State::Waiting);
            if !DEFUSABLE.contains(&state) {
                return Err(invalid(fw_id, "defuse", state));
            }
            Ok(((), wf.hold_fw(fw_id, State::Defused)?))
        })
        .await?;
        info!(fw_id, "Defused firework");
        Ok(())
    }

    /// Undo [`LaunchPad::defuse_fw`].
    #[instrument(skip(self))]
    pub async fn reignite_fw(&self, fw_id: i64) -> Result<()> {
        self.release(fw_id, State::Defused, "reignite").await
    }

    /// Hold a firework that has not started yet. A reservation is cancelled first.
    #[instrument(skip(self))]
    pub async fn pause_fw(&self, fw_id: i64) -> Result<()> {
        let state = self.fw_state(fw_id).await?;
        if !PAUSABLE.contains(&state) {
            return Err(invalid(fw_id, "pause", state));
        }
        if state == State::Reserved {
            let fw = self.get_fw(fw_id).await?;
            for launch in fw.launches.iter().filter(|l| l.state() == State::Reserved) {
                self.cancel_reservation(launch.launch_id).await?;
            }
        }
        self.modify_wf(fw_id, |wf| {
            let state = wf.fw(fw_id).map(|fw| fw.state).unwrap_or(State::Waiting);
            if !matches!(state, State::Waiting | State::Ready) {
                return Err(invalid(fw_id, "pause", state));
            }
            Ok(((), wf.hold_fw(fw_id, State::Paused)?))
        })
        .await?;
        info!(fw_id, "Paused firework");
        Ok(())
    }

    /// Undo [`LaunchPad::pause_fw`].
    #[instrument(skip(self))]
    pub async fn resume_fw(&self, fw_id: i64) -> Result<()> {
        self.release(fw_id, State::Paused, "resume").await
    }

    async fn release(&self, fw_id: i64, held: State, operation: &'static str) -> Result<()> {
        self.modify_wf(fw_id, |wf| {
            let state = wf.fw(fw_id).map(|fw| fw.state).unwrap_or(State::Waiting);
            if state != held {
                return Err(invalid(fw_id, operation, state));
            }
            Ok(((), wf.release_fw(fw_id, held)?))
        })
        .await?;
        info!(fw_id, "{} firework", operation);
        Ok(())
    }

    /// Defuse every unit of the workflow holding `fw_id`. COMPLETED units are left
    /// alone; FIZZLED units are only defused with `defuse_all_states`.
    #[instrument(skip(self))]
    pub async fn defuse_wf(&self, fw_id: i64, defuse_all_states: bool) -> Result<()> {
        for id in self.wf_member_ids(fw_id).await? {
            let state = self.fw_state(id).await?;
            if (state == State::Fizzled && !defuse_all_states)
                || matches!(
                    state,
                    State::Running | State::Completed | State::Archived | State::Defused
                )
            {
                continue;
            }
            self.defuse_fw(id, true).await?;
        }
        Ok(())
    }

    /// Pause every unit of the workflow that has not started.
    #[instrument(skip(self))]
    pub async fn pause_wf(&self, fw_id: i64) -> Result<()> {
        for id in self.wf_member_ids(fw_id).await? {
            if PAUSABLE.contains(&self.fw_state(id).await?) {
                self.pause_fw(id).await?;
            }
        }
        Ok(())
    }

    /// Reignite every DEFUSED unit of the workflow.
    #[instrument(skip(self))]
    pub async fn reignite_wf(&self, fw_id: i64) -> Result<()> {
        for id in self.wf_member_ids(fw_id).await? {
            if self.fw_state(id).await? == State::Defused {
                self.reignite_fw(id).await?;
            }
        }
        Ok(())
    }

    async fn wf_member_ids(&self, fw_id: i64) -> Result<Vec<i64>> {
        let record = self
            .store
            .get_workflow_record(fw_id)
            .await?
            .ok_or(CoreError::WorkflowNotFound { fw_id })?;
        Ok(record.nodes())
    }

    /// Rerun every unit of the workflow, then archive all of them.
    #[instrument(skip(self))]
    pub async fn archive_wf(&self, fw_id: i64) -> Result<()> {
        let record = self
            .store
            .get_workflow_record(fw_id)
            .await?
            .ok_or(CoreError::WorkflowNotFound { fw_id })?;
        if record.state == State::Archived {
            debug!(fw_id, "Workflow already ARCHIVED");
            return Ok(());
        }
        for id in record.nodes() {
            self.rerun_fw(id, true, None).await?;
        }
        self.modify_wf(fw_id, |wf| Ok(((), wf.archive_all()?)))
            .await?;
        info!(fw_id, "Archived workflow");
        Ok(())
    }

    /// Remove a workflow, its fireworks and the launches nobody else holds.
    #[instrument(skip(self))]
    pub async fn delete_wf(&self, fw_id: i64, delete_launch_dirs: bool) -> Result<()> {
        let lock = self.lock(fw_id).await?;
        let result = self.delete_locked(fw_id, delete_launch_dirs).await;
        let released = lock.release().await;
        result?;
        released
    }

    async fn delete_locked(&self, fw_id: i64, delete_launch_dirs: bool) -> Result<()> {
        let wf = self.load_wf(fw_id).await?;
        let fw_ids = wf.fw_ids();
        let members: HashSet<i64> = fw_ids.iter().copied().collect();

        let mut launch_ids = BTreeSet::new();
        let mut launch_dirs = Vec::new();
        for fw in wf.fws() {
            for launch in fw.launches.iter().chain(fw.archived_launches.iter()) {
                if launch_ids.contains(&launch.launch_id) {
                    continue;
                }
                let holders = self
                    .store
                    .fw_ids_holding_launch(launch.launch_id, true)
                    .await?;
                if holders.iter().all(|h| members.contains(h)) {
                    launch_ids.insert(launch.launch_id);
                    launch_dirs.push(launch.launch_dir.clone());
                }
            }
        }

        let launch_ids: Vec<i64> = launch_ids.into_iter().collect();
        self.store.delete_workflow(&fw_ids, &launch_ids).await?;
        info!(fw_id, fws = fw_ids.len(), launches = launch_ids.len(), "Deleted workflow");

        if delete_launch_dirs {
            for dir in launch_dirs {
                let path = Path::new(&dir);
                if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                    continue;
                }
                debug!(dir = %dir, "Deleting launch directory");
                if let Err(e) = tokio::fs::remove_dir_all(path).await {
                    warn!(dir = %dir, error = %e, "Failed to delete launch directory");
                }
            }
        }
        Ok(())
    }

    /// Set `spec._priority`.
    #[instrument(skip(self))]
    pub async fn set_priority(&self, fw_id: i64, priority: i64) -> Result<()> {
        self.modify_wf(fw_id, |wf| {
            wf.fw_mut(fw_id)?
                .spec
                .insert("_priority".into(), json!(priority));
            Ok(((), BTreeSet::from([fw_id])))
        })
        .await?;
        Ok(())
    }

    /// Set spec keys (`->` paths allowed) on fireworks that have not started or that
    /// ended unsuccessfully. Other fireworks are skipped. Returns the updated ids.
    #[instrument(skip(self, spec_document))]
    pub async fn update_spec(
        &self,
        fw_ids: &[i64],
        spec_document: &Map<String, Value>,
    ) -> Result<Vec<i64>> {
        let modification = json!({ "_set": spec_document });
        let mut updated = Vec::new();
        for &fw_id in fw_ids {
            let (changed, _) = self
                .modify_wf(fw_id, |wf| {
                    let fw = wf.fw_mut(fw_id)?;
                    if !SPEC_EDITABLE.contains(&fw.state) {
                        warn!(
                            fw_id,
                            state = %fw.state,
                            "Cannot update spec of fw_id: {} with state: {}. Try rerunning first.",
                            fw_id,
                            fw.state
                        );
                        return Ok((false, BTreeSet::new()));
                    }
                    apply_mod(&modification, &mut fw.spec)?;
                    Ok((true, BTreeSet::from([fw_id])))
                })
                .await?;
            if changed {
                updated.push(fw_id);
            }
        }
        Ok(updated)
    }
}
