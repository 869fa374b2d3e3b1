// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Registration and recovery of offline launches.

use std::path::Path;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, error, info, instrument};

use super::LaunchPad;
use crate::error::Result;
use crate::model::{FWAction, State};
use crate::offline;
use crate::store::OfflineRun;

impl LaunchPad {
    /// Track a launch that will report through files instead of the database.
    pub async fn add_offline_run(&self, launch_id: i64, fw_id: i64, name: &str) -> Result<()> {
        let now = Utc::now();
        self.store
            .insert_offline_run(&OfflineRun {
                launch_id,
                fw_id,
                name: name.to_string(),
                created_on: now,
                updated_on: now,
                deprecated: false,
                completed: false,
            })
            .await?;
        debug!(launch_id, fw_id, "Registered offline run");
        Ok(())
    }

    /// Fold the files of an offline launch back into the database.
    ///
    /// Returns `None` on success. On failure returns the firework id; unless
    /// `ignore_errors` is set the launch is fizzled and its run closed.
    #[instrument(skip(self))]
    pub async fn recover_offline(
        &self,
        launch_id: i64,
        ignore_errors: bool,
        print_errors: bool,
    ) -> Result<Option<i64>> {
        let launch = self.get_launch(launch_id).await?;
        let fw_id = launch.fw_id;

        let Err(e) = self.apply_offline_files(launch_id).await else {
            self.store.update_offline_run(launch_id, None, None).await?;
            return Ok(None);
        };

        if print_errors {
            error!(launch_id, error = %e, "failed recovering launch_id {}", launch_id);
        }
        if !ignore_errors {
            let action = FWAction {
                exit: true,
                ..FWAction::default()
            }
            .with_stored_data("_message", json!("runtime error during task"))
            .with_stored_data("_task", Value::Null)
            .with_stored_data(
                "_exception",
                json!({"_stacktrace": e.to_string(), "_details": null}),
            );
            self.complete_launch(launch_id, Some(action), State::Fizzled)
                .await?;
            self.store
                .update_offline_run(launch_id, Some(true), None)
                .await?;
        }
        Ok(Some(fw_id))
    }

    async fn apply_offline_files(&self, launch_id: i64) -> Result<()> {
        let mut launch = self.get_launch(launch_id).await?;
        let dir = Path::new(&launch.launch_dir).to_path_buf();
        let ping = offline::read_ping(&dir).await?;
        let data = offline::read_offline(&dir).await?;

        if let Some(started_on) = data.started_on {
            let mut already_running = false;
            for entry in launch.state_history_mut() {
                if entry.state == State::Running {
                    entry.created_on = started_on;
                    entry.updated_on = entry.updated_on.max(started_on);
                    already_running = true;
                }
            }
            if !already_running {
                launch.set_state_at(State::Running, started_on);
            }
            launch.touch_history(ping.map(|p| p.ping_time), data.checkpoint.clone());
            self.save_launch(&launch).await?;
            for holder in self.store.fw_ids_holding_launch(launch_id, false).await? {
                self.refresh_wf(holder).await?;
            }
        } else if let Some(ping) = ping {
            self.ping_launch(launch_id, Some(ping.ping_time), data.checkpoint.clone())
                .await?;
        }

        if let (Some(action), Some(state)) = (data.fwaction, data.state) {
            let mut launch = self.complete_launch(launch_id, Some(action), state).await?;
            if let Some(completed_on) = data.completed_on {
                for entry in launch.state_history_mut() {
                    if entry.state == state {
                        entry.created_on = completed_on;
                        entry.updated_on = completed_on;
                    }
                }
                self.save_launch(&launch).await?;
            }
            self.store
                .update_offline_run(launch_id, Some(true), None)
                .await?;
            info!(launch_id, state = %state, "Recovered offline launch");
        }
        Ok(())
    }

    /// Exclude offline runs from recovery, by launch id or, without `launch_mode`, by
    /// firework id.
    pub async fn forget_offline(&self, id: i64, launch_mode: bool) -> Result<()> {
        if launch_mode {
            self.store.update_offline_run(id, None, Some(true)).await?;
        } else {
            self.store.deprecate_offline_runs_for_fw(id).await?;
        }
        info!(id, launch_mode, "Forgot offline run");
        Ok(())
    }

    /// Offline runs not deprecated, optionally including completed ones.
    pub async fn get_offline_runs(&self, include_completed: bool) -> Result<Vec<OfflineRun>> {
        self.store.list_offline_runs(include_completed).await
    }

    /// Recover every open offline run. Returns the firework ids that failed.
    pub async fn recover_offline_all(&self, ignore_errors: bool, print_errors: bool) -> Result<Vec<i64>> {
        let mut failed = Vec::new();
        for run in self.get_offline_runs(false).await? {
            if let Some(fw_id) = self
                .recover_offline(run.launch_id, ignore_errors, print_errors)
                .await?
            {
                failed.push(fw_id);
            }
        }
        Ok(failed)
    }
}
