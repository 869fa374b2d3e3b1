// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Completion, heartbeats and checkout backups.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::LaunchPad;
use crate::error::{CoreError, Result};
use crate::model::{FWAction, Launch, State};

impl LaunchPad {
    /// Record the end of a launch and refresh every workflow holding it.
    ///
    /// Completing a launch that already ended is a no-op; the stored launch is returned.
    #[instrument(skip(self, action), fields(state = %state))]
    pub async fn complete_launch(
        &self,
        launch_id: i64,
        action: Option<FWAction>,
        state: State,
    ) -> Result<Launch> {
        let mut launch = self.get_launch(launch_id).await?;
        self.drop_backup(launch_id, launch.fw_id).await;
        if matches!(launch.state(), State::Completed | State::Fizzled) {
            warn!(
                launch_id,
                current = %launch.state(),
                "Launch already finished, ignoring completion"
            );
            return Ok(launch);
        }

        launch.set_state(state);
        if action.is_some() {
            launch.action = action;
        }
        self.save_launch(&launch).await?;

        for fw_id in self.store.fw_ids_holding_launch(launch_id, false).await? {
            self.refresh_wf(fw_id).await?;
        }
        info!(launch_id, fw_id = launch.fw_id, "Launch {}", state);
        Ok(launch)
    }

    /// Fizzle a launch without an action.
    pub async fn mark_fizzled(&self, launch_id: i64) -> Result<Launch> {
        self.complete_launch(launch_id, None, State::Fizzled).await
    }

    /// Heartbeat a RUNNING launch: re-read its trackers and touch its history.
    ///
    /// Launches in any other state are left alone.
    pub async fn ping_launch(
        &self,
        launch_id: i64,
        ptime: Option<DateTime<Utc>>,
        checkpoint: Option<Value>,
    ) -> Result<()> {
        let mut launch = self.get_launch(launch_id).await?;
        if launch.state() != State::Running {
            debug!(launch_id, state = %launch.state(), "Ignoring ping of a launch that is not RUNNING");
            return Ok(());
        }

        let dir = Path::new(&launch.launch_dir).to_path_buf();
        for tracker in launch.trackers.iter_mut() {
            tracker.track_file(Some(&dir)).await?;
        }
        launch.touch_history(ptime, checkpoint);
        self.save_launch(&launch).await
    }

    /// Point a launch at a different directory.
    pub async fn change_launch_dir(&self, launch_id: i64, launch_dir: &str) -> Result<()> {
        let mut launch = self.get_launch(launch_id).await?;
        launch.launch_dir = launch_dir.to_string();
        self.save_launch(&launch).await
    }

    /// Rewrite a launch and its firework from the snapshots taken at checkout.
    pub async fn restore_backup_data(&self, launch_id: i64, fw_id: i64) -> Result<()> {
        let backups = self.backups.lock().await;
        let launch = backups
            .launches
            .get(&launch_id)
            .cloned()
            .ok_or(CoreError::LaunchNotFound { launch_id })?;
        let fw = backups
            .fws
            .get(&fw_id)
            .cloned()
            .ok_or(CoreError::FireworkNotFound { fw_id })?;
        drop(backups);

        self.save_launch(&launch).await?;
        self.store.put_firework(&fw).await?;
        warn!(launch_id, fw_id, "Restored launch and firework from checkout backup");
        Ok(())
    }

    async fn drop_backup(&self, launch_id: i64, fw_id: i64) {
        let mut backups = self.backups.lock().await;
        backups.launches.remove(&launch_id);
        backups.fws.remove(&fw_id);
    }

    /// Whether checkout snapshots are still held for `launch_id`.
    pub async fn has_backup(&self, launch_id: i64) -> bool {
        self.backups.lock().await.launches.contains_key(&launch_id)
    }
}
