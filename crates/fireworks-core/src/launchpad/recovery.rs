// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Detection of lost runs and stale reservations, and reservation bookkeeping.

use std::collections::BTreeSet;

use chrono::{Duration, Utc};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::LaunchPad;
use crate::config::Config;
use crate::error::Result;
use crate::filter;
use crate::model::State;

/// Knobs of [`LaunchPad::detect_lostruns`].
#[derive(Debug, Clone, PartialEq)]
pub struct LostRunOptions {
    /// RUNNING launches silent for this long are lost.
    pub expiration_secs: u64,
    /// Mark lost launches FIZZLED.
    pub fizzle: bool,
    /// Fizzle lost launches and rerun lost fireworks.
    pub rerun: bool,
    /// Only launches that ran at most this long (seconds, start to last ping).
    pub max_runtime: Option<f64>,
    /// Only launches that ran at least this long.
    pub min_runtime: Option<f64>,
    /// Refresh inconsistent fireworks.
    pub refresh: bool,
    /// Filter over firework documents.
    pub query: Option<Value>,
    /// Filter over launch documents.
    pub launch_query: Option<Value>,
}

impl LostRunOptions {
    /// Detection only, with the configured run expiration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            expiration_secs: config.run_expiration_secs,
            fizzle: false,
            rerun: false,
            max_runtime: None,
            min_runtime: None,
            refresh: false,
            query: None,
            launch_query: None,
        }
    }

    pub fn with_expiration(mut self, secs: u64) -> Self {
        self.expiration_secs = secs;
        self
    }

    pub fn fizzle(mut self) -> Self {
        self.fizzle = true;
        self
    }

    pub fn rerun(mut self) -> Self {
        self.rerun = true;
        self
    }

    pub fn refresh(mut self) -> Self {
        self.refresh = true;
        self
    }
}

impl Default for LostRunOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Result of [`LaunchPad::detect_lostruns`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LostRuns {
    pub lost_launch_ids: Vec<i64>,
    pub lost_fw_ids: Vec<i64>,
    /// RUNNING fireworks holding a launch that already ended.
    pub inconsistent_fw_ids: Vec<i64>,
}

impl LostRuns {
    pub fn is_empty(&self) -> bool {
        self.lost_launch_ids.is_empty()
            && self.lost_fw_ids.is_empty()
            && self.inconsistent_fw_ids.is_empty()
    }
}

impl LaunchPad {
    /// Find RUNNING launches that stopped pinging, and the fireworks they leave stranded.
    #[instrument(skip(self, opts), fields(expiration_secs = opts.expiration_secs))]
    pub async fn detect_lostruns(&self, opts: &LostRunOptions) -> Result<LostRuns> {
        let cutoff = Utc::now() - Duration::seconds(opts.expiration_secs as i64);

        let scope = match &opts.query {
            Some(query) => Some(self.matching_fw_ids(None, query).await?),
            None => None,
        };

        let mut lost_launch_ids = Vec::new();
        let mut candidate_fw_ids = BTreeSet::new();
        for launch in self
            .store
            .find_launches(Some(State::Running), Some(cutoff))
            .await?
        {
            if scope.as_ref().is_some_and(|ids| !ids.contains(&launch.fw_id)) {
                continue;
            }
            if let Some(query) = &opts.launch_query {
                if !filter::matches(&serde_json::to_value(&launch)?, query)? {
                    continue;
                }
            }
            if opts.max_runtime.is_some() || opts.min_runtime.is_some() {
                let (Some(start), Some(ping)) = (launch.time_start(), launch.last_pinged()) else {
                    continue;
                };
                let ran = (ping - start).num_milliseconds() as f64 / 1000.0;
                if opts.min_runtime.is_some_and(|min| ran < min)
                    || opts.max_runtime.is_some_and(|max| ran > max)
                {
                    continue;
                }
            }
            lost_launch_ids.push(launch.launch_id);
            candidate_fw_ids.insert(launch.fw_id);
        }

        let mut lost_fw_ids = Vec::new();
        for fw_id in candidate_fw_ids {
            let Some(fw) = self.store.get_firework(fw_id).await? else {
                continue;
            };
            if fw.state != State::Running {
                continue;
            }
            let stranded = fw.launches.iter().all(|l| {
                lost_launch_ids.contains(&l.launch_id) || l.state().rank() <= State::Fizzled.rank()
            });
            if stranded {
                lost_fw_ids.push(fw_id);
            }
        }

        if opts.fizzle || opts.rerun {
            for &launch_id in &lost_launch_ids {
                self.mark_fizzled(launch_id).await?;
                if let Some(run) = self.store.get_offline_run(launch_id).await? {
                    if !run.deprecated {
                        self.forget_offline(launch_id, true).await?;
                    }
                }
            }
        }
        if opts.rerun {
            for &fw_id in &lost_fw_ids {
                self.rerun_fw(fw_id, true, None).await?;
            }
        }

        let mut inconsistent_fw_ids = Vec::new();
        for row in self
            .store
            .find_fireworks(Some(&[State::Running][..]), self.config.sort_fws)
            .await?
        {
            if scope.as_ref().is_some_and(|ids| !ids.contains(&row.fw_id)) {
                continue;
            }
            let Some(fw) = self.store.get_firework(row.fw_id).await? else {
                continue;
            };
            let ended = fw
                .launches
                .iter()
                .any(|l| matches!(l.state(), State::Fizzled | State::Completed));
            if !ended {
                continue;
            }
            inconsistent_fw_ids.push(fw.fw_id);
            if opts.refresh {
                self.refresh_wf(fw.fw_id).await?;
            }
        }
        inconsistent_fw_ids.sort_unstable();

        let found = LostRuns {
            lost_launch_ids,
            lost_fw_ids,
            inconsistent_fw_ids,
        };
        if !found.is_empty() {
            info!(
                lost_launches = ?found.lost_launch_ids,
                lost_fws = ?found.lost_fw_ids,
                inconsistent = ?found.inconsistent_fw_ids,
                "Detected lost runs"
            );
        }
        Ok(found)
    }

    /// Find RESERVED launches whose reservation went stale while the firework still waits
    /// on it. With `rerun`, the reservations are cancelled.
    #[instrument(skip(self))]
    pub async fn detect_unreserved(&self, expiration_secs: u64, rerun: bool) -> Result<Vec<i64>> {
        let cutoff = Utc::now() - Duration::seconds(expiration_secs as i64);
        let mut stale = Vec::new();
        for launch in self
            .store
            .find_launches(Some(State::Reserved), Some(cutoff))
            .await?
        {
            let still_reserved = self
                .store
                .firework_heads(&[launch.fw_id])
                .await?
                .first()
                .is_some_and(|head| head.state == State::Reserved);
            if still_reserved {
                stale.push(launch.launch_id);
            }
        }

        if rerun {
            for &launch_id in &stale {
                self.cancel_reservation(launch_id).await?;
            }
        }
        if !stale.is_empty() {
            info!(launches = ?stale, "Detected stale reservations");
        }
        Ok(stale)
    }

    /// Return a RESERVED launch to READY and rerun the fireworks still reserved on it.
    #[instrument(skip(self))]
    pub async fn cancel_reservation(&self, launch_id: i64) -> Result<()> {
        let mut launch = self.get_launch(launch_id).await?;
        if launch.state() != State::Reserved {
            debug!(launch_id, state = %launch.state(), "Launch is not RESERVED");
            return Ok(());
        }
        launch.set_state(State::Ready);
        self.save_launch(&launch).await?;

        for fw_id in self.store.fw_ids_holding_launch(launch_id, false).await? {
            if self.get_fw(fw_id).await?.state == State::Reserved {
                self.rerun_fw(fw_id, false, None).await?;
            }
        }
        info!(launch_id, "Cancelled reservation");
        Ok(())
    }

    /// Record the queue id of a reservation.
    pub async fn set_reservation_id(&self, launch_id: i64, reservation_id: &str) -> Result<()> {
        let mut launch = self.get_launch(launch_id).await?;
        launch.set_reservation_id(reservation_id);
        self.save_launch(&launch).await
    }

    /// Fireworks whose launch carries `reservation_id`.
    pub async fn get_fw_ids_from_reservation_id(&self, reservation_id: &str) -> Result<Vec<i64>> {
        let mut fw_ids = BTreeSet::new();
        for launch_id in self.store.launch_ids_by_reservation(reservation_id).await? {
            fw_ids.extend(self.store.fw_ids_holding_launch(launch_id, false).await?);
        }
        Ok(fw_ids.into_iter().collect())
    }

    /// Queue id of the first reserved launch of `fw_id`.
    pub async fn get_reservation_id_from_fw_id(&self, fw_id: i64) -> Result<Option<String>> {
        let fw = self.get_fw(fw_id).await?;
        Ok(fw
            .launches
            .iter()
            .find_map(|l| l.reservation_id().map(str::to_string)))
    }

    /// [`LaunchPad::cancel_reservation`] by queue id.
    pub async fn cancel_reservation_by_reservation_id(&self, reservation_id: &str) -> Result<()> {
        for launch_id in self.store.launch_ids_by_reservation(reservation_id).await? {
            if self.get_launch(launch_id).await?.state() == State::Reserved {
                return self.cancel_reservation(launch_id).await;
            }
        }
        warn!(reservation_id, "Can't find any reserved jobs with reservation id: {}", reservation_id);
        Ok(())
    }
}
