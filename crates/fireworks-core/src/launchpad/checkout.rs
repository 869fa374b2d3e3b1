// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Atomic checkout of READY fireworks.
//!
//! Candidates are read in priority order and claimed one by one with a
//! compare-and-set on `(fw_id, state)`; a worker that loses the race simply moves on
//! to the next candidate. Claimed fireworks whose document cannot be used are fizzled
//! in place so they stop blocking the queue.

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::LaunchPad;
use crate::error::{CoreError, Result};
use crate::filter;
use crate::model::{FWorker, Firework, Launch, State, Tracker};

/// Holders of a launch that follow it into RUNNING.
const RUNNING_FOLLOWERS: [State; 4] = [State::Waiting, State::Ready, State::Reserved, State::Fizzled];

impl LaunchPad {
    /// Claim the next runnable firework for `fworker` and open a launch for it.
    ///
    /// `state` is RUNNING for an immediate run or RESERVED for a queue reservation.
    /// With `fw_id` only that firework is considered, in READY or RESERVED. Returns
    /// `None` when nothing matches.
    #[instrument(skip(self, fworker, launch_dir), fields(worker = %fworker.name, state = %state))]
    pub async fn checkout_fw(
        &self,
        fworker: &FWorker,
        launch_dir: &str,
        fw_id: Option<i64>,
        host: Option<&str>,
        ip: Option<&str>,
        state: State,
    ) -> Result<Option<(Firework, i64)>> {
        if !matches!(state, State::Running | State::Reserved) {
            return Err(CoreError::validation(
                "state",
                format!("checkout must target RUNNING or RESERVED, got {}", state),
            ));
        }
        let query = fworker.query()?;

        let mut budget: Option<usize> = None;
        let mut fw = loop {
            let (claimed, candidates) = self.claim_next(&query, fw_id).await?;
            let budget = budget.get_or_insert(candidates);
            let Some(mut fw) = claimed else {
                return Ok(None);
            };
            if !self.steal_launches(&mut fw).await? {
                break fw;
            }
            self.store.put_firework(&fw).await?;
            self.refresh_wf(fw.fw_id).await?;
            if *budget == 0 {
                debug!(fw_id = fw.fw_id, "Duplicate retries exhausted");
                return Ok(None);
            }
            *budget -= 1;
        };

        let reserved = fw
            .launches
            .iter()
            .find(|l| l.state() == State::Reserved)
            .cloned();
        let reused = reserved.is_some();
        let (launch_id, history) = match reserved {
            Some(launch) => (launch.launch_id, launch.into_state_history()),
            None => (self.store.allocate_launch_id().await?, Vec::new()),
        };

        let mut launch = Launch::new(launch_id, fw.fw_id, state, launch_dir, fworker.clone(), history);
        launch.host = host.map(str::to_string);
        launch.ip = ip.map(str::to_string);
        if let Some(trackers) = fw.spec.get("_trackers") {
            launch.trackers = serde_json::from_value::<Vec<Tracker>>(trackers.clone())
                .map_err(|e| CoreError::validation("_trackers", e.to_string()))?;
        }
        self.save_launch(&launch).await?;
        debug!(launch_id, reused, "Created/updated launch");

        if reused {
            for existing in fw.launches.iter_mut() {
                if existing.launch_id == launch_id {
                    *existing = launch.clone();
                }
            }
        } else {
            fw.launches.push(launch.clone());
        }
        fw.state = state;
        fw.updated_on = Utc::now();
        self.store.put_firework(&fw).await?;
        self.refresh_wf(fw.fw_id).await?;

        if state == State::Running {
            for other_id in self.store.fw_ids_holding_launch(launch_id, false).await? {
                if other_id == fw.fw_id {
                    continue;
                }
                let mut other = self.get_fw(other_id).await?;
                if !RUNNING_FOLLOWERS.contains(&other.state) {
                    continue;
                }
                other.state = state;
                other.updated_on = Utc::now();
                self.store.put_firework(&other).await?;
                self.refresh_wf(other_id).await?;
            }
        }

        let mut backups = self.backups.lock().await;
        backups.launches.insert(launch_id, launch);
        backups.fws.insert(fw.fw_id, fw.clone());
        drop(backups);

        info!(fw_id = fw.fw_id, launch_id, "{} FW", state);
        Ok(Some((fw, launch_id)))
    }

    /// [`LaunchPad::checkout_fw`] into RESERVED.
    pub async fn reserve_fw(
        &self,
        fworker: &FWorker,
        launch_dir: &str,
        host: Option<&str>,
        ip: Option<&str>,
    ) -> Result<Option<(Firework, i64)>> {
        self.checkout_fw(fworker, launch_dir, None, host, ip, State::Reserved)
            .await
    }

    /// Claim the first matching candidate. Also returns how many candidates there were.
    async fn claim_next(&self, query: &Value, fw_id: Option<i64>) -> Result<(Option<Firework>, usize)> {
        let from: &[State] = match fw_id {
            Some(_) => &[State::Ready, State::Reserved],
            None => &[State::Ready],
        };
        let rows = self
            .store
            .find_fireworks(Some(from), self.config.sort_fws)
            .await?;
        let candidates = rows.len();

        for row in rows {
            let eligible = match fw_id {
                Some(id) => row.fw_id == id,
                None => filter::matches(&row.doc, query)?,
            };
            if !eligible {
                continue;
            }
            if !self
                .store
                .claim_firework(row.fw_id, from, State::Reserved)
                .await?
            {
                debug!(fw_id = row.fw_id, "Lost checkout race");
                continue;
            }

            if row.malformed {
                self.fizzle_unloadable(row.fw_id, "stored document is not valid JSON")
                    .await?;
                continue;
            }
            let loaded = match self.store.get_firework(row.fw_id).await {
                Ok(Some(fw)) => self.registry.check_firework(&fw).map(|_| fw),
                Ok(None) => continue,
                Err(e) => Err(e),
            };
            match loaded {
                Ok(fw) => return Ok((Some(fw), candidates)),
                Err(e @ CoreError::Deserialization { .. }) => {
                    self.fizzle_unloadable(row.fw_id, &e.to_string()).await?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok((None, candidates))
    }

    async fn fizzle_unloadable(&self, fw_id: i64, details: &str) -> Result<()> {
        warn!(fw_id, details, "Cannot rebuild claimed firework, marking it FIZZLED");
        self.store.mark_malformed_fizzled(fw_id, details).await
    }

    /// Copy launches of verified duplicates onto `thief`. Returns whether anything was taken.
    async fn steal_launches(&self, thief: &mut Firework) -> Result<bool> {
        if !matches!(thief.state, State::Ready | State::Reserved) {
            return Ok(false);
        }
        let Some(doc) = thief.spec.get("_dupefinder") else {
            return Ok(false);
        };
        let dupefinder = self.registry.dupefinder(doc)?;
        let query = dupefinder.query(&thief.spec);
        debug!(fw_id = thief.fw_id, "Querying for duplicates");

        let mut stolen = false;
        let holders = self
            .store
            .find_launch_holders(thief.fw_id, self.config.sort_fws)
            .await?;
        for row in holders {
            if row.malformed || !filter::matches(&row.doc, &query)? {
                continue;
            }
            let Some(victim) = self.store.get_firework(row.fw_id).await? else {
                continue;
            };
            if dupefinder.verify(&thief.spec, &victim.spec) == Some(false) {
                continue;
            }
            for launch in victim.launches {
                if !thief.has_launch(launch.launch_id) {
                    info!(thief = thief.fw_id, victim = victim.fw_id, "Duplicate found!");
                    thief.launches.push(launch);
                    stolen = true;
                }
            }
        }
        Ok(stolen)
    }
}
