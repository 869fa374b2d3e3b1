// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Launches: single attempts to run a firework, with their state history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::action::FWAction;
use super::fworker::FWorker;
use super::state::State;
use super::tracker::Tracker;

/// One entry of a launch's state history.
///
/// `updated_on` of the RESERVED and RUNNING entries is the lease heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateHistoryEntry {
    /// State entered.
    pub state: State,
    /// When the state was entered.
    pub created_on: DateTime<Utc>,
    /// Last heartbeat while in this state.
    pub updated_on: DateTime<Utc>,
    /// Checkpoint reported by the worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<Value>,
    /// Queue reservation id, set on RESERVED entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<String>,
}

/// A single attempt to execute a firework on a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Launch {
    /// Allocated launch id.
    pub launch_id: i64,
    /// The firework this launch was created for.
    pub fw_id: i64,
    state: State,
    /// Directory the launch runs in.
    pub launch_dir: String,
    /// Snapshot of the worker that claimed the firework.
    pub fworker: FWorker,
    /// Host name of the worker.
    #[serde(default)]
    pub host: Option<String>,
    /// IP address of the worker.
    #[serde(default)]
    pub ip: Option<String>,
    /// File trackers, refreshed on ping.
    #[serde(default)]
    pub trackers: Vec<Tracker>,
    /// Result recorded at completion.
    #[serde(default)]
    pub action: Option<FWAction>,
    #[serde(default)]
    state_history: Vec<StateHistoryEntry>,
}

impl Launch {
    /// Create a launch in `state`, continuing `prior_history` when a reservation is reused.
    pub fn new(
        launch_id: i64,
        fw_id: i64,
        state: State,
        launch_dir: impl Into<String>,
        fworker: FWorker,
        prior_history: Vec<StateHistoryEntry>,
    ) -> Self {
        let mut launch = Self {
            launch_id,
            fw_id,
            state,
            launch_dir: launch_dir.into(),
            fworker,
            host: None,
            ip: None,
            trackers: Vec::new(),
            action: None,
            state_history: prior_history,
        };
        launch.set_state_at(state, Utc::now());
        launch
    }

    /// Current state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Change state, appending a history entry when the state differs from the last one.
    pub fn set_state(&mut self, state: State) {
        self.set_state_at(state, Utc::now());
    }

    /// Like [`Launch::set_state`] with an explicit timestamp.
    pub fn set_state_at(&mut self, state: State, now: DateTime<Utc>) {
        self.state = state;
        let last = self.state_history.last();
        if last.is_some_and(|entry| entry.state == state) {
            return;
        }
        let checkpoint = match state {
            State::Completed => None,
            _ => last.and_then(|entry| entry.checkpoint.clone()),
        };
        self.state_history.push(StateHistoryEntry {
            state,
            created_on: now,
            updated_on: now,
            checkpoint,
            reservation_id: None,
        });
    }

    /// The full state history, oldest first.
    pub fn state_history(&self) -> &[StateHistoryEntry] {
        &self.state_history
    }

    pub(crate) fn state_history_mut(&mut self) -> &mut Vec<StateHistoryEntry> {
        &mut self.state_history
    }

    /// Consume the launch and keep its history.
    pub fn into_state_history(self) -> Vec<StateHistoryEntry> {
        self.state_history
    }

    /// Heartbeat: move the last entry's `updated_on` forward and optionally store a checkpoint.
    pub fn touch_history(&mut self, ptime: Option<DateTime<Utc>>, checkpoint: Option<Value>) {
        if let Some(entry) = self.state_history.last_mut() {
            let ptime = ptime.unwrap_or_else(Utc::now);
            entry.updated_on = ptime.max(entry.created_on);
            if checkpoint.is_some() {
                entry.checkpoint = checkpoint;
            }
        }
    }

    /// Tag RESERVED entries that do not carry a reservation id yet.
    pub fn set_reservation_id(&mut self, reservation_id: impl Into<String>) {
        let reservation_id = reservation_id.into();
        for entry in &mut self.state_history {
            if entry.state == State::Reserved && entry.reservation_id.is_none() {
                entry.reservation_id = Some(reservation_id.clone());
            }
        }
    }

    /// Reservation id of the first RESERVED entry.
    pub fn reservation_id(&self) -> Option<&str> {
        self.state_history
            .iter()
            .find(|e| e.state == State::Reserved)
            .and_then(|e| e.reservation_id.as_deref())
    }

    /// Most recent heartbeat.
    pub fn heartbeat(&self) -> Option<DateTime<Utc>> {
        self.state_history.last().map(|e| e.updated_on)
    }

    /// Checkpoint carried by the last entry.
    pub fn last_checkpoint(&self) -> Option<&Value> {
        self.state_history.last().and_then(|e| e.checkpoint.as_ref())
    }

    fn entry_for(&self, states: &[State]) -> Option<&StateHistoryEntry> {
        self.state_history.iter().find(|e| states.contains(&e.state))
    }

    /// When the launch started RUNNING.
    pub fn time_start(&self) -> Option<DateTime<Utc>> {
        self.entry_for(&[State::Running]).map(|e| e.created_on)
    }

    /// When the launch COMPLETED or FIZZLED.
    pub fn time_end(&self) -> Option<DateTime<Utc>> {
        self.entry_for(&[State::Completed, State::Fizzled])
            .map(|e| e.created_on)
    }

    /// When the launch was RESERVED.
    pub fn time_reserved(&self) -> Option<DateTime<Utc>> {
        self.entry_for(&[State::Reserved]).map(|e| e.created_on)
    }

    /// Last heartbeat of the RUNNING entry.
    pub fn last_pinged(&self) -> Option<DateTime<Utc>> {
        self.entry_for(&[State::Running]).map(|e| e.updated_on)
    }

    /// Last heartbeat of the RESERVED entry.
    pub fn reservation_pinged(&self) -> Option<DateTime<Utc>> {
        self.entry_for(&[State::Reserved]).map(|e| e.updated_on)
    }

    /// Seconds between start and end.
    pub fn runtime_secs(&self) -> Option<f64> {
        let start = self.time_start()?;
        let end = self.time_end()?;
        Some((end - start).num_milliseconds() as f64 / 1000.0)
    }

    /// Seconds spent RESERVED before starting, or until now if not started.
    pub fn reservedtime_secs(&self) -> Option<f64> {
        let reserved = self.time_reserved()?;
        let end = self.time_start().unwrap_or_else(Utc::now);
        Some((end - reserved).num_milliseconds() as f64 / 1000.0)
    }
}
