// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! State recomputation over the forward closure of a changed firework.

use std::collections::{BTreeSet, VecDeque};

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use super::Workflow;
use crate::error::{CoreError, Result};
use crate::model::State;

impl Workflow {
    /// Recompute `fw_id` and everything downstream of it.
    ///
    /// Returns the ids whose document changed and must be written back. A firework that
    /// newly reaches COMPLETED has its representative launch's action applied before its
    /// children are visited. Calling it again without intervening changes is a no-op.
    pub fn refresh(&mut self, fw_id: i64) -> Result<BTreeSet<i64>> {
        self.refresh_from([fw_id])
    }

    /// [`Workflow::refresh`] seeded with several fireworks.
    pub fn refresh_from(&mut self, seeds: impl IntoIterator<Item = i64>) -> Result<BTreeSet<i64>> {
        let mut updated = BTreeSet::new();
        let mut queue: VecDeque<i64> = seeds.into_iter().collect();
        // Seeds cascade to their children even when their own state is unchanged.
        let mut forced: BTreeSet<i64> = queue.iter().copied().collect();

        while let Some(fw_id) = queue.pop_front() {
            let fw = self
                .id_fw
                .get(&fw_id)
                .ok_or(CoreError::FireworkNotFound { fw_id })?;
            let prev = fw.state;
            let cached = self.fw_states.get(&fw_id).copied();
            let next = self.compute_state(fw_id);

            if next == State::Ready && self.inject_fizzled_parents(fw_id)? {
                updated.insert(fw_id);
            }

            if next == prev && cached == Some(next) {
                if forced.remove(&fw_id) {
                    queue.extend(self.links.children(fw_id).iter().copied());
                }
                continue;
            }
            forced.remove(&fw_id);

            debug!(fw_id, from = %prev, to = %next, "Firework state recomputed");
            self.set_fw_state(fw_id, next)?;
            updated.insert(fw_id);

            if next == State::Completed && prev != State::Completed {
                let action = self.id_fw[&fw_id]
                    .representative_launch()
                    .and_then(|l| l.action.clone());
                if let Some(action) = action {
                    let touched = self.apply_action(fw_id, &action)?;
                    for id in touched {
                        updated.insert(id);
                        queue.push_back(id);
                    }
                }
            }

            queue.extend(self.links.children(fw_id).iter().copied());
        }

        self.update_state();
        Ok(updated)
    }

    fn compute_state(&self, fw_id: i64) -> State {
        let fw = &self.id_fw[&fw_id];

        if fw.launches.iter().any(|l| l.state() == State::Running) {
            return State::Running;
        }
        if fw.launches.iter().any(|l| l.state() == State::Reserved) {
            return State::Reserved;
        }
        if fw.state.is_held() {
            return fw.state;
        }
        // Fizzled without ever launching: nothing to recompute from.
        if fw.state == State::Fizzled && fw.launches.is_empty() {
            return State::Fizzled;
        }
        if let Some(launch) = fw.representative_launch() {
            match launch.state() {
                State::Completed => return State::Completed,
                State::Fizzled => return State::Fizzled,
                _ => {}
            }
        }

        let allow_fizzled = fw.allow_fizzled_parents();
        let parent_states: Vec<State> = self
            .links
            .parents(fw_id)
            .iter()
            .map(|p| self.cached_state(*p))
            .collect();

        if parent_states
            .iter()
            .all(|s| *s == State::Completed || (allow_fizzled && *s == State::Fizzled))
        {
            return State::Ready;
        }
        for held in [State::Archived, State::Defused, State::Paused] {
            if parent_states.contains(&held) {
                return held;
            }
        }
        State::Waiting
    }

    pub(super) fn cached_state(&self, fw_id: i64) -> State {
        self.fw_states
            .get(&fw_id)
            .copied()
            .or_else(|| self.id_fw.get(&fw_id).map(|fw| fw.state))
            .unwrap_or(State::Waiting)
    }

    /// Fill `_fizzled_parents` once. Returns whether `spec` changed.
    fn inject_fizzled_parents(&mut self, fw_id: i64) -> Result<bool> {
        let fw = &self.id_fw[&fw_id];
        if !fw.allow_fizzled_parents() || fw.spec.contains_key("_fizzled_parents") {
            return Ok(false);
        }
        let parents = self
            .links
            .parents(fw_id)
            .iter()
            .filter_map(|p| self.id_fw.get(p))
            .filter(|p| p.state == State::Fizzled)
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<Value>, _>>()?;
        if parents.is_empty() {
            return Ok(false);
        }
        let fw = self.fw_mut(fw_id)?;
        fw.spec
            .insert("_fizzled_parents".to_string(), Value::Array(parents));
        fw.updated_on = Utc::now();
        Ok(true)
    }
}

/// Aggregate state of a workflow from its cached firework states. First match wins.
pub fn aggregate_state(wf: &Workflow) -> State {
    let states = &wf.fw_states;
    let state_of = |id: &i64| states.get(id).copied().unwrap_or(State::Waiting);
    let any = |s: State| states.values().any(|v| *v == s);

    if states.values().all(|s| *s == State::Archived) {
        return State::Archived;
    }
    let leaves = wf.links.leaves();
    if !leaves.is_empty() && leaves.iter().all(|l| state_of(l) == State::Completed) {
        return State::Completed;
    }
    if any(State::Defused) {
        return State::Defused;
    }
    if any(State::Paused) {
        return State::Paused;
    }

    let fizzled_blocks = states.iter().any(|(id, s)| {
        *s == State::Fizzled
            && (wf.links.children(*id).is_empty()
                || wf.links.children(*id).iter().any(|c| {
                    wf.id_fw
                        .get(c)
                        .is_some_and(|child| !child.allow_fizzled_parents())
                }))
    });
    if fizzled_blocks {
        return State::Fizzled;
    }

    for live in [State::Running, State::Reserved, State::Ready] {
        if any(live) {
            return live;
        }
    }
    State::Waiting
}
