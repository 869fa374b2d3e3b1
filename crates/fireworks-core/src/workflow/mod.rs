// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflows: a DAG of fireworks with cached per-node states.
//!
//! A [`Workflow`] owns its fireworks and the [`Links`] between them. The LaunchPad loads
//! one, mutates it through [`Workflow::refresh`], [`Workflow::apply_action`] or
//! [`Workflow::append_wf`], and writes back the ids those calls report as updated.
//!
//! ```text
//!   add_wf ──► Workflow::new (validate) ──► store
//!                                             │
//!   complete_launch ──► load ──► refresh ──► apply_action ──► refresh children ──► store
//! ```
//!
//! Workflows are identified by their node set; the store's row id is kept only as a
//! private handle for writes.

pub mod dict_mods;
pub mod links;

mod actions;
mod refresh;
mod transitions;

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, Result};
use crate::model::{Firework, State};

pub use links::Links;
pub use refresh::aggregate_state;

/// A directed acyclic graph of fireworks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WorkflowDoc", into = "WorkflowDoc")]
pub struct Workflow {
    id_fw: BTreeMap<i64, Firework>,
    links: Links,
    /// Display name.
    pub name: String,
    /// Free-form metadata.
    pub metadata: Map<String, Value>,
    /// Creation time.
    pub created_on: DateTime<Utc>,
    /// Last modification time.
    pub updated_on: DateTime<Utc>,
    fw_states: BTreeMap<i64, State>,
    state: State,
}

/// Serialized form used inside FWActions and `FW.json`-style documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkflowDoc {
    fws: Vec<Firework>,
    #[serde(default)]
    links: BTreeMap<i64, Vec<i64>>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    metadata: Map<String, Value>,
    #[serde(default)]
    created_on: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_on: Option<DateTime<Utc>>,
}

impl TryFrom<WorkflowDoc> for Workflow {
    type Error = CoreError;

    fn try_from(doc: WorkflowDoc) -> Result<Self> {
        let mut wf = Workflow::new(doc.fws, doc.links, doc.name, doc.metadata)?;
        if let Some(created_on) = doc.created_on {
            wf.created_on = created_on;
        }
        if let Some(updated_on) = doc.updated_on {
            wf.updated_on = updated_on;
        }
        Ok(wf)
    }
}

impl From<Workflow> for WorkflowDoc {
    fn from(wf: Workflow) -> Self {
        WorkflowDoc {
            links: wf.links.into(),
            fws: wf.id_fw.into_values().collect(),
            name: Some(wf.name),
            metadata: wf.metadata,
            created_on: Some(wf.created_on),
            updated_on: Some(wf.updated_on),
        }
    }
}

impl Workflow {
    /// Build a workflow from fireworks and a parent → children map.
    ///
    /// Fireworks missing from `links` become isolated nodes. Fails with
    /// [`CoreError::InvalidGraph`] on duplicate ids, links to unknown fireworks, or
    /// cycles. Without a name, the workflow is named `<name>--<fw_id>` after its
    /// lowest-id firework.
    pub fn new(
        fws: Vec<Firework>,
        links: BTreeMap<i64, Vec<i64>>,
        name: Option<String>,
        metadata: Map<String, Value>,
    ) -> Result<Self> {
        if fws.is_empty() {
            return Err(CoreError::invalid_graph("a workflow needs at least one firework"));
        }

        let mut id_fw = BTreeMap::new();
        for fw in fws {
            let fw_id = fw.fw_id;
            if id_fw.insert(fw_id, fw).is_some() {
                return Err(CoreError::invalid_graph(format!(
                    "duplicate fw_id {} in workflow",
                    fw_id
                )));
            }
        }

        for (parent, children) in &links {
            for id in std::iter::once(parent).chain(children) {
                if !id_fw.contains_key(id) {
                    return Err(CoreError::invalid_graph(format!(
                        "link references unknown fw_id {}",
                        id
                    )));
                }
            }
        }

        let mut links = Links::from(links);
        for fw_id in id_fw.keys() {
            links.add_node(*fw_id);
        }
        links.topological_order()?;

        let name = name.unwrap_or_else(|| {
            id_fw
                .values()
                .next()
                .map(|fw| format!("{}--{}", fw.name, fw.fw_id))
                .unwrap_or_default()
        });
        let fw_states = id_fw.iter().map(|(id, fw)| (*id, fw.state)).collect();
        let now = Utc::now();

        let mut wf = Self {
            id_fw,
            links,
            name,
            metadata,
            created_on: now,
            updated_on: now,
            fw_states,
            state: State::Waiting,
        };
        wf.state = aggregate_state(&wf);
        Ok(wf)
    }

    /// A single-firework workflow named after it.
    pub fn from_firework(fw: Firework) -> Self {
        let name = fw.name.clone();
        let fw_id = fw.fw_id;
        let state = fw.state;
        let now = Utc::now();
        let mut links = Links::new();
        links.add_node(fw_id);
        Self {
            id_fw: BTreeMap::from([(fw_id, fw)]),
            links,
            name,
            metadata: Map::new(),
            created_on: now,
            updated_on: now,
            fw_states: BTreeMap::from([(fw_id, state)]),
            state,
        }
    }

    /// A linear chain `fws[0] → fws[1] → …`.
    pub fn chain(fws: Vec<Firework>, name: Option<String>) -> Result<Self> {
        let mut links = BTreeMap::new();
        for pair in fws.windows(2) {
            links.insert(pair[0].fw_id, vec![pair[1].fw_id]);
        }
        Self::new(fws, links, name, Map::new())
    }

    /// Rebuild a stored workflow. The cached states are trusted as persisted.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        fws: Vec<Firework>,
        links: Links,
        fw_states: BTreeMap<i64, State>,
        name: String,
        metadata: Map<String, Value>,
        created_on: DateTime<Utc>,
        updated_on: DateTime<Utc>,
        state: State,
    ) -> Self {
        let id_fw: BTreeMap<i64, Firework> = fws.into_iter().map(|fw| (fw.fw_id, fw)).collect();
        let mut fw_states = fw_states;
        for (id, fw) in &id_fw {
            fw_states.entry(*id).or_insert(fw.state);
        }
        Self {
            id_fw,
            links,
            name,
            metadata,
            created_on,
            updated_on,
            fw_states,
            state,
        }
    }

    /// The links.
    pub fn links(&self) -> &Links {
        &self.links
    }

    /// Cached per-firework states.
    pub fn fw_states(&self) -> &BTreeMap<i64, State> {
        &self.fw_states
    }

    /// Aggregate state, as of the last refresh.
    pub fn state(&self) -> State {
        self.state
    }

    /// Firework ids in ascending order.
    pub fn fw_ids(&self) -> Vec<i64> {
        self.id_fw.keys().copied().collect()
    }

    /// All fireworks in ascending id order.
    pub fn fws(&self) -> impl Iterator<Item = &Firework> {
        self.id_fw.values()
    }

    /// Number of fireworks.
    pub fn len(&self) -> usize {
        self.id_fw.len()
    }

    /// Never true for a validated workflow.
    pub fn is_empty(&self) -> bool {
        self.id_fw.is_empty()
    }

    /// One firework.
    pub fn fw(&self, fw_id: i64) -> Option<&Firework> {
        self.id_fw.get(&fw_id)
    }

    pub(crate) fn fw_mut(&mut self, fw_id: i64) -> Result<&mut Firework> {
        self.id_fw
            .get_mut(&fw_id)
            .ok_or(CoreError::FireworkNotFound { fw_id })
    }

    /// Whether `fw_id` belongs to this workflow.
    pub fn contains(&self, fw_id: i64) -> bool {
        self.id_fw.contains_key(&fw_id)
    }

    /// Roots of the graph.
    pub fn root_fw_ids(&self) -> Vec<i64> {
        self.links.roots()
    }

    /// Leaves of the graph.
    pub fn leaf_fw_ids(&self) -> Vec<i64> {
        self.links.leaves()
    }

    /// Force a firework into `state`, keeping the cache in step.
    pub(crate) fn set_fw_state(&mut self, fw_id: i64, state: State) -> Result<()> {
        let fw = self.fw_mut(fw_id)?;
        fw.state = state;
        fw.updated_on = Utc::now();
        self.fw_states.insert(fw_id, state);
        Ok(())
    }

    /// Recompute the aggregate state from the cache.
    pub(crate) fn update_state(&mut self) {
        self.state = aggregate_state(self);
        self.updated_on = Utc::now();
    }

    /// Ids that are still placeholders.
    pub fn placeholder_ids(&self) -> Vec<i64> {
        self.id_fw.keys().copied().filter(|id| *id < 0).collect()
    }

    /// Rename fireworks through `old_new`; ids not in the map are kept.
    pub fn reassign_ids(&mut self, old_new: &HashMap<i64, i64>) {
        let map = |id: i64| old_new.get(&id).copied().unwrap_or(id);
        self.id_fw = std::mem::take(&mut self.id_fw)
            .into_values()
            .map(|mut fw| {
                fw.fw_id = map(fw.fw_id);
                for launch in fw.launches.iter_mut().chain(fw.archived_launches.iter_mut()) {
                    launch.fw_id = map(launch.fw_id);
                }
                (fw.fw_id, fw)
            })
            .collect();
        self.fw_states = std::mem::take(&mut self.fw_states)
            .into_iter()
            .map(|(id, state)| (map(id), state))
            .collect();
        self.links.reassign_ids(old_new);
    }

    /// Consume into the fireworks.
    pub fn into_fws(self) -> Vec<Firework> {
        self.id_fw.into_values().collect()
    }
}
