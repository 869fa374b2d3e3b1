// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Read-only lookups. None of these take the workflow lock, so a result may be one
//! write behind a concurrent operation.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value, json};

use super::LaunchPad;
use super::admin::RecoverLaunch;
use crate::config::SortOrder;
use crate::error::{CoreError, Result};
use crate::filter;
use crate::lazy::LazyWorkflow;
use crate::model::{FWorker, Firework, Launch, State, Tracker};
use crate::workflow::Workflow;

/// Shape of [`LaunchPad::get_wf_summary_dict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SummaryMode {
    /// Name, state and a compact `states_list`.
    Less,
    /// Per-firework states and launch directories.
    #[default]
    More,
    /// Everything, with links keyed by `name--fw_id`.
    All,
    /// Per-firework states and launch reservation ids.
    Reservations,
}

/// Sort direction of one key of an id query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// An id query over firework (or workflow) documents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FwIdQuery {
    /// Document filter; `None` matches everything.
    pub filter: Option<Value>,
    /// Sort keys applied in order, after ascending id.
    pub sort: Vec<(String, Direction)>,
    /// Maximum number of ids; 0 is unlimited.
    pub limit: usize,
    /// Only count.
    pub count_only: bool,
    /// Apply `filter` to launch documents and return the fireworks holding the matches.
    pub launches_mode: bool,
}

impl FwIdQuery {
    pub fn new(filter: Value) -> Self {
        Self {
            filter: Some(filter),
            ..Self::default()
        }
    }

    pub fn sort_by(mut self, key: impl Into<String>, direction: Direction) -> Self {
        self.sort.push((key.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn count_only(mut self) -> Self {
        self.count_only = true;
        self
    }

    pub fn launches_mode(mut self) -> Self {
        self.launches_mode = true;
        self
    }
}

/// Result of an id query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutput {
    Ids(Vec<i64>),
    Count(usize),
}

impl QueryOutput {
    /// The ids; empty for a count.
    pub fn into_ids(self) -> Vec<i64> {
        match self {
            Self::Ids(ids) => ids,
            Self::Count(_) => Vec::new(),
        }
    }

    pub fn count(&self) -> usize {
        match self {
            Self::Ids(ids) => ids.len(),
            Self::Count(n) => *n,
        }
    }
}

/// Tracker contents of one launch.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerData {
    pub launch_id: i64,
    pub trackers: Vec<Tracker>,
}

/// Sort `(id, doc)` pairs by id, then by each key in turn, and shape the output.
fn finish(mut docs: Vec<(i64, Value)>, query: &FwIdQuery) -> QueryOutput {
    docs.sort_by_key(|(id, _)| *id);
    for (key, direction) in query.sort.iter().rev() {
        docs.sort_by(|(_, a), (_, b)| {
            let ord = filter::sort_order(filter::get_path(a, key), filter::get_path(b, key));
            match direction {
                Direction::Ascending => ord,
                Direction::Descending => ord.reverse(),
            }
        });
    }
    if query.count_only {
        let n = docs.len();
        return QueryOutput::Count(if query.limit > 0 { n.min(query.limit) } else { n });
    }
    let mut ids: Vec<i64> = docs.into_iter().map(|(id, _)| id).collect();
    if query.limit > 0 {
        ids.truncate(query.limit);
    }
    QueryOutput::Ids(ids)
}

fn summary_key(name: &str, fw_id: i64) -> String {
    format!("{}--{}", name, fw_id)
}

fn state_abbrev(state: State) -> &'static str {
    let s = state.as_str();
    if s.starts_with('R') { &s[..3] } else { &s[..1] }
}

impl LaunchPad {
    pub async fn get_fw_by_id(&self, fw_id: i64) -> Result<Firework> {
        self.get_fw(fw_id).await
    }

    /// The stored firework document with launches expanded.
    pub async fn get_fw_dict_by_id(&self, fw_id: i64) -> Result<Value> {
        self.store
            .get_firework_doc(fw_id)
            .await?
            .ok_or(CoreError::FireworkNotFound { fw_id })
    }

    pub async fn get_launch_by_id(&self, launch_id: i64) -> Result<Launch> {
        self.get_launch(launch_id).await
    }

    /// The full workflow containing `fw_id`.
    pub async fn get_wf_by_fw_id(&self, fw_id: i64) -> Result<Workflow> {
        self.load_wf(fw_id).await
    }

    /// The workflow containing `fw_id` with lazily loaded fireworks.
    pub async fn get_wf_by_fw_id_lzyfw(&self, fw_id: i64) -> Result<LazyWorkflow> {
        LazyWorkflow::load(self.store.clone(), fw_id).await
    }

    /// Ids of fireworks in `states` whose document matches `query`.
    pub(crate) async fn matching_fw_ids(
        &self,
        states: Option<&[State]>,
        query: &Value,
    ) -> Result<BTreeSet<i64>> {
        let mut ids = BTreeSet::new();
        for row in self.store.find_fireworks(states, SortOrder::Unspecified).await? {
            if filter::matches(&row.doc, query)? {
                ids.insert(row.fw_id);
            }
        }
        Ok(ids)
    }

    async fn fw_docs_matching(
        &self,
        query: &FwIdQuery,
        within: Option<&BTreeSet<i64>>,
    ) -> Result<Vec<(i64, Value)>> {
        let rows = self
            .store
            .find_fireworks(None, SortOrder::Unspecified)
            .await?;
        let rows = rows
            .into_iter()
            .filter(|row| within.is_none_or(|ids| ids.contains(&row.fw_id)));

        if !query.launches_mode {
            let mut docs = Vec::new();
            for row in rows {
                let keep = match &query.filter {
                    Some(f) => filter::matches(&row.doc, f)?,
                    None => true,
                };
                if keep {
                    docs.push((row.fw_id, row.doc));
                }
            }
            return Ok(docs);
        }

        let mut holders = BTreeSet::new();
        for launch in self.store.find_launches(None, None).await? {
            let keep = match &query.filter {
                Some(f) => filter::matches(&serde_json::to_value(&launch)?, f)?,
                None => true,
            };
            if keep {
                holders.extend(
                    self.store
                        .fw_ids_holding_launch(launch.launch_id, false)
                        .await?,
                );
            }
        }
        Ok(rows
            .filter(|row| holders.contains(&row.fw_id))
            .map(|row| (row.fw_id, row.doc))
            .collect())
    }

    /// Firework ids matching `query`.
    pub async fn get_fw_ids(&self, query: &FwIdQuery) -> Result<QueryOutput> {
        let docs = self.fw_docs_matching(query, None).await?;
        Ok(finish(docs, query))
    }

    /// One firework id (the smallest) per workflow whose document matches `query`.
    pub async fn get_wf_ids(&self, query: &FwIdQuery) -> Result<QueryOutput> {
        let mut docs = Vec::new();
        for record in self.store.list_workflow_records().await? {
            let doc = record.to_value();
            let keep = match &query.filter {
                Some(f) => filter::matches(&doc, f)?,
                None => true,
            };
            if let (true, Some(&first)) = (keep, record.nodes().first()) {
                docs.push((first, doc));
            }
        }
        Ok(finish(docs, query))
    }

    /// Firework ids matching `fw_query` inside workflows matching `wf_filter`.
    pub async fn get_fw_ids_in_wfs(
        &self,
        wf_filter: Option<&Value>,
        fw_query: &FwIdQuery,
    ) -> Result<QueryOutput> {
        let mut members = BTreeSet::new();
        for record in self.store.list_workflow_records().await? {
            let keep = match wf_filter {
                Some(f) => filter::matches(&record.to_value(), f)?,
                None => true,
            };
            if keep {
                members.extend(record.nodes());
            }
        }
        let docs = self.fw_docs_matching(fw_query, Some(&members)).await?;
        Ok(finish(docs, fw_query))
    }

    /// A display summary of the workflow containing `fw_id`.
    pub async fn get_wf_summary_dict(&self, fw_id: i64, mode: SummaryMode) -> Result<Value> {
        let wf = self.get_wf_by_fw_id_lzyfw(fw_id).await?;
        let record = wf.record();

        let mut summary = Map::new();
        summary.insert("name".into(), json!(record.name));
        summary.insert("state".into(), json!(record.state));
        summary.insert("created_on".into(), json!(record.created_on));

        if mode == SummaryMode::Less {
            let states: Vec<&str> = wf.fws().map(|fw| state_abbrev(fw.state())).collect();
            summary.insert("states_list".into(), json!(states.join("-")));
            return Ok(Value::Object(summary));
        }

        summary.insert("updated_on".into(), json!(record.updated_on));
        let mut states = Map::new();
        let mut per_fw = Map::new();
        let mut keys = BTreeMap::new();
        for lazy in wf.fws() {
            let key = summary_key(lazy.name(), lazy.fw_id());
            keys.insert(lazy.fw_id(), key.clone());
            states.insert(key.clone(), json!(lazy.state()));
            let fw = lazy.hydrate().await?;
            let launches: Vec<Value> = match mode {
                SummaryMode::Reservations => fw
                    .launches
                    .iter()
                    .map(|l| {
                        json!({
                            "launch_id": l.launch_id,
                            "launch_dir": l.launch_dir,
                            "reservation_id": l.reservation_id(),
                        })
                    })
                    .collect(),
                _ => fw.launches.iter().map(|l| json!(l.launch_dir)).collect(),
            };
            per_fw.insert(key, Value::Array(launches));
        }
        summary.insert("states".into(), Value::Object(states));

        match mode {
            SummaryMode::Reservations => {
                summary.insert("launches".into(), Value::Object(per_fw));
            }
            _ => {
                summary.insert("launch_dirs".into(), Value::Object(per_fw));
            }
        }

        if mode == SummaryMode::All {
            let rename = |adjacency: &BTreeMap<i64, Vec<i64>>| -> Value {
                let mut out = Map::new();
                for (parent, children) in adjacency {
                    let Some(key) = keys.get(parent) else {
                        continue;
                    };
                    let names: Vec<&String> = children.iter().filter_map(|c| keys.get(c)).collect();
                    out.insert(key.clone(), json!(names));
                }
                Value::Object(out)
            };
            let children: BTreeMap<i64, Vec<i64>> = record
                .nodes()
                .into_iter()
                .map(|id| (id, record.links.children(id).to_vec()))
                .collect();
            summary.insert("links".into(), rename(&children));
            summary.insert("parent_links".into(), rename(record.links.parent_links()));
            summary.insert("metadata".into(), Value::Object(record.metadata.clone()));
        }
        Ok(Value::Object(summary))
    }

    /// Whether a READY firework matches `fworker` (any READY firework without one).
    pub async fn run_exists(&self, fworker: Option<&FWorker>) -> Result<bool> {
        let query = match fworker {
            Some(w) => w.query()?,
            None => json!({}),
        };
        Ok(!self
            .matching_fw_ids(Some(&[State::Ready][..]), &query)
            .await?
            .is_empty())
    }

    /// Whether `fworker` has something to run now or later: a READY match, or a WAITING
    /// match whose parents are all still live.
    pub async fn future_run_exists(&self, fworker: Option<&FWorker>) -> Result<bool> {
        if self.run_exists(fworker).await? {
            return Ok(true);
        }
        let query = match fworker {
            Some(w) => w.query()?,
            None => json!({}),
        };
        const LIVE: [State; 4] = [State::Running, State::Reserved, State::Ready, State::Waiting];
        for fw_id in self
            .matching_fw_ids(Some(&[State::Waiting][..]), &query)
            .await?
        {
            let Some(record) = self.store.get_workflow_record(fw_id).await? else {
                continue;
            };
            let parents_live = record.links.parents(fw_id).iter().all(|p| {
                record
                    .fw_states
                    .get(p)
                    .is_some_and(|s| LIVE.contains(s))
            });
            if parents_live {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Trackers of every launch of `fw_id`, archived ones included.
    pub async fn get_tracker_data(&self, fw_id: i64) -> Result<Vec<TrackerData>> {
        let fw = self.get_fw(fw_id).await?;
        let mut data: Vec<TrackerData> = fw
            .launches
            .iter()
            .chain(fw.archived_launches.iter())
            .map(|l| TrackerData {
                launch_id: l.launch_id,
                trackers: l.trackers.clone(),
            })
            .collect();
        data.sort_by_key(|d| d.launch_id);
        data.dedup_by_key(|d| d.launch_id);
        Ok(data)
    }

    /// Directory of launch `launch_idx` of `fw_id`; negative indexes count from the end.
    pub async fn get_launchdir(&self, fw_id: i64, launch_idx: i64) -> Result<Option<String>> {
        let fw = self.get_fw(fw_id).await?;
        let len = fw.launches.len() as i64;
        let idx = if launch_idx < 0 { len + launch_idx } else { launch_idx };
        if idx < 0 || idx >= len {
            return Ok(None);
        }
        Ok(Some(fw.launches[idx as usize].launch_dir.clone()))
    }

    /// The checkpoint of a launch of `fw_id`, tagged with `_prev_dir` and `_launch_id`.
    pub async fn get_recovery(&self, fw_id: i64, launch: RecoverLaunch) -> Result<Map<String, Value>> {
        let launch = match launch {
            RecoverLaunch::Id(launch_id) => self.get_launch(launch_id).await?,
            RecoverLaunch::Last => self
                .get_fw(fw_id)
                .await?
                .launches
                .last()
                .cloned()
                .ok_or_else(|| {
                    CoreError::validation("recover_launch", format!("fw_id {} has no launch", fw_id))
                })?,
        };
        let mut recovery = match launch.last_checkpoint() {
            Some(Value::Object(checkpoint)) => checkpoint.clone(),
            _ => Map::new(),
        };
        recovery.insert("_prev_dir".into(), json!(launch.launch_dir));
        recovery.insert("_launch_id".into(), json!(launch.launch_id));
        Ok(recovery)
    }
}
