// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lazily hydrated fireworks and workflows.
//!
//! Summary and admin paths often only need ids, names and states. A [`LazyFirework`]
//! carries those from the indexed columns and fetches the full document on first
//! [`LazyFirework::hydrate`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::error::{CoreError, Result};
use crate::model::{Firework, State};
use crate::store::{FireworkHead, Store, WorkflowRecord};
use crate::workflow::{Links, Workflow};

/// Read-only handle to a stored firework.
pub struct LazyFirework {
    head: FireworkHead,
    store: Arc<dyn Store>,
    full: OnceCell<Firework>,
}

impl fmt::Debug for LazyFirework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyFirework")
            .field("fw_id", &self.head.fw_id)
            .field("state", &self.head.state)
            .field("hydrated", &self.full.initialized())
            .finish()
    }
}

impl LazyFirework {
    pub(crate) fn new(head: FireworkHead, store: Arc<dyn Store>) -> Self {
        Self {
            head,
            store,
            full: OnceCell::new(),
        }
    }

    pub fn fw_id(&self) -> i64 {
        self.head.fw_id
    }

    pub fn name(&self) -> &str {
        &self.head.name
    }

    /// State as of loading; after hydration, the hydrated state.
    pub fn state(&self) -> State {
        self.full.get().map(|fw| fw.state).unwrap_or(self.head.state)
    }

    /// Whether the full document has been fetched.
    pub fn is_hydrated(&self) -> bool {
        self.full.initialized()
    }

    /// Fetch the full firework once and return it.
    pub async fn hydrate(&self) -> Result<&Firework> {
        self.full
            .get_or_try_init(|| async {
                self.store
                    .get_firework(self.head.fw_id)
                    .await?
                    .ok_or(CoreError::FireworkNotFound {
                        fw_id: self.head.fw_id,
                    })
            })
            .await
    }
}

/// A stored workflow whose fireworks are [`LazyFirework`] handles.
#[derive(Debug)]
pub struct LazyWorkflow {
    record: WorkflowRecord,
    fws: BTreeMap<i64, LazyFirework>,
}

impl LazyWorkflow {
    /// Load the workflow containing `fw_id` without reading firework documents.
    pub async fn load(store: Arc<dyn Store>, fw_id: i64) -> Result<Self> {
        let record = store
            .get_workflow_record(fw_id)
            .await?
            .ok_or(CoreError::WorkflowNotFound { fw_id })?;
        let heads = store.firework_heads(&record.nodes()).await?;
        let fws = heads
            .into_iter()
            .map(|head| (head.fw_id, LazyFirework::new(head, store.clone())))
            .collect();
        Ok(Self { record, fws })
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// Aggregate state.
    pub fn state(&self) -> State {
        self.record.state
    }

    pub fn links(&self) -> &Links {
        &self.record.links
    }

    /// Cached per-firework states.
    pub fn fw_states(&self) -> &BTreeMap<i64, State> {
        &self.record.fw_states
    }

    /// The persisted record behind this workflow.
    pub fn record(&self) -> &WorkflowRecord {
        &self.record
    }

    pub fn fw_ids(&self) -> Vec<i64> {
        self.fws.keys().copied().collect()
    }

    pub fn fw(&self, fw_id: i64) -> Option<&LazyFirework> {
        self.fws.get(&fw_id)
    }

    pub fn fws(&self) -> impl Iterator<Item = &LazyFirework> {
        self.fws.values()
    }

    /// Hydrate every firework and assemble a full [`Workflow`].
    pub async fn into_workflow(self) -> Result<Workflow> {
        let mut fws = Vec::with_capacity(self.fws.len());
        for lazy in self.fws.values() {
            fws.push(lazy.hydrate().await?.clone());
        }
        let record = self.record;
        Ok(Workflow::from_parts(
            fws,
            record.links,
            record.fw_states,
            record.name,
            record.metadata,
            record.created_on,
            record.updated_on,
            record.state,
        ))
    }
}
