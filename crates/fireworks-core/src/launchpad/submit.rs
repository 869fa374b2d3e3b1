// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflow submission.

use std::collections::{BTreeSet, HashMap};

use tracing::{info, instrument};

use super::LaunchPad;
use crate::error::{CoreError, Result};
use crate::model::spec_keys::validate_spec;
use crate::workflow::Workflow;

impl LaunchPad {
    /// Submit a workflow. Returns the mapping from submitted to stored ids.
    #[instrument(skip(self, wf), fields(name = %wf.name, fws = wf.len()))]
    pub async fn add_wf(&self, wf: Workflow) -> Result<HashMap<i64, i64>> {
        self.bulk_add_wfs(vec![wf]).await
    }

    /// Submit several workflows with one id allocation and one transaction.
    #[instrument(skip(self, wfs), fields(count = wfs.len()))]
    pub async fn bulk_add_wfs(&self, mut wfs: Vec<Workflow>) -> Result<HashMap<i64, i64>> {
        let total: usize = wfs.iter().map(Workflow::len).sum();
        if total == 0 {
            return Ok(HashMap::new());
        }

        for wf in wfs.iter_mut() {
            wf.links().topological_order()?;
            for fw in wf.fws() {
                validate_spec(&fw.spec)?;
            }
            wf.refresh_from(wf.root_fw_ids())?;
        }

        let mut next = self.store.allocate_fw_ids(total as i64).await?;
        let mut old_new = HashMap::with_capacity(total);
        for wf in wfs.iter_mut() {
            let mut local = HashMap::with_capacity(wf.len());
            for old in wf.fw_ids() {
                local.insert(old, next);
                next += 1;
            }
            wf.reassign_ids(&local);
            old_new.extend(local);
        }

        self.store.insert_workflows(&wfs).await?;
        info!(id_map = ?old_new, "Added workflows");
        Ok(old_new)
    }

    /// Graft `new_wf` under `parent_fw_ids` in their (shared) workflow.
    ///
    /// With `detour`, the parents' existing children are moved under the leaves of
    /// `new_wf`. With `pull_spec_mods`, spec changes that COMPLETED parents passed to
    /// their children are applied to the new roots as well. Returns the stored ids of
    /// the new fireworks.
    #[instrument(skip(self, new_wf), fields(parents = ?parent_fw_ids))]
    pub async fn append_wf(
        &self,
        new_wf: Workflow,
        parent_fw_ids: &[i64],
        detour: bool,
        pull_spec_mods: bool,
    ) -> Result<Vec<i64>> {
        let Some(&anchor) = parent_fw_ids.first() else {
            return Err(CoreError::validation("fw_ids", "at least one parent is required"));
        };
        for fw in new_wf.fws() {
            validate_spec(&fw.spec)?;
        }

        let (_, old_new) = self
            .modify_wf(anchor, |wf| {
                let updated = wf.append_wf(new_wf, parent_fw_ids, detour, pull_spec_mods)?;
                Ok(((), updated))
            })
            .await?;

        let new_ids: BTreeSet<i64> = old_new.values().copied().collect();
        info!(new_ids = ?new_ids, "Appended workflow");
        Ok(new_ids.into_iter().collect())
    }
}
