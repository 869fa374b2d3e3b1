// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Applying a completed firework's FWAction to its workflow, and grafting new
//! sub-workflows.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use super::Workflow;
use super::dict_mods::apply_mod;
use crate::error::{CoreError, Result};
use crate::model::{FWAction, State};

struct Grafted {
    new_ids: Vec<i64>,
    roots: Vec<i64>,
}

impl Workflow {
    /// Apply `action`, returned by `fw_id`, to the graph.
    ///
    /// Order: `update_spec`, `mod_spec`, `defuse_children`, `defuse_workflow`, detours,
    /// additions. Returns the ids that were modified or created; created fireworks keep
    /// placeholder ids until the LaunchPad assigns real ones.
    pub fn apply_action(&mut self, fw_id: i64, action: &FWAction) -> Result<BTreeSet<i64>> {
        let mut updated = BTreeSet::new();

        let targets: Vec<i64> = if action.propagate {
            self.links.descendants(fw_id).into_iter().collect()
        } else {
            self.links.children(fw_id).to_vec()
        };

        if !action.update_spec.is_empty() {
            for id in &targets {
                let fw = self.fw_mut(*id)?;
                for (key, value) in &action.update_spec {
                    fw.spec.insert(key.clone(), value.clone());
                }
                updated.insert(*id);
            }
        }

        if !action.mod_spec.is_empty() {
            for id in &targets {
                let fw = self.fw_mut(*id)?;
                for dict_mod in &action.mod_spec {
                    apply_mod(dict_mod, &mut fw.spec)?;
                }
                updated.insert(*id);
            }
        }

        if action.defuse_children {
            let mut ids: BTreeSet<i64> = self.links.children(fw_id).iter().copied().collect();
            for child in ids.clone() {
                ids.extend(self.links.descendants(child));
            }
            for id in ids {
                if self.cached_state(id) != State::Completed {
                    self.set_fw_state(id, State::Defused)?;
                    updated.insert(id);
                }
            }
        }

        if action.defuse_workflow {
            for id in self.fw_ids() {
                if !matches!(self.cached_state(id), State::Completed | State::Archived) {
                    self.set_fw_state(id, State::Defused)?;
                    updated.insert(id);
                }
            }
        }

        for detour in &action.detours {
            let grafted = self.graft(detour.clone(), &[fw_id], true)?;
            updated.extend(grafted.new_ids);
        }
        for addition in &action.additions {
            let grafted = self.graft(addition.clone(), &[fw_id], false)?;
            updated.extend(grafted.new_ids);
        }

        if !updated.is_empty() {
            debug!(fw_id, touched = updated.len(), "Applied FWAction");
        }
        Ok(updated)
    }

    /// Graft `new_wf` under `parent_fw_ids` and refresh the new fireworks.
    ///
    /// With `detour`, the parents' current children move under the new workflow's
    /// leaves. With `pull_spec_mods`, the `update_spec` and `mod_spec` of COMPLETED
    /// parents are re-applied to the new roots. Returns every id that was modified or
    /// created.
    pub fn append_wf(
        &mut self,
        new_wf: Workflow,
        parent_fw_ids: &[i64],
        detour: bool,
        pull_spec_mods: bool,
    ) -> Result<BTreeSet<i64>> {
        let grafted = self.graft(new_wf, parent_fw_ids, detour)?;

        if pull_spec_mods {
            for parent in parent_fw_ids {
                let action = self
                    .fw(*parent)
                    .and_then(|fw| fw.representative_launch())
                    .filter(|l| l.state() == State::Completed)
                    .and_then(|l| l.action.clone());
                let Some(action) = action else { continue };
                for root in &grafted.roots {
                    let fw = self.fw_mut(*root)?;
                    for (key, value) in &action.update_spec {
                        fw.spec.insert(key.clone(), value.clone());
                    }
                    for dict_mod in &action.mod_spec {
                        apply_mod(dict_mod, &mut fw.spec)?;
                    }
                }
            }
        }

        let mut updated: BTreeSet<i64> = grafted.new_ids.iter().copied().collect();
        updated.extend(parent_fw_ids.iter().copied());
        updated.extend(self.refresh_from(grafted.new_ids)?);
        Ok(updated)
    }

    fn graft(&mut self, mut new_wf: Workflow, parent_fw_ids: &[i64], detour: bool) -> Result<Grafted> {
        if let Some(bad) = new_wf.fw_ids().into_iter().find(|id| *id >= 0) {
            return Err(CoreError::invalid_graph(format!(
                "fireworks to add must use a negative fw_id, got {}",
                bad
            )));
        }
        for parent in parent_fw_ids {
            if !self.contains(*parent) {
                return Err(CoreError::FireworkNotFound { fw_id: *parent });
            }
        }

        if detour {
            for parent in parent_fw_ids {
                if let Some(child) = self
                    .links
                    .children(*parent)
                    .iter()
                    .find(|c| self.cached_state(**c).rank() >= State::Ready.rank())
                {
                    return Err(CoreError::invalid_graph(format!(
                        "fw_id {}: detours require every child to be below READY, but child {} is {}",
                        parent,
                        child,
                        self.cached_state(*child)
                    )));
                }
            }
        }

        // Fresh placeholders below anything already in this workflow.
        let floor = self.id_fw.keys().next().copied().unwrap_or(0).min(0);
        let remap: HashMap<i64, i64> = new_wf
            .fw_ids()
            .into_iter()
            .zip((1..).map(|i| floor - i))
            .collect();
        new_wf.reassign_ids(&remap);

        let roots = new_wf.root_fw_ids();
        let leaves = new_wf.leaf_fw_ids();
        let new_ids = new_wf.fw_ids();

        for id in &new_ids {
            self.links.add_node(*id);
            for child in new_wf.links.children(*id) {
                self.links.add_edge(*id, *child);
            }
        }
        for mut fw in new_wf.into_fws() {
            fw.state = State::Waiting;
            self.fw_states.insert(fw.fw_id, State::Waiting);
            self.id_fw.insert(fw.fw_id, fw);
        }

        for parent in parent_fw_ids {
            if detour {
                let orphans = self.links.children(*parent).to_vec();
                for child in orphans {
                    for leaf in &leaves {
                        self.links.add_edge(*leaf, child);
                    }
                    self.links.remove_edge(*parent, child);
                }
            }
            for root in &roots {
                self.links.add_edge(*parent, *root);
            }
        }

        Ok(Grafted { new_ids, roots })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::model::{FWorker, Firework, Launch};
    use serde_json::{Map, json};

    fn fw(id: i64) -> Firework {
        Firework::new(vec![], Map::new()).with_id(id)
    }

    fn finish(wf: &mut Workflow, fw_id: i64, action: FWAction) -> BTreeSet<i64> {
        let mut l = Launch::new(fw_id, fw_id, State::Running, "/tmp", FWorker::new("w"), vec![]);
        l.set_state(State::Completed);
        l.action = Some(action);
        wf.fw_mut(fw_id).unwrap().launches.push(l);
        wf.refresh(fw_id).unwrap()
    }

    fn chain(n: i64) -> Workflow {
        let mut wf = Workflow::chain((1..=n).map(fw).collect(), None).unwrap();
        wf.refresh(1).unwrap();
        wf
    }

    #[test]
    fn test_addition_becomes_ready_child() {
        let mut wf = chain(1);
        let addition = Workflow::from_firework(fw(-1).with_name("extra"));
        let updated = finish(&mut wf, 1, FWAction::new().with_addition(addition));

        let new_id = wf.placeholder_ids()[0];
        assert!(updated.contains(&new_id));
        assert_eq!(wf.links().children(1), &[new_id]);
        assert_eq!(wf.fw_states()[&new_id], State::Ready);
        assert_eq!(wf.fw(new_id).unwrap().name, "extra");
    }

    #[test]
    fn test_detour_reparents_children() {
        let mut wf = chain(2);
        let detour = Workflow::from_firework(fw(-5));
        finish(&mut wf, 1, FWAction::new().with_detour(detour));

        let d = wf.placeholder_ids()[0];
        assert_eq!(wf.links().children(1), &[d]);
        assert_eq!(wf.links().children(d), &[2]);
        assert_eq!(wf.fw_states()[&d], State::Ready);
        assert_eq!(wf.fw_states()[&2], State::Waiting);
    }

    #[test]
    fn test_detour_refuses_ready_children() {
        let mut wf = Workflow::new(
            vec![fw(1), fw(2), fw(3)],
            BTreeMap::from([(1, vec![3])]),
            None,
            Map::new(),
        )
        .unwrap();
        wf.refresh_from([1, 2]).unwrap();
        // 3 is READY once 1 completes, so detouring from 1 afterwards must fail
        finish(&mut wf, 1, FWAction::new());
        let err = wf
            .append_wf(Workflow::from_firework(fw(-1)), &[1], true, false)
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_GRAPH");
    }

    #[test]
    fn test_positive_ids_rejected() {
        let mut wf = chain(1);
        let err = wf
            .append_wf(Workflow::from_firework(fw(7)), &[1], false, false)
            .unwrap_err();
        assert!(err.to_string().contains("negative"));
    }

    #[test]
    fn test_update_spec_children_only_unless_propagate() {
        let mut wf = chain(3);
        finish(&mut wf, 1, FWAction::new().with_update_spec("x", json!(1)));
        assert_eq!(wf.fw(2).unwrap().spec["x"], json!(1));
        assert!(!wf.fw(3).unwrap().spec.contains_key("x"));

        let mut wf = chain(3);
        let mut action = FWAction::new().with_update_spec("x", json!(2));
        action.propagate = true;
        finish(&mut wf, 1, action);
        assert_eq!(wf.fw(3).unwrap().spec["x"], json!(2));
    }

    #[test]
    fn test_defuse_children_and_workflow() {
        let mut wf = chain(3);
        let action = FWAction {
            defuse_children: true,
            ..Default::default()
        };
        finish(&mut wf, 1, action);
        assert_eq!(wf.fw_states()[&2], State::Defused);
        assert_eq!(wf.fw_states()[&3], State::Defused);
        assert_eq!(wf.state(), State::Defused);

        let mut wf = Workflow::new(
            vec![fw(1), fw(2), fw(3)],
            BTreeMap::from([(1, vec![2])]),
            None,
            Map::new(),
        )
        .unwrap();
        wf.refresh_from([1, 3]).unwrap();
        let action = FWAction {
            defuse_workflow: true,
            ..Default::default()
        };
        finish(&mut wf, 1, action);
        assert_eq!(wf.fw_states()[&1], State::Completed);
        assert_eq!(wf.fw_states()[&2], State::Defused);
        assert_eq!(wf.fw_states()[&3], State::Defused);
    }

    #[test]
    fn test_append_pulls_spec_mods() {
        let mut wf = chain(1);
        finish(
            &mut wf,
            1,
            FWAction::new().with_mod_spec(json!({"_push": {"inputs": "a"}})),
        );
        let updated = wf
            .append_wf(Workflow::from_firework(fw(-1)), &[1], false, true)
            .unwrap();
        let new_id = wf.placeholder_ids()[0];
        assert!(updated.contains(&1));
        assert_eq!(wf.fw(new_id).unwrap().spec["inputs"], json!(["a"]));
        assert_eq!(wf.fw_states()[&new_id], State::Ready);
    }
}
