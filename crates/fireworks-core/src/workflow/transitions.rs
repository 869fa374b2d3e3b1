// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Administrative state changes: rerun, hold and release.

use std::collections::BTreeSet;

use super::Workflow;
use crate::error::Result;
use crate::model::State;

impl Workflow {
    /// Archive the launches of `fw_id`, send it back to WAITING and rerun every child
    /// that left WAITING, recursively.
    pub fn rerun_fw(&mut self, fw_id: i64, except_details: bool) -> Result<BTreeSet<i64>> {
        let mut updated = BTreeSet::new();
        let mut stack = vec![fw_id];
        let mut seen = BTreeSet::new();

        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            self.fw_mut(id)?.rerun(except_details);
            self.fw_states.insert(id, State::Waiting);
            updated.insert(id);
            // Parent state must settle before the children are looked at.
            updated.extend(self.refresh(id)?);

            for child in self.links.children(id).iter().rev() {
                if self.id_fw[child].state != State::Waiting {
                    stack.push(*child);
                }
            }
        }
        Ok(updated)
    }

    /// Put `fw_id` into a held state (PAUSED, DEFUSED or ARCHIVED) and let it spread.
    pub fn hold_fw(&mut self, fw_id: i64, held: State) -> Result<BTreeSet<i64>> {
        self.set_fw_state(fw_id, held)?;
        let mut updated = self.refresh(fw_id)?;
        updated.insert(fw_id);
        Ok(updated)
    }

    /// Undo [`Workflow::hold_fw`]: `fw_id` and the descendants still in `held` go back to
    /// WAITING, then everything is recomputed from `fw_id`.
    pub fn release_fw(&mut self, fw_id: i64, held: State) -> Result<BTreeSet<i64>> {
        let mut updated = BTreeSet::new();
        let scope = std::iter::once(fw_id).chain(self.links.descendants(fw_id));
        for id in scope.collect::<Vec<_>>() {
            if self.fw_mut(id)?.state == held {
                self.set_fw_state(id, State::Waiting)?;
                updated.insert(id);
            }
        }
        updated.extend(self.refresh(fw_id)?);
        Ok(updated)
    }

    /// Archive every firework.
    pub fn archive_all(&mut self) -> Result<BTreeSet<i64>> {
        let ids = self.fw_ids();
        for id in &ids {
            self.set_fw_state(*id, State::Archived)?;
        }
        let mut updated = self.refresh_from(self.root_fw_ids())?;
        updated.extend(ids);
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::Map;

    use crate::model::{FWAction, FWorker, Firework, Launch, State};
    use crate::workflow::Workflow;

    fn fw(id: i64) -> Firework {
        Firework::new(vec![], Map::new()).with_id(id)
    }

    fn diamond() -> Workflow {
        let links = BTreeMap::from([(1, vec![2, 3]), (2, vec![4]), (3, vec![4])]);
        let mut wf = Workflow::new(vec![fw(1), fw(2), fw(3), fw(4)], links, None, Map::new()).unwrap();
        wf.refresh(1).unwrap();
        wf
    }

    fn finish(wf: &mut Workflow, fw_id: i64, state: State) {
        let mut launch = Launch::new(fw_id * 10, fw_id, State::Running, "", FWorker::new("w"), vec![]);
        launch.set_state(state);
        launch.action = Some(FWAction::new());
        let fw = wf.fw_mut(fw_id).unwrap();
        fw.launches.push(launch);
        wf.refresh(fw_id).unwrap();
    }

    #[test]
    fn test_rerun_resets_completed_subtree() {
        let mut wf = diamond();
        finish(&mut wf, 1, State::Completed);
        finish(&mut wf, 2, State::Completed);
        assert_eq!(wf.fw_states()[&3], State::Ready);

        let updated = wf.rerun_fw(1, true).unwrap();
        assert!(updated.contains(&1) && updated.contains(&2));
        assert_eq!(wf.fw(1).unwrap().state, State::Ready);
        assert_eq!(wf.fw(2).unwrap().state, State::Waiting);
        assert_eq!(wf.fw(3).unwrap().state, State::Waiting);
        assert_eq!(wf.fw(2).unwrap().archived_launches.len(), 1);
        assert!(wf.fw(1).unwrap().launches.is_empty());
    }

    #[test]
    fn test_hold_and_release() {
        let mut wf = diamond();
        wf.hold_fw(1, State::Defused).unwrap();
        assert_eq!(wf.fw_states()[&1], State::Defused);
        assert_eq!(wf.fw_states()[&4], State::Defused);
        assert_eq!(wf.state(), State::Defused);

        wf.release_fw(1, State::Defused).unwrap();
        assert_eq!(wf.fw_states()[&1], State::Ready);
        assert_eq!(wf.fw_states()[&2], State::Waiting);
        assert_eq!(wf.fw_states()[&4], State::Waiting);
        assert_eq!(wf.state(), State::Ready);
    }

    #[test]
    fn test_archive_all() {
        let mut wf = diamond();
        finish(&mut wf, 1, State::Completed);
        wf.archive_all().unwrap();
        assert!(wf.fw_states().values().all(|s| *s == State::Archived));
        assert_eq!(wf.state(), State::Archived);
    }
}
