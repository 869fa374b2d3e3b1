// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Parent/child adjacency of a workflow.
//!
//! Only forward edges are authoritative. The reverse index is rebuilt after every
//! mutation and on deserialization, so it is always the transpose of the forward map.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Forward adjacency (parent → children) with a derived reverse index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<i64, Vec<i64>>", into = "BTreeMap<i64, Vec<i64>>")]
pub struct Links {
    links: BTreeMap<i64, Vec<i64>>,
    parent_links: BTreeMap<i64, Vec<i64>>,
}

impl From<BTreeMap<i64, Vec<i64>>> for Links {
    fn from(links: BTreeMap<i64, Vec<i64>>) -> Self {
        let mut out = Links {
            links: BTreeMap::new(),
            parent_links: BTreeMap::new(),
        };
        for (parent, children) in links {
            out.links.entry(parent).or_default();
            for child in children {
                out.links.entry(child).or_default();
                let edges = out.links.entry(parent).or_default();
                if !edges.contains(&child) {
                    edges.push(child);
                }
            }
        }
        out.rebuild_parents();
        out
    }
}

impl From<Links> for BTreeMap<i64, Vec<i64>> {
    fn from(links: Links) -> Self {
        links.links
    }
}

impl Links {
    /// An empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    fn rebuild_parents(&mut self) {
        let mut parents: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        for (parent, children) in &self.links {
            for child in children {
                parents.entry(*child).or_default().push(*parent);
            }
        }
        self.parent_links = parents;
    }

    /// All node ids.
    pub fn nodes(&self) -> Vec<i64> {
        self.links.keys().copied().collect()
    }

    /// Whether `fw_id` is a node.
    pub fn contains(&self, fw_id: i64) -> bool {
        self.links.contains_key(&fw_id)
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// True without nodes.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Add an isolated node.
    pub fn add_node(&mut self, fw_id: i64) {
        self.links.entry(fw_id).or_default();
    }

    /// Add `parent → child`, creating missing nodes.
    pub fn add_edge(&mut self, parent: i64, child: i64) {
        self.links.entry(child).or_default();
        let children = self.links.entry(parent).or_default();
        if !children.contains(&child) {
            children.push(child);
        }
        self.rebuild_parents();
    }

    /// Remove `parent → child` if present.
    pub fn remove_edge(&mut self, parent: i64, child: i64) {
        if let Some(children) = self.links.get_mut(&parent) {
            children.retain(|c| *c != child);
        }
        self.rebuild_parents();
    }

    /// Remove a node and every incident edge.
    pub fn remove_node(&mut self, fw_id: i64) {
        self.links.remove(&fw_id);
        for children in self.links.values_mut() {
            children.retain(|c| *c != fw_id);
        }
        self.rebuild_parents();
    }

    /// Direct children.
    pub fn children(&self, fw_id: i64) -> &[i64] {
        self.links.get(&fw_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Direct parents.
    pub fn parents(&self, fw_id: i64) -> &[i64] {
        self.parent_links
            .get(&fw_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The reverse index.
    pub fn parent_links(&self) -> &BTreeMap<i64, Vec<i64>> {
        &self.parent_links
    }

    /// Nodes without parents.
    pub fn roots(&self) -> Vec<i64> {
        self.links
            .keys()
            .filter(|id| self.parents(**id).is_empty())
            .copied()
            .collect()
    }

    /// Nodes without children.
    pub fn leaves(&self) -> Vec<i64> {
        self.links
            .iter()
            .filter(|(_, children)| children.is_empty())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Every node reachable from `fw_id` through forward edges, excluding `fw_id`.
    pub fn descendants(&self, fw_id: i64) -> BTreeSet<i64> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<i64> = self.children(fw_id).iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            if seen.insert(id) {
                queue.extend(self.children(id).iter().copied());
            }
        }
        seen
    }

    /// Nodes in an order where every parent precedes its children.
    pub fn topological_order(&self) -> Result<Vec<i64>> {
        let mut indegree: BTreeMap<i64, usize> = self
            .links
            .keys()
            .map(|id| (*id, self.parents(*id).len()))
            .collect();
        let mut queue: VecDeque<i64> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.links.len());

        while let Some(id) = queue.pop_front() {
            order.push(id);
            for child in self.children(id) {
                if let Some(d) = indegree.get_mut(child) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(*child);
                    }
                }
            }
        }

        if order.len() != self.links.len() {
            let stuck: Vec<i64> = indegree
                .iter()
                .filter(|(_, d)| **d > 0)
                .map(|(id, _)| *id)
                .collect();
            return Err(CoreError::invalid_graph(format!(
                "cycle detected among fw_ids {:?}",
                stuck
            )));
        }
        Ok(order)
    }

    /// Rewrite every id through `old_new`; ids not in the map are kept.
    pub fn reassign_ids(&mut self, old_new: &HashMap<i64, i64>) {
        let map = |id: i64| old_new.get(&id).copied().unwrap_or(id);
        self.links = std::mem::take(&mut self.links)
            .into_iter()
            .map(|(parent, children)| (map(parent), children.into_iter().map(map).collect()))
            .collect();
        self.rebuild_parents();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> Links {
        let mut l = Links::new();
        l.add_edge(1, 2);
        l.add_edge(1, 3);
        l.add_edge(2, 4);
        l.add_edge(3, 4);
        l
    }

    fn is_transpose(l: &Links) -> bool {
        l.nodes().iter().all(|p| {
            l.children(*p).iter().all(|c| l.parents(*c).contains(p))
        }) && l.parent_links().iter().all(|(c, ps)| {
            ps.iter().all(|p| l.children(*p).contains(c))
        })
    }

    #[test]
    fn test_roots_leaves_parents() {
        let l = diamond();
        assert_eq!(l.roots(), vec![1]);
        assert_eq!(l.leaves(), vec![4]);
        assert_eq!(l.parents(4), &[2, 3]);
        assert_eq!(l.descendants(1), BTreeSet::from([2, 3, 4]));
        assert!(is_transpose(&l));
    }

    #[test]
    fn test_remove_node_drops_edges() {
        let mut l = diamond();
        l.remove_node(2);
        assert_eq!(l.children(1), &[3]);
        assert_eq!(l.parents(4), &[3]);
        assert!(is_transpose(&l));
    }

    #[test]
    fn test_topological_order_and_cycle() {
        let l = diamond();
        let order = l.topological_order().unwrap();
        assert_eq!(order.first(), Some(&1));
        assert_eq!(order.last(), Some(&4));

        let mut cyclic = diamond();
        cyclic.add_edge(4, 1);
        let err = cyclic.topological_order().unwrap_err();
        assert_eq!(err.error_code(), "INVALID_GRAPH");
    }

    #[test]
    fn test_reassign_ids() {
        let mut l = diamond();
        l.reassign_ids(&HashMap::from([(1, 10), (4, 40)]));
        assert_eq!(l.children(10), &[2, 3]);
        assert_eq!(l.parents(40), &[2, 3]);
        assert!(!l.contains(1));
        assert!(is_transpose(&l));
    }

    #[test]
    fn test_serde_rebuilds_parents() {
        let json = serde_json::to_string(&diamond()).unwrap();
        assert_eq!(json, r#"{"1":[2,3],"2":[4],"3":[4],"4":[]}"#);
        let back: Links = serde_json::from_str(&json).unwrap();
        assert_eq!(back.parents(4), &[2, 3]);
        assert_eq!(back, diamond());
    }
}
