//! Per-release trackback tree
//!
//! Built from each track's ancestor chain (bottom work first). Child→parent
//! edges are inverted into parent→children lists, then materialised from
//! every root with `height` (distance from the root) and `depth` (longest
//! distance to a leaf) filled in.

use crate::types::{TrackPosition, TrackRef, WorkKey};
use std::collections::{BTreeSet, HashMap};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub key: WorkKey,
    pub children: Vec<usize>,
    /// Tracks whose bottom-level work is this node
    pub tracks: Vec<TrackRef>,
    pub height: usize,
    pub depth: usize,
}

impl TreeNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Arena-backed trackback tree (possibly a forest)
#[derive(Debug, Clone, Default)]
pub struct Trackback {
    pub nodes: Vec<TreeNode>,
    pub roots: Vec<usize>,
    /// Tracks whose chain could not be placed under any root
    pub unplaced: Vec<TrackRef>,
}

impl Trackback {
    /// Build from `(track, chain)` pairs; each chain runs bottom work → top
    pub fn build<'a, I>(chains: I) -> Self
    where
        I: IntoIterator<Item = (&'a TrackRef, &'a [WorkKey])>,
    {
        let mut tree = Trackback::default();
        let mut index: HashMap<WorkKey, usize> = HashMap::new();
        let mut parent_of: HashMap<usize, usize> = HashMap::new();
        let mut first_seen: HashMap<usize, TrackPosition> = HashMap::new();
        let mut bottoms: Vec<(TrackRef, usize)> = Vec::new();

        let mut node_for = |tree: &mut Trackback, key: &WorkKey| -> usize {
            *index.entry(key.clone()).or_insert_with(|| {
                tree.nodes.push(TreeNode {
                    key: key.clone(),
                    children: Vec::new(),
                    tracks: Vec::new(),
                    height: 0,
                    depth: 0,
                });
                tree.nodes.len() - 1
            })
        };

        for (track, chain) in chains {
            let Some(bottom) = chain.first() else {
                continue;
            };
            let bottom = node_for(&mut tree, bottom);
            tree.nodes[bottom].tracks.push(track.clone());
            bottoms.push((track.clone(), bottom));

            let mut child = bottom;
            for key in &chain[1..] {
                let parent = node_for(&mut tree, key);
                let position = track.position;
                first_seen
                    .entry(child)
                    .and_modify(|p| *p = (*p).min(position))
                    .or_insert(position);
                // First recorded edge wins; a node has one parent per release
                parent_of.entry(child).or_insert(parent);
                child = parent;
            }
            first_seen
                .entry(child)
                .and_modify(|p| *p = (*p).min(track.position))
                .or_insert(track.position);
        }

        let mut children: HashMap<usize, Vec<usize>> = HashMap::new();
        for (&child, &parent) in &parent_of {
            children.entry(parent).or_default().push(child);
        }
        let order = |n: &usize| (first_seen.get(n).copied(), *n);
        for list in children.values_mut() {
            list.sort_by_key(order);
        }
        for (node, list) in children {
            tree.nodes[node].children = list;
        }

        let mut roots: Vec<usize> = (0..tree.nodes.len())
            .filter(|n| !parent_of.contains_key(n))
            .collect();
        roots.sort_by_key(order);
        tree.roots = roots;

        let mut placed = BTreeSet::new();
        for root in tree.roots.clone() {
            let mut visiting = BTreeSet::new();
            tree.level_calc(root, 0, &mut visiting, &mut placed);
        }
        for (track, bottom) in bottoms {
            if !placed.contains(&bottom) {
                warn!(track = %track, "Track work is not reachable from any top-level work");
                tree.unplaced.push(track);
            }
        }
        tree
    }

    /// Assign heights top-down and return the depth of `node`
    fn level_calc(
        &mut self,
        node: usize,
        height: usize,
        visiting: &mut BTreeSet<usize>,
        placed: &mut BTreeSet<usize>,
    ) -> usize {
        if !visiting.insert(node) {
            return 0;
        }
        placed.insert(node);
        self.nodes[node].height = height;
        let mut depth = 0;
        for child in self.nodes[node].children.clone() {
            depth = depth.max(self.level_calc(child, height + 1, visiting, placed) + 1);
        }
        self.nodes[node].depth = depth;
        visiting.remove(&node);
        depth
    }

    pub fn node(&self, index: usize) -> &TreeNode {
        &self.nodes[index]
    }

    pub fn find(&self, key: &WorkKey) -> Option<usize> {
        self.nodes.iter().position(|n| &n.key == key)
    }
}
