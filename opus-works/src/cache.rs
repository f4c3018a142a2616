//! Process-wide work graph cache
//!
//! Nodes live in an arena of slots, each behind its own mutex. A key index
//! maps every [`WorkKey`] ever used (including keys that were later merged
//! away) to a slot. Merged slots forward to their survivor, union-find style,
//! so stale keys held elsewhere still resolve to the merged node.
//!
//! **Locking:** structural changes (insert, merge, re-key) take the index
//! write lock. Node reads and updates take the index read lock and then only
//! that node's mutex, so unrelated works never contend with each other.
//! Closures passed to [`WorkGraphCache::with_node`] must not call back into
//! the cache.

use crate::types::{Contributor, WorkDates, WorkId, WorkKey, YearRange};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Cached knowledge about one work (or equivalence group of works)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkNode {
    pub key: WorkKey,
    pub names: Vec<String>,
    pub alias: Option<String>,
    /// Absent means "no parent known", which is not the same as top-level
    pub parent: Option<WorkKey>,
    /// Confirmed: every member was looked up and none has a parent
    pub top_level: bool,
    /// Members whose lookup has completed
    pub resolved: BTreeSet<WorkId>,
    pub contributors: Vec<Contributor>,
    pub tags: Vec<String>,
    pub key_signature: Option<String>,
    pub dates: WorkDates,
    pub arrangement: bool,
    pub partial: bool,
    pub medley: bool,
    pub medley_members: Vec<String>,
}

/// Append items not already present, keeping first-seen order
pub fn union_append<T: PartialEq>(dst: &mut Vec<T>, src: impl IntoIterator<Item = T>) {
    for item in src {
        if !dst.contains(&item) {
            dst.push(item);
        }
    }
}

pub fn union_dates(dst: &mut WorkDates, src: &WorkDates) {
    let merge = |d: &mut Vec<YearRange>, s: &[YearRange]| union_append(d, s.iter().copied());
    merge(&mut dst.composed, &src.composed);
    merge(&mut dst.published, &src.published);
    merge(&mut dst.premiered, &src.premiered);
}

impl WorkNode {
    pub fn new(key: WorkKey) -> Self {
        Self {
            key,
            ..Self::default()
        }
    }

    /// Names joined for display
    pub fn display_name(&self) -> String {
        self.names.join("; ")
    }

    pub fn unresolved_members(&self) -> Vec<WorkId> {
        self.key
            .ids()
            .iter()
            .filter(|id| !self.resolved.contains(*id))
            .cloned()
            .collect()
    }

    pub fn all_resolved(&self) -> bool {
        self.key.ids().iter().all(|id| self.resolved.contains(id))
    }

    /// Union another node's knowledge into this one
    fn absorb(&mut self, other: WorkNode) {
        union_append(&mut self.names, other.names);
        if self.alias.is_none() {
            self.alias = other.alias;
        }
        self.parent = match (self.parent.take(), other.parent) {
            (Some(a), Some(b)) => Some(a.union(&b)),
            (a, b) => a.or(b),
        };
        self.resolved.extend(other.resolved);
        union_append(&mut self.contributors, other.contributors);
        union_append(&mut self.tags, other.tags);
        if self.key_signature.is_none() {
            self.key_signature = other.key_signature;
        }
        union_dates(&mut self.dates, &other.dates);
        self.arrangement |= other.arrangement;
        self.partial |= other.partial;
        self.medley |= other.medley;
        union_append(&mut self.medley_members, other.medley_members);
        self.refresh_top_level();
    }

    fn refresh_top_level(&mut self) {
        self.top_level = self.parent.is_none() && self.all_resolved();
    }
}

struct Slot {
    node: Arc<Mutex<WorkNode>>,
    /// Set when this slot was merged into another
    forward: Option<usize>,
}

#[derive(Default)]
struct CacheIndex {
    slots: Vec<Slot>,
    keys: HashMap<WorkKey, usize>,
    members: HashMap<WorkId, BTreeSet<usize>>,
}

impl CacheIndex {
    fn find(&self, mut slot: usize) -> usize {
        while let Some(next) = self.slots[slot].forward {
            slot = next;
        }
        slot
    }

    /// Follow forwards and shorten the chain for later lookups
    fn find_compress(&mut self, slot: usize) -> usize {
        let root = self.find(slot);
        let mut current = slot;
        while let Some(next) = self.slots[current].forward {
            if next != root {
                self.slots[current].forward = Some(root);
            }
            current = next;
        }
        root
    }

    fn slot_of(&self, key: &WorkKey) -> Option<usize> {
        self.keys.get(key).map(|&s| self.find(s))
    }

    fn index_members(&mut self, key: &WorkKey, slot: usize) {
        for id in key.ids() {
            self.members.entry(id.clone()).or_default().insert(slot);
        }
    }

    fn insert(&mut self, key: &WorkKey) -> usize {
        if let Some(&slot) = self.keys.get(key) {
            return self.find_compress(slot);
        }
        let slot = self.slots.len();
        self.slots.push(Slot {
            node: Arc::new(Mutex::new(WorkNode::new(key.clone()))),
            forward: None,
        });
        self.keys.insert(key.clone(), slot);
        self.index_members(key, slot);
        debug!(key = %key, "Cache node created");
        slot
    }

    /// Give the node in `slot` a wider key, merging with any node that already owns it
    fn rekey(&mut self, slot: usize, target: &WorkKey) -> usize {
        match self.slot_of(target) {
            Some(existing) if existing == slot => slot,
            Some(existing) => {
                let absorbed = std::mem::take(&mut *lock(&self.slots[slot].node));
                let previous_key = absorbed.key.clone();
                lock(&self.slots[existing].node).absorb(absorbed);
                self.slots[slot].forward = Some(existing);
                for ids in self.members.values_mut() {
                    if ids.remove(&slot) {
                        ids.insert(existing);
                    }
                }
                debug!(from = %previous_key, into = %target, "Cache nodes merged");
                existing
            }
            None => {
                {
                    let mut node = lock(&self.slots[slot].node);
                    debug!(from = %node.key, to = %target, "Cache key widened");
                    node.key = target.clone();
                    node.refresh_top_level();
                }
                self.keys.insert(target.clone(), slot);
                self.index_members(target, slot);
                slot
            }
        }
    }
}

fn lock(node: &Mutex<WorkNode>) -> MutexGuard<'_, WorkNode> {
    node.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared, concurrently accessible work graph
#[derive(Default)]
pub struct WorkGraphCache {
    index: RwLock<CacheIndex>,
}

impl std::fmt::Debug for WorkGraphCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkGraphCache")
            .field("nodes", &self.len())
            .finish()
    }
}

impl WorkGraphCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheIndex> {
        self.index.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheIndex> {
        self.index.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of live (non-merged) nodes
    pub fn len(&self) -> usize {
        self.read()
            .slots
            .iter()
            .filter(|s| s.forward.is_none())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &WorkKey) -> bool {
        self.read().keys.contains_key(key)
    }

    /// Current key of the node `key` refers to (differs after a merge)
    pub fn canonical_key(&self, key: &WorkKey) -> Option<WorkKey> {
        self.with_node(key, |n| n.key.clone())
    }

    /// Create the node if needed and return its canonical key
    pub fn ensure(&self, key: &WorkKey) -> WorkKey {
        if let Some(canonical) = self.canonical_key(key) {
            return canonical;
        }
        let mut index = self.write();
        let slot = index.insert(key);
        let canonical = lock(&index.slots[slot].node).key.clone();
        canonical
    }

    /// Run `f` with exclusive access to one node
    pub fn with_node<R>(&self, key: &WorkKey, f: impl FnOnce(&mut WorkNode) -> R) -> Option<R> {
        let index = self.read();
        let slot = index.slot_of(key)?;
        let mut node = lock(&index.slots[slot].node);
        Some(f(&mut node))
    }

    /// Snapshot of a node
    pub fn get(&self, key: &WorkKey) -> Option<WorkNode> {
        self.with_node(key, |n| n.clone())
    }

    /// Cached parent, canonicalised
    pub fn get_parent(&self, key: &WorkKey) -> Option<WorkKey> {
        let parent = self.with_node(key, |n| n.parent.clone())??;
        Some(self.canonical_key(&parent).unwrap_or(parent))
    }

    pub fn is_top_level(&self, key: &WorkKey) -> bool {
        self.with_node(key, |n| n.top_level).unwrap_or(false)
    }

    /// Canonical keys of every node that has `id` as a member
    pub fn keys_containing(&self, id: &str) -> Vec<WorkKey> {
        let index = self.read();
        let Some(slots) = index.members.get(id) else {
            return Vec::new();
        };
        let live: BTreeSet<usize> = slots.iter().map(|&s| index.find(s)).collect();
        live.into_iter()
            .map(|s| lock(&index.slots[s].node).key.clone())
            .collect()
    }

    pub fn merge_names<I, S>(&self, key: &WorkKey, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names
            .into_iter()
            .map(Into::into)
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();
        self.ensure(key);
        self.with_node(key, |n| union_append(&mut n.names, names));
    }

    pub fn merge_tags(&self, key: &WorkKey, tags: &[String]) {
        self.ensure(key);
        self.with_node(key, |n| union_append(&mut n.tags, tags.iter().cloned()));
    }

    pub fn merge_dates(&self, key: &WorkKey, dates: &WorkDates) {
        self.ensure(key);
        self.with_node(key, |n| union_dates(&mut n.dates, dates));
    }

    pub fn merge_contributors(&self, key: &WorkKey, contributors: &[Contributor]) {
        self.ensure(key);
        self.with_node(key, |n| union_append(&mut n.contributors, contributors.iter().cloned()));
    }

    /// Record `parent` as (part of) the parent of `key`
    ///
    /// If `key` already has a different parent, the parent node is re-keyed
    /// to the union of both identifier sets (merging with any node already
    /// holding that key). Returns the canonical parent key.
    pub fn record_parent(&self, key: &WorkKey, parent: &WorkKey, names: &[String]) -> WorkKey {
        let mut index = self.write();
        let child_slot = index.insert(key);

        let existing = lock(&index.slots[child_slot].node).parent.clone();
        let existing = existing.map(|e| {
            let slot = index.insert(&e);
            (slot, lock(&index.slots[slot].node).key.clone())
        });

        let parent_slot = match existing {
            Some((slot, current)) if current.is_superset_of(parent) => slot,
            Some((slot, current)) => index.rekey(slot, &current.union(parent)),
            None => index.insert(parent),
        };

        let parent_key = {
            let mut node = lock(&index.slots[parent_slot].node);
            union_append(
                &mut node.names,
                names.iter().map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
            );
            node.key.clone()
        };

        // The child may itself have been merged into the parent slot above
        let child_slot = index.find_compress(child_slot);
        if child_slot != parent_slot {
            let mut child = lock(&index.slots[child_slot].node);
            child.parent = Some(parent_key.clone());
            child.top_level = false;
        }
        debug!(key = %key, parent = %parent_key, "Parent recorded");
        parent_key
    }

    /// Mark `key` as confirmed top-level
    pub fn record_top_level(&self, key: &WorkKey) {
        self.ensure(key);
        self.with_node(key, |n| {
            n.parent = None;
            n.resolved.extend(n.key.ids().iter().cloned());
            n.top_level = true;
        });
    }

    /// Note that the lookup for member `id` of `key` completed
    ///
    /// Returns true when this leaves the node confirmed top-level.
    pub fn mark_resolved(&self, key: &WorkKey, id: &str) -> bool {
        self.with_node(key, |n| {
            if n.key.contains(id) {
                n.resolved.insert(id.to_string());
            }
            n.refresh_top_level();
            n.top_level
        })
        .unwrap_or(false)
    }

    /// Walk parents from `key`; stops at a top-level node, a gap or a repeat
    pub fn ancestors(&self, key: &WorkKey) -> Vec<WorkKey> {
        let mut chain = Vec::new();
        let mut seen = BTreeSet::new();
        let mut current = self.canonical_key(key);
        while let Some(k) = current {
            if !seen.insert(k.clone()) {
                break;
            }
            current = self.get_parent(&k);
            chain.push(k);
        }
        chain
    }
}
