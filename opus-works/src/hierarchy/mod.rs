//! Per-release hierarchy assembly
//!
//! Once every lookup a release depends on has finished, its tracks' ancestor
//! chains are inverted into a [`Trackback`] tree and walked top-down to give
//! each track its per-level work and part names.

pub mod assembler;
pub mod tree;

pub use assembler::HierarchyAssembler;
pub use tree::{Trackback, TreeNode};

use crate::cache::{WorkGraphCache, WorkNode};
use crate::types::WorkKey;
use std::collections::{BTreeSet, HashMap};

/// Work data seen by one release: the shared cache under release-local nodes
///
/// Local nodes (uncached partial-recording shadows) take precedence over the
/// cache. Name overrides discovered while reconciling a release stay local
/// to that release.
pub struct ReleaseView<'a> {
    cache: &'a WorkGraphCache,
    local: &'a HashMap<WorkKey, WorkNode>,
    names: HashMap<WorkKey, String>,
}

impl<'a> ReleaseView<'a> {
    pub fn new(cache: &'a WorkGraphCache, local: &'a HashMap<WorkKey, WorkNode>) -> Self {
        Self {
            cache,
            local,
            names: HashMap::new(),
        }
    }

    pub fn node(&self, key: &WorkKey) -> Option<WorkNode> {
        self.local
            .get(key)
            .cloned()
            .or_else(|| self.cache.get(key))
    }

    pub fn parent(&self, key: &WorkKey) -> Option<WorkKey> {
        match self.local.get(key) {
            Some(node) => node
                .parent
                .as_ref()
                .map(|p| self.cache.canonical_key(p).unwrap_or_else(|| p.clone())),
            None => self.cache.get_parent(key),
        }
    }

    /// Display names of a work, honouring release-local overrides
    pub fn names(&self, key: &WorkKey) -> Vec<String> {
        if let Some(name) = self.names.get(key) {
            return vec![name.clone()];
        }
        self.node(key).map(|n| n.names).unwrap_or_default()
    }

    pub fn name(&self, key: &WorkKey) -> String {
        self.names(key).join("; ")
    }

    pub fn set_name(&mut self, key: &WorkKey, name: impl Into<String>) {
        self.names.insert(key.clone(), name.into());
    }

    /// Ancestor chain from `key` upwards, stopping at a repeated key
    ///
    /// The second value is true when the walk stopped because of a cycle.
    pub fn chain(&self, key: &WorkKey) -> (Vec<WorkKey>, bool) {
        let mut chain = Vec::new();
        let mut seen = BTreeSet::new();
        let mut current = Some(key.clone());
        while let Some(k) = current {
            if !seen.insert(k.clone()) {
                return (chain, true);
            }
            current = self.parent(&k);
            chain.push(k);
        }
        (chain, false)
    }
}
