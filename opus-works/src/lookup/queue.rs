//! Deduplicating lookup coordinator
//!
//! At most one request per raw work identifier is in flight. Tracks that need
//! a work already being fetched join its waiter list instead of issuing a new
//! request, and are handed back, in arrival order, when the lookup finishes.
//!
//! Every waiter counts towards its release's outstanding total until the
//! caller settles it, after acting on the completed lookup (successfully or
//! after the retry budget). Completion alone never lowers the total, so a
//! release cannot look finished while a waiter is still being moved on.

use super::{LookupRequest, RequestVariant};
use crate::types::{ReleaseId, TrackRef, WorkId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::debug;

/// Result of registering interest in a work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// First waiter: the caller must issue this request
    Dispatch(LookupRequest),
    /// A request is already in flight; the waiter was added
    Joined,
    /// This waiter was already registered for the work
    AlreadyWaiting,
}

#[derive(Debug, Default)]
struct PendingLookup {
    waiters: Vec<TrackRef>,
    /// Set once the lookup completed; late joiners start a fresh entry
    closed: bool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
pub struct LookupQueue {
    pending: RwLock<HashMap<WorkId, Arc<Mutex<PendingLookup>>>>,
    outstanding: Mutex<HashMap<ReleaseId, usize>>,
}

impl LookupQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, work_id: &str) -> (Arc<Mutex<PendingLookup>>, bool) {
        if let Some(entry) = self
            .pending
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(work_id)
        {
            return (Arc::clone(entry), false);
        }
        let mut pending = self.pending.write().unwrap_or_else(|p| p.into_inner());
        match pending.get(work_id) {
            Some(entry) => (Arc::clone(entry), false),
            None => {
                let entry = Arc::new(Mutex::new(PendingLookup::default()));
                pending.insert(work_id.to_string(), Arc::clone(&entry));
                (entry, true)
            }
        }
    }

    /// Register `waiter` as needing `work_id`
    pub fn enqueue(&self, work_id: &str, waiter: TrackRef, variant: RequestVariant) -> EnqueueOutcome {
        loop {
            let (entry, created) = self.entry(work_id);
            let mut pending = lock(&entry);
            if pending.closed {
                continue;
            }
            if pending.waiters.contains(&waiter) {
                return EnqueueOutcome::AlreadyWaiting;
            }
            pending.waiters.push(waiter.clone());
            *lock(&self.outstanding).entry(waiter.release.clone()).or_insert(0) += 1;

            return if created {
                debug!(work_id, waiter = %waiter, "Lookup requested");
                EnqueueOutcome::Dispatch(LookupRequest::new(work_id, variant))
            } else {
                debug!(work_id, waiter = %waiter, "Joined in-flight lookup");
                EnqueueOutcome::Joined
            };
        }
    }

    /// Finish the lookup for `work_id`, returning its waiters in arrival order
    ///
    /// The waiters stay outstanding until passed to [`LookupQueue::settle`].
    pub fn complete(&self, work_id: &str) -> Vec<TrackRef> {
        let entry = self
            .pending
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(work_id);
        let Some(entry) = entry else {
            return Vec::new();
        };

        let mut pending = lock(&entry);
        pending.closed = true;
        let waiters = std::mem::take(&mut pending.waiters);
        debug!(work_id, waiters = waiters.len(), "Lookup completed");
        waiters
    }

    /// Stop counting completed waiters against their releases
    pub fn settle(&self, waiters: &[TrackRef]) {
        let mut outstanding = lock(&self.outstanding);
        for waiter in waiters {
            if let Some(count) = outstanding.get_mut(&waiter.release) {
                *count = count.saturating_sub(1);
            }
        }
    }

    pub fn is_pending(&self, work_id: &str) -> bool {
        self.pending
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .contains_key(work_id)
    }

    /// Lookups still awaited by tracks of `release`
    pub fn outstanding(&self, release: &ReleaseId) -> usize {
        lock(&self.outstanding).get(release).copied().unwrap_or(0)
    }

    /// Drop every waiter belonging to `release`
    pub fn forget_release(&self, release: &ReleaseId) {
        let entries: Vec<_> = self
            .pending
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect();
        for entry in entries {
            lock(&entry).waiters.retain(|w| &w.release != release);
        }
        lock(&self.outstanding).remove(release);
    }
}
