//! Release processing
//!
//! Tracks arrive one at a time. Each track's works are registered in the
//! shared cache and every unresolved work on its ancestor chain is looked up
//! through the [`LookupQueue`]. Lookups run as spawned tasks and report back
//! with a [`LookupCompletion`]; the waiting tracks are then re-resolved so the
//! next ancestor gets requested in turn.
//!
//! A release is assembled once it has seen its last track and has no lookups
//! outstanding. The result goes out on the channel returned by
//! [`WorkPartsProcessor::new`].

use crate::cache::{union_append, union_dates, WorkGraphCache, WorkNode};
use crate::config::WorksConfig;
use crate::error::{IssueKind, IssueLog, LookupError, TrackIssue};
use crate::hierarchy::{HierarchyAssembler, ReleaseView, Trackback};
use crate::lookup::{EnqueueOutcome, LookupQueue, LookupRequest, RequestVariant, WorkLookup};
use crate::publish::{ContributorMap, ReleaseWorks, TrackWorks};
use crate::text::{ConfigIssue, TextRules};
use crate::types::{
    ParentRelation, RelationSet, ReleaseId, TrackInput, TrackRef, WorkId, WorkKey, WorkRef,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

/// Result of one dispatched lookup, delivered back to the processor
#[derive(Debug, Clone)]
pub struct LookupCompletion {
    pub request: LookupRequest,
    pub result: Result<RelationSet, LookupError>,
}

#[derive(Debug)]
struct TrackState {
    input: TrackInput,
    /// Working title (composer prefix removed)
    title: String,
    /// Level-0 work: a partial-recording shadow where applicable
    bottom: Option<WorkKey>,
    issues: IssueLog,
}

#[derive(Debug, Default)]
struct ReleaseState {
    tracks: BTreeMap<TrackRef, TrackState>,
    expected_tracks: u32,
    last_seen: bool,
    /// Partial-recording shadows kept out of the shared cache
    local: HashMap<WorkKey, WorkNode>,
    finished: bool,
}

impl ReleaseState {
    /// All tracks seen (lookups are checked separately)
    fn has_all_tracks(&self) -> bool {
        self.last_seen
            && (self.expected_tracks == 0 || self.tracks.len() >= self.expected_tracks as usize)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Remove a "Composer: " prefix from a track title
///
/// Only a prefix equal to one of the composers' surnames (the part of the
/// sort name before the comma) is removed.
pub fn strip_composer_prefix(title: &str, composer_sort_names: &[String]) -> String {
    if let Some((head, tail)) = title.split_once(": ") {
        let head = head.trim().to_lowercase();
        let matched = composer_sort_names.iter().any(|sort_name| {
            let surname = sort_name
                .split_once(',')
                .map_or(sort_name.as_str(), |(surname, _)| surname)
                .trim()
                .to_lowercase();
            !surname.is_empty() && surname == head
        });
        if matched {
            return tail.trim().to_string();
        }
    }
    title.to_string()
}

/// Parents to record for a work, in ordering-key order
///
/// Falls back to the "arrangement of" relations when the work has no parent.
/// The flag is true when that fallback was used.
fn parent_refs(relations: &RelationSet, config: &WorksConfig) -> (Vec<WorkRef>, bool) {
    let mut parents: Vec<&ParentRelation> = relations
        .parents
        .iter()
        .filter(|p| config.include_collections || !p.is_collection())
        .collect();
    parents.sort_by_key(|p| p.ordering_key.unwrap_or(u32::MAX));
    if !parents.is_empty() {
        return (parents.into_iter().map(|p| p.work.clone()).collect(), false);
    }
    if config.arrangements && !relations.arrangement_of.is_empty() {
        return (relations.arrangement_of.clone(), true);
    }
    (Vec::new(), false)
}

/// Drives work hierarchy resolution for any number of releases
pub struct WorkPartsProcessor {
    config: WorksConfig,
    rules: TextRules,
    config_issues: Vec<ConfigIssue>,
    lookup: Arc<dyn WorkLookup>,
    cache: Arc<WorkGraphCache>,
    queue: LookupQueue,
    releases: Mutex<HashMap<ReleaseId, Arc<Mutex<ReleaseState>>>>,
    /// Works whose lookup failed for good, with the issue to attach
    failed: RwLock<HashMap<WorkId, TrackIssue>>,
    in_flight: AtomicUsize,
    idle: Notify,
    output: mpsc::UnboundedSender<ReleaseWorks>,
}

impl WorkPartsProcessor {
    pub fn new(
        config: WorksConfig,
        lookup: Arc<dyn WorkLookup>,
        cache: Arc<WorkGraphCache>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ReleaseWorks>) {
        let (rules, config_issues) = config.text_rules();
        let (output, rx) = mpsc::unbounded_channel();
        let processor = Arc::new(Self {
            config,
            rules,
            config_issues,
            lookup,
            cache,
            queue: LookupQueue::new(),
            releases: Mutex::new(HashMap::new()),
            failed: RwLock::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
            output,
        });
        (processor, rx)
    }

    pub fn cache(&self) -> &Arc<WorkGraphCache> {
        &self.cache
    }

    pub fn config(&self) -> &WorksConfig {
        &self.config
    }

    /// Releases that have tracks but have not been emitted
    pub fn pending_releases(&self) -> Vec<ReleaseId> {
        let mut releases: Vec<ReleaseId> = lock(&self.releases).keys().cloned().collect();
        releases.sort();
        releases
    }

    /// Lookups dispatched and not yet handled
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until no lookups are in flight
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Register a track and request whatever its hierarchy still needs
    ///
    /// Must be called from within a tokio runtime.
    pub fn add_track(self: &Arc<Self>, input: TrackInput) {
        let track = input.track_ref();
        let release = track.release.clone();
        let state = self.release_state(&release);
        {
            let mut state = lock(&state);
            if state.finished {
                warn!(track = %track, "Track arrived after its release was emitted; ignoring");
                return;
            }

            let title = strip_composer_prefix(&input.title, &input.composer_sort_names);
            let mut issues = IssueLog::default();
            for issue in &self.config_issues {
                issues.push(TrackIssue::warning(IssueKind::Configuration, issue.to_string()));
            }
            let bottom = self.register_works(&input, &mut state.local, &mut issues);
            debug!(track = %track, title = %title, bottom = ?bottom.as_ref().map(ToString::to_string), "Track added");

            state.expected_tracks = state.expected_tracks.max(input.release_track_count);
            state.last_seen |= input.is_last_track();
            state.tracks.insert(
                track.clone(),
                TrackState {
                    input,
                    title,
                    bottom,
                    issues,
                },
            );
            self.resolve(&track, &mut state);
        }
        self.try_finish(&release);
    }

    /// Handle the outcome of a dispatched lookup
    pub fn handle_completion(self: &Arc<Self>, completion: LookupCompletion) {
        let LookupCompletion { request, result } = completion;
        let work_id = request.work_id.clone();
        match result {
            Ok(relations) => {
                debug!(work_id = %work_id, parents = relations.parents.len(), "Work lookup succeeded");
                self.apply_relations(&work_id, &relations);
            }
            Err(err) if err.is_retryable() && request.attempt < self.config.max_retries => {
                let variant = if err.is_auth() {
                    RequestVariant::Anonymous
                } else {
                    request.variant
                };
                warn!(
                    work_id = %work_id,
                    attempt = request.attempt + 1,
                    variant = ?variant,
                    error = %err,
                    "Retrying work lookup"
                );
                self.dispatch(request.retry(variant));
                return;
            }
            Err(err) => {
                let attempts = request.attempt + 1;
                let issue = if err.is_retryable() {
                    error!(work_id = %work_id, attempts, error = %err, "Work lookup failed");
                    TrackIssue::error(
                        IssueKind::LookupFailure,
                        format!("Missing metadata for work {work_id}: lookup failed after {attempts} attempts ({err})"),
                    )
                } else {
                    error!(work_id = %work_id, error = %err, "Malformed work lookup response");
                    TrackIssue::error(
                        IssueKind::MalformedRelationData,
                        format!("Relation data for work {work_id} is not in the expected format: {err}"),
                    )
                };
                self.failed
                    .write()
                    .unwrap_or_else(|p| p.into_inner())
                    .insert(work_id.clone(), issue);
            }
        }

        self.flush(&work_id);
    }

    /// Release the waiters of a finished lookup and move their tracks on
    fn flush(self: &Arc<Self>, work_id: &str) {
        let mut by_release: BTreeMap<ReleaseId, Vec<TrackRef>> = BTreeMap::new();
        for waiter in self.queue.complete(work_id) {
            by_release.entry(waiter.release.clone()).or_default().push(waiter);
        }
        for (release, waiters) in by_release {
            match self.existing_release(&release) {
                Some(state) => {
                    let mut state = lock(&state);
                    if !state.finished {
                        for track in &waiters {
                            self.resolve(track, &mut state);
                        }
                    }
                    // Settled under the release lock, after any next lookups are queued
                    self.queue.settle(&waiters);
                }
                None => self.queue.settle(&waiters),
            }
            self.try_finish(&release);
        }
    }

    /// Emit a release with whatever is known now
    ///
    /// Returns false if the release is unknown or was already emitted.
    pub fn abandon_release(&self, release: &ReleaseId) -> bool {
        let Some(state) = self.existing_release(release) else {
            return false;
        };
        let works = {
            let mut state = lock(&state);
            if state.finished {
                return false;
            }
            warn!(
                release = %release,
                tracks = state.tracks.len(),
                outstanding = self.queue.outstanding(release),
                "Abandoning incomplete release"
            );
            state.finished = true;
            self.assemble(release, &state, true)
        };
        self.finish(release, works);
        true
    }

    fn release_state(&self, release: &ReleaseId) -> Arc<Mutex<ReleaseState>> {
        let mut releases = lock(&self.releases);
        Arc::clone(releases.entry(release.clone()).or_insert_with(|| {
            info!(release = %release, "Release started");
            Arc::new(Mutex::new(ReleaseState::default()))
        }))
    }

    fn existing_release(&self, release: &ReleaseId) -> Option<Arc<Mutex<ReleaseState>>> {
        lock(&self.releases).get(release).cloned()
    }

    /// Put a track's works into the cache and return its level-0 key
    fn register_works(
        &self,
        input: &TrackInput,
        local: &mut HashMap<WorkKey, WorkNode>,
        issues: &mut IssueLog,
    ) -> Option<WorkKey> {
        if input.works.is_empty() {
            issues.push(TrackIssue::warning(
                IssueKind::Ambiguity,
                format!("No works linked to recording {}", input.recording_id),
            ));
            return None;
        }

        let mut works: Vec<_> = input.works.iter().collect();
        works.sort_by_key(|w| w.ordering_key.unwrap_or(u32::MAX));
        let titles: Vec<String> = works.iter().map(|w| w.title.clone()).collect();
        let key = WorkKey::new(works.iter().map(|w| w.id.as_str()));
        self.cache.merge_names(&key, titles.iter().cloned());
        let key = self.cache.canonical_key(&key).unwrap_or(key);

        let medley = works.iter().any(|w| w.has_attribute("medley"));
        let partial = self.config.partial && works.iter().any(|w| w.has_attribute("partial"));
        if !partial {
            if medley {
                self.cache.with_node(&key, |n| n.medley = true);
            }
            return Some(key);
        }

        let shadow = WorkKey::single(&input.recording_id);
        debug!(recording = %input.recording_id, work = %key, "Partial recording");
        if self.config.cache_partial_recordings {
            self.cache.merge_names(&shadow, titles);
            self.cache.record_parent(&shadow, &key, &[]);
            self.cache.with_node(&shadow, |n| {
                n.partial = true;
                n.medley |= medley;
            });
            self.cache.mark_resolved(&shadow, &input.recording_id);
        } else {
            let node = local
                .entry(shadow.clone())
                .or_insert_with(|| WorkNode::new(shadow.clone()));
            union_append(&mut node.names, titles);
            node.parent = Some(key);
            node.partial = true;
            node.medley |= medley;
            node.resolved.insert(input.recording_id.clone());
        }
        Some(shadow)
    }

    /// Request every unresolved work on the track's ancestor chain
    fn resolve(self: &Arc<Self>, track: &TrackRef, state: &mut ReleaseState) {
        let Some(bottom) = state.tracks.get(track).and_then(|t| t.bottom.clone()) else {
            return;
        };
        let variant = self.lookup.preferred_variant();
        let mut issues = Vec::new();
        {
            let view = ReleaseView::new(&self.cache, &state.local);
            let (chain, _) = view.chain(&bottom);
            for key in &chain {
                let Some(node) = view.node(key) else {
                    continue;
                };
                for id in node.unresolved_members() {
                    if let Some(issue) = self.failure(&id) {
                        issues.push(issue);
                        continue;
                    }
                    if let EnqueueOutcome::Dispatch(request) =
                        self.queue.enqueue(&id, track.clone(), variant)
                    {
                        if self.is_settled(&id) {
                            // Finished between the check above and the enqueue
                            self.flush_later(id);
                        } else {
                            self.dispatch(request);
                        }
                    }
                }
            }
        }
        if let Some(ts) = state.tracks.get_mut(track) {
            for issue in issues {
                ts.issues.push(issue);
            }
        }
    }

    fn failure(&self, work_id: &str) -> Option<TrackIssue> {
        self.failed
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(work_id)
            .cloned()
    }

    /// Whether the lookup for `work_id` has already finished, either way
    fn is_settled(&self, work_id: &str) -> bool {
        self.failure(work_id).is_some()
            || self
                .cache
                .keys_containing(work_id)
                .iter()
                .any(|k| self.cache.get(k).is_some_and(|n| n.resolved.contains(work_id)))
    }

    fn flush_later(self: &Arc<Self>, work_id: WorkId) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.flush(&work_id);
            this.finish_in_flight();
        });
    }

    fn finish_in_flight(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    fn dispatch(self: &Arc<Self>, request: LookupRequest) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            debug!(
                work_id = %request.work_id,
                attempt = request.attempt,
                variant = ?request.variant,
                "Dispatching work lookup"
            );
            let result = this.lookup.lookup_work(&request).await;
            this.handle_completion(LookupCompletion { request, result });
            this.finish_in_flight();
        });
    }

    /// Fold one lookup response into every cached key containing `work_id`
    fn apply_relations(&self, work_id: &str, relations: &RelationSet) {
        let mut keys = self.cache.keys_containing(work_id);
        if keys.is_empty() {
            keys.push(self.cache.ensure(&WorkKey::single(work_id)));
        }

        let (parents, arrangement) = parent_refs(relations, &self.config);
        let medley_members: Vec<String> =
            if parents.is_empty() && self.config.medley {
                relations.medley_of.iter().map(|w| w.title.clone()).collect()
            } else {
                Vec::new()
            };

        for key in keys {
            let key = self.cache.canonical_key(&key).unwrap_or(key);
            self.cache.merge_names(&key, [relations.title.as_str()]);
            self.cache.with_node(&key, |n| {
                if n.alias.is_none() {
                    n.alias = relations.alias.clone();
                }
                if n.key_signature.is_none() {
                    n.key_signature = relations.key.clone();
                }
                n.arrangement |= arrangement;
                union_append(&mut n.medley_members, medley_members.iter().cloned());
            });
            self.cache.merge_tags(&key, &relations.tags);
            self.cache.merge_dates(&key, &relations.dates);
            self.cache.merge_contributors(&key, &relations.contributors);

            if !parents.is_empty() {
                let parent_key = WorkKey::new(parents.iter().map(|p| p.id.as_str()));
                let names: Vec<String> = parents.iter().map(|p| p.title.clone()).collect();
                self.cache.record_parent(&key, &parent_key, &names);
            }
            let key = self.cache.canonical_key(&key).unwrap_or(key);
            if self.cache.mark_resolved(&key, work_id) {
                debug!(key = %key, "Confirmed top-level work");
            }
        }
    }

    fn try_finish(&self, release: &ReleaseId) {
        let Some(state) = self.existing_release(release) else {
            return;
        };
        let works = {
            let mut state = lock(&state);
            if state.finished || !state.has_all_tracks() || self.queue.outstanding(release) > 0 {
                return;
            }
            state.finished = true;
            self.assemble(release, &state, false)
        };
        self.finish(release, works);
    }

    fn finish(&self, release: &ReleaseId, works: ReleaseWorks) {
        lock(&self.releases).remove(release);
        self.queue.forget_release(release);
        info!(release = %release, tracks = works.tracks.len(), "Release finished");
        if self.output.send(works).is_err() {
            debug!(release = %release, "Release output receiver dropped");
        }
    }

    /// Build the trackback tree and name every level of every track
    fn assemble(&self, release: &ReleaseId, state: &ReleaseState, abandoned: bool) -> ReleaseWorks {
        let view = ReleaseView::new(&self.cache, &state.local);
        let mut tracks = BTreeMap::new();
        let mut chains: Vec<(TrackRef, Vec<WorkKey>)> = Vec::new();
        let mut contributors = ContributorMap::new();

        {
            let failed = self.failed.read().unwrap_or_else(|p| p.into_inner()).clone();
            for (track, ts) in &state.tracks {
                let mut tw = TrackWorks::new(track.clone(), ts.title.clone(), ts.input.track_number);
                for issue in ts.issues.iter() {
                    tw.issues.push(issue.clone());
                }

                if let Some(bottom) = &ts.bottom {
                    let bottom = if state.local.contains_key(bottom) {
                        bottom.clone()
                    } else {
                        self.cache.canonical_key(bottom).unwrap_or_else(|| bottom.clone())
                    };
                    let (chain, cycle) = view.chain(&bottom);
                    if cycle {
                        let last = chain.last().map(ToString::to_string).unwrap_or_default();
                        warn!(track = %track, work = %last, "Cyclic work hierarchy");
                        tw.issues.push(TrackIssue::error(
                            IssueKind::DataInconsistency,
                            format!("Work hierarchy is cyclic: the parent of {last} is one of its own parts"),
                        ));
                    }

                    for key in &chain {
                        let Some(node) = view.node(key) else {
                            continue;
                        };
                        for id in node.unresolved_members() {
                            match failed.get(&id) {
                                Some(issue) => tw.issues.push(issue.clone()),
                                None if abandoned => tw.issues.push(TrackIssue::error(
                                    IssueKind::LookupFailure,
                                    format!("Lookup for work {id} did not complete before the release was abandoned"),
                                )),
                                None => {}
                            }
                        }
                        if tw.key.is_none() {
                            tw.key = node.key_signature.clone();
                        }
                        union_append(&mut tw.genres, node.tags.iter().cloned());
                        union_dates(&mut tw.dates, &node.dates);
                        if !node.contributors.is_empty() {
                            contributors
                                .entry(key.clone())
                                .or_insert_with(|| node.contributors.clone());
                        }
                    }
                    chains.push((track.clone(), chain));
                }
                tracks.insert(track.clone(), tw);
            }
        }

        let tree = Trackback::build(chains.iter().map(|(t, c)| (t, c.as_slice())));
        for track in &tree.unplaced {
            if let Some(tw) = tracks.get_mut(track) {
                tw.issues.push(TrackIssue::error(
                    IssueKind::DataInconsistency,
                    "Work hierarchy could not be placed under a top-level work",
                ));
            }
        }

        let mut assembler = HierarchyAssembler::new(&self.config, &self.rules, view);
        assembler.assemble(&tree, &mut tracks);

        for tw in tracks.values_mut() {
            if !tw.is_resolved() {
                tw.select_style(self.config.style);
            }
        }

        ReleaseWorks {
            release_id: release.clone(),
            tracks: tracks.into_values().collect(),
            contributors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composer_prefix_removed_only_for_composer() {
        let composers = vec!["Beethoven, Ludwig van".to_string()];
        assert_eq!(
            strip_composer_prefix("Beethoven: Symphony No. 9: I. Allegro", &composers),
            "Symphony No. 9: I. Allegro"
        );
        assert_eq!(
            strip_composer_prefix("Symphony No. 9: I. Allegro", &composers),
            "Symphony No. 9: I. Allegro"
        );
        assert_eq!(strip_composer_prefix("Bach: Air", &[]), "Bach: Air");
    }

    #[test]
    fn test_release_state_completion() {
        let mut state = ReleaseState {
            expected_tracks: 2,
            ..ReleaseState::default()
        };
        assert!(!state.has_all_tracks());
        state.last_seen = true;
        assert!(!state.has_all_tracks());
        state.expected_tracks = 0;
        assert!(state.has_all_tracks());
    }

    fn parent(id: &str, ordering_key: Option<u32>, collection: bool) -> ParentRelation {
        ParentRelation {
            work: WorkRef {
                id: id.to_string(),
                title: id.to_uppercase(),
            },
            ordering_key,
            attributes: if collection {
                vec!["part of collection".to_string()]
            } else {
                Vec::new()
            },
        }
    }

    #[test]
    fn test_parent_refs_order_and_collections() {
        let relations = RelationSet {
            parents: vec![parent("b", None, false), parent("a", Some(1), false), parent("c", Some(2), true)],
            ..RelationSet::default()
        };
        let config = WorksConfig::default();
        let (refs, arrangement) = parent_refs(&relations, &config);
        let ids: Vec<_> = refs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a", "c", "b"]);
        assert!(!arrangement);

        let config = WorksConfig {
            include_collections: false,
            ..WorksConfig::default()
        };
        let (refs, _) = parent_refs(&relations, &config);
        let ids: Vec<_> = refs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn test_arrangement_used_as_parent() {
        let relations = RelationSet {
            arrangement_of: vec![WorkRef {
                id: "orig".to_string(),
                title: "Original".to_string(),
            }],
            ..RelationSet::default()
        };
        let (refs, arrangement) = parent_refs(&relations, &WorksConfig::default());
        assert_eq!(refs.len(), 1);
        assert!(arrangement);

        let config = WorksConfig {
            arrangements: false,
            ..WorksConfig::default()
        };
        assert!(parent_refs(&relations, &config).0.is_empty());
    }
}
