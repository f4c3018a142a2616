//! End-to-end release processing against an in-process catalog

use async_trait::async_trait;
use opus_works::error::IssueKind;
use opus_works::types::{Contributor, ParentRelation, WorkRef};
use opus_works::{
    AnnotationValue, LookupError, LookupRequest, RecordingWork, RelationSet, ReleaseId,
    ReleaseWorks, RequestVariant, TrackInput, TrackWorks, WorkGraphCache, WorkKey, WorkLookup,
    WorkPartsProcessor, WorksConfig,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinSet;

/// Catalog fake: counts calls, scripts failures, can delay responses
#[derive(Default)]
struct FakeCatalog {
    works: HashMap<String, RelationSet>,
    failures: Mutex<HashMap<String, VecDeque<LookupError>>>,
    calls: Mutex<Vec<LookupRequest>>,
    delay: Option<Duration>,
    authenticated: bool,
}

impl FakeCatalog {
    fn with(mut self, relations: RelationSet) -> Self {
        self.works.insert(relations.work_id.clone(), relations);
        self
    }

    fn failing(self, id: &str, errors: impl IntoIterator<Item = LookupError>) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(id.to_string(), errors.into_iter().collect());
        self
    }

    fn calls_for(&self, id: &str) -> Vec<LookupRequest> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.work_id == id)
            .cloned()
            .collect()
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl WorkLookup for FakeCatalog {
    fn preferred_variant(&self) -> RequestVariant {
        if self.authenticated {
            RequestVariant::Authenticated
        } else {
            RequestVariant::Anonymous
        }
    }

    async fn lookup_work(&self, request: &LookupRequest) -> Result<RelationSet, LookupError> {
        self.calls.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&request.work_id)
            .and_then(VecDeque::pop_front);
        if let Some(err) = scripted {
            return Err(err);
        }
        self.works
            .get(&request.work_id)
            .cloned()
            .ok_or_else(|| LookupError::NotFound(request.work_id.clone()))
    }
}

fn work(id: &str, title: &str, parents: &[(&str, &str)]) -> RelationSet {
    RelationSet {
        work_id: id.to_string(),
        title: title.to_string(),
        parents: parents
            .iter()
            .map(|(pid, ptitle)| ParentRelation {
                work: WorkRef {
                    id: pid.to_string(),
                    title: ptitle.to_string(),
                },
                ordering_key: None,
                attributes: Vec::new(),
            })
            .collect(),
        ..RelationSet::default()
    }
}

fn symphony() -> FakeCatalog {
    let mut top = work("s9", "Symphony No. 9", &[]);
    top.contributors.push(Contributor {
        role: "composer".to_string(),
        name: "Ludwig van Beethoven".to_string(),
        sort_name: "Beethoven, Ludwig van".to_string(),
    });
    top.key = Some("D minor".to_string());
    FakeCatalog::default()
        .with(top)
        .with(work("m1", "Symphony No. 9: I. Allegro", &[("s9", "Symphony No. 9")]))
        .with(work("m2", "Symphony No. 9: II. Adagio", &[("s9", "Symphony No. 9")]))
}

fn track(release: &str, n: u32, total: u32, title: &str, works: &[(&str, &str)]) -> TrackInput {
    TrackInput {
        release_id: release.to_string(),
        recording_id: format!("{release}-rec{n}"),
        title: title.to_string(),
        disc_number: 1,
        total_discs: 1,
        track_number: n,
        total_tracks: total,
        release_track_count: total,
        composer_sort_names: vec!["Beethoven, Ludwig van".to_string()],
        works: works
            .iter()
            .map(|(id, title)| RecordingWork {
                id: id.to_string(),
                title: title.to_string(),
                ..RecordingWork::default()
            })
            .collect(),
    }
}

fn symphony_tracks(release: &str, second_title: &str) -> Vec<TrackInput> {
    vec![
        track(release, 1, 2, "Allegro", &[("m1", "Symphony No. 9: I. Allegro")]),
        track(release, 2, 2, second_title, &[("m2", "Symphony No. 9: II. Adagio")]),
    ]
}

async fn next_release(rx: &mut UnboundedReceiver<ReleaseWorks>) -> ReleaseWorks {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("release not emitted in time")
        .expect("output channel closed")
}

fn processor(
    catalog: Arc<FakeCatalog>,
    config: WorksConfig,
) -> (Arc<WorkPartsProcessor>, UnboundedReceiver<ReleaseWorks>) {
    WorkPartsProcessor::new(config, catalog, Arc::new(WorkGraphCache::new()))
}

fn text(tw: &TrackWorks, name: &str) -> Option<String> {
    match tw.annotations().get(name) {
        Some(AnnotationValue::Text(value)) => Some(value.clone()),
        _ => None,
    }
}

fn list(tw: &TrackWorks, name: &str) -> Vec<String> {
    match tw.annotations().get(name) {
        Some(AnnotationValue::List(values)) => values.clone(),
        _ => Vec::new(),
    }
}

#[tokio::test]
async fn test_restated_titles_keep_catalog_parts() {
    let catalog = Arc::new(symphony());
    let (processor, mut rx) = processor(catalog.clone(), WorksConfig::default());
    for t in symphony_tracks("r1", "Adagio") {
        processor.add_track(t);
    }
    let release = next_release(&mut rx).await;

    let first = release.track(1, 1).unwrap();
    assert_eq!(first.extended_part.as_deref(), Some("I. Allegro"));
    assert_eq!(text(first, "groupheading").as_deref(), Some("Symphony No. 9"));
    assert_eq!(text(first, "work_top").as_deref(), Some("Symphony No. 9"));
    assert_eq!(text(first, "part_levels").as_deref(), Some("1"));
    assert_eq!(text(first, "single_work_album").as_deref(), Some("true"));
    assert_eq!(text(first, "key").as_deref(), Some("D minor"));
    assert_eq!(list(first, "workid_top"), vec!["s9".to_string()]);

    let second = release.track(1, 2).unwrap();
    assert_eq!(second.extended_part.as_deref(), Some("II. Adagio"));
    assert_eq!(text(second, "movement").as_deref(), Some("Adagio"));
    assert_eq!(text(second, "movement_number").as_deref(), Some("2"));
    assert!(second.issues.is_empty());

    let composer = &release.contributors[&WorkKey::single("s9")];
    assert_eq!(composer[0].name, "Ludwig van Beethoven");

    // The shared parent was looked up once for both tracks
    assert_eq!(catalog.calls_for("s9").len(), 1);
    assert_eq!(catalog.total_calls(), 3);
}

#[tokio::test]
async fn test_new_title_text_extends_part() {
    let catalog = Arc::new(symphony());
    let (processor, mut rx) = processor(catalog, WorksConfig::default());
    for t in symphony_tracks("r1", "Adagio molto e cantabile") {
        processor.add_track(t);
    }
    let release = next_release(&mut rx).await;

    let second = release.track(1, 2).unwrap();
    assert_eq!(
        second.extended_part.as_deref(),
        Some("II. Adagio {molto e cantabile}")
    );
    assert_eq!(
        text(second, "movement").as_deref(),
        Some("Adagio {molto e cantabile}")
    );
    assert_eq!(
        release.track(1, 1).unwrap().extended_part.as_deref(),
        Some("I. Allegro")
    );
}

#[tokio::test]
async fn test_rerun_with_warm_cache_is_identical() {
    let catalog = Arc::new(symphony());
    let (processor, mut rx) = processor(catalog.clone(), WorksConfig::default());

    for t in symphony_tracks("r1", "Adagio molto e cantabile") {
        processor.add_track(t);
    }
    let first = next_release(&mut rx).await;
    let calls = catalog.total_calls();

    for t in symphony_tracks("r1", "Adagio molto e cantabile") {
        processor.add_track(t);
    }
    let second = next_release(&mut rx).await;

    assert_eq!(catalog.total_calls(), calls);
    assert_eq!(first.tracks, second.tracks);
    assert_eq!(first.to_json(), second.to_json());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_releases_share_one_lookup_per_work() {
    let catalog = Arc::new(FakeCatalog {
        delay: Some(Duration::from_millis(50)),
        ..symphony()
    });
    let (processor, mut rx) = processor(catalog.clone(), WorksConfig::default());

    let mut tasks = JoinSet::new();
    for r in 0..8 {
        let processor = Arc::clone(&processor);
        tasks.spawn(async move {
            for t in symphony_tracks(&format!("r{r}"), "Adagio") {
                processor.add_track(t);
            }
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap();
    }

    let mut releases = Vec::new();
    for _ in 0..8 {
        releases.push(next_release(&mut rx).await);
    }
    for release in &releases {
        assert_eq!(
            release.track(1, 2).unwrap().extended_part.as_deref(),
            Some("II. Adagio")
        );
    }
    for id in ["m1", "m2", "s9"] {
        assert_eq!(catalog.calls_for(id).len(), 1, "lookups for {id}");
    }
}

fn opera() -> FakeCatalog {
    let mut catalog = FakeCatalog {
        delay: Some(Duration::from_millis(5)),
        ..FakeCatalog::default()
    }
    .with(work("opera", "Die Zauberflöte", &[]))
    .with(work("act1", "Die Zauberflöte: Act I", &[("opera", "Die Zauberflöte")]));
    for n in 1..=6 {
        catalog = catalog.with(work(
            &format!("no{n}"),
            &format!("Die Zauberflöte: Act I: No. {n}"),
            &[("act1", "Die Zauberflöte: Act I")],
        ));
    }
    catalog
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_simultaneous_sibling_completions_wait_for_ancestors() {
    for round in 0..20 {
        let catalog = Arc::new(opera());
        let (processor, mut rx) = processor(catalog.clone(), WorksConfig::default());
        let release = format!("r{round}");
        for n in 1..=6u32 {
            let id = format!("no{n}");
            let title = format!("Die Zauberflöte: Act I: No. {n}");
            processor.add_track(track(&release, n, 6, &format!("No. {n}"), &[(&id, &title)]));
        }
        let works = next_release(&mut rx).await;

        for n in 1..=6 {
            let tw = works.track(1, n).unwrap();
            assert_eq!(list(tw, "workid_top"), vec!["opera".to_string()], "round {round} track {n}");
            assert_eq!(text(tw, "part_levels").as_deref(), Some("2"), "round {round} track {n}");
            assert_eq!(list(tw, "workid_1"), vec!["act1".to_string()], "round {round} track {n}");
            assert!(list(tw, "errors").is_empty(), "round {round} track {n}");
        }
        assert_eq!(catalog.calls_for("act1").len(), 1);
        assert_eq!(catalog.calls_for("opera").len(), 1);
    }
}

#[tokio::test]
async fn test_retry_budget_exhaustion_reports_once() {
    let failures = (0..7).map(|_| LookupError::Network("connection reset".to_string()));
    let catalog = Arc::new(symphony().failing("m1", failures));
    let (processor, mut rx) = processor(catalog.clone(), WorksConfig::default());
    processor.add_track(track("r1", 1, 1, "Allegro", &[("m1", "Symphony No. 9: I. Allegro")]));
    let release = next_release(&mut rx).await;

    let calls = catalog.calls_for("m1");
    assert_eq!(calls.len(), 7);
    assert_eq!(calls.last().unwrap().attempt, 6);

    let tw = release.track(1, 1).unwrap();
    let errors: Vec<_> = tw.issues.errors().collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, IssueKind::LookupFailure);
    assert_eq!(list(tw, "errors").len(), 1);
    // The unresolved work stands in as the root
    assert_eq!(list(tw, "workid_0"), vec!["m1".to_string()]);
    assert!(!processor.cache().is_top_level(&WorkKey::single("m1")));

    processor.wait_idle().await;
    assert_eq!(catalog.calls_for("m1").len(), 7);
}

#[tokio::test]
async fn test_recovers_within_retry_budget() {
    let failures = (0..3).map(|_| LookupError::Timeout);
    let catalog = Arc::new(symphony().failing("m1", failures));
    let (processor, mut rx) = processor(catalog.clone(), WorksConfig::default());
    processor.add_track(track("r1", 1, 1, "Allegro", &[("m1", "Symphony No. 9: I. Allegro")]));
    let release = next_release(&mut rx).await;

    assert_eq!(catalog.calls_for("m1").len(), 4);
    let tw = release.track(1, 1).unwrap();
    assert_eq!(tw.issues.errors().count(), 0);
    assert_eq!(text(tw, "work_top").as_deref(), Some("Symphony No. 9"));
}

#[tokio::test]
async fn test_auth_failure_switches_to_anonymous() {
    let catalog = Arc::new(FakeCatalog {
        authenticated: true,
        ..symphony().failing("m1", [LookupError::Unauthorized])
    });
    let (processor, mut rx) = processor(catalog.clone(), WorksConfig::default());
    processor.add_track(track("r1", 1, 1, "Allegro", &[("m1", "Symphony No. 9: I. Allegro")]));
    next_release(&mut rx).await;

    let calls = catalog.calls_for("m1");
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].variant, RequestVariant::Authenticated);
    assert_eq!(calls[1].variant, RequestVariant::Anonymous);
    assert_eq!(calls[1].attempt, 1);
    // Other works still start with credentials
    assert_eq!(catalog.calls_for("s9")[0].variant, RequestVariant::Authenticated);
}

#[tokio::test]
async fn test_malformed_response_is_not_retried() {
    let catalog = Arc::new(
        symphony().failing("m1", [LookupError::Malformed("missing id".to_string())]),
    );
    let (processor, mut rx) = processor(catalog.clone(), WorksConfig::default());
    processor.add_track(track("r1", 1, 1, "Allegro", &[("m1", "Symphony No. 9: I. Allegro")]));
    let release = next_release(&mut rx).await;

    assert_eq!(catalog.calls_for("m1").len(), 1);
    let tw = release.track(1, 1).unwrap();
    let errors: Vec<_> = tw.issues.errors().collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, IssueKind::MalformedRelationData);
}

#[tokio::test]
async fn test_equivalent_works_merge_parents() {
    let catalog = Arc::new(
        FakeCatalog::default()
            .with(work("a", "Sonata: Allegro", &[("p", "Sonata")]))
            .with(work("b", "Sonata: Allegro", &[("q", "Sonata in E")]))
            .with(work("p", "Sonata", &[]))
            .with(work("q", "Sonata in E", &[])),
    );
    let (processor, mut rx) = processor(catalog, WorksConfig::default());
    processor.add_track(track(
        "r1",
        1,
        1,
        "Allegro",
        &[("a", "Sonata: Allegro"), ("b", "Sonata: Allegro")],
    ));
    let release = next_release(&mut rx).await;

    let tw = release.track(1, 1).unwrap();
    assert_eq!(list(tw, "workid_0"), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(list(tw, "workid_1"), vec!["p".to_string(), "q".to_string()]);
    assert_eq!(text(tw, "work_1").as_deref(), Some("Sonata; Sonata in E"));
    assert!(processor.cache().is_top_level(&WorkKey::new(["p", "q"])));
}

#[tokio::test]
async fn test_cyclic_hierarchy_is_reported() {
    let catalog = Arc::new(
        FakeCatalog::default()
            .with(work("c1", "Loop: One", &[("c2", "Loop")]))
            .with(work("c2", "Loop", &[("c1", "Loop: One")])),
    );
    let (processor, mut rx) = processor(catalog, WorksConfig::default());
    processor.add_track(track("r1", 1, 1, "One", &[("c1", "Loop: One")]));
    let release = next_release(&mut rx).await;

    let tw = release.track(1, 1).unwrap();
    assert!(tw
        .issues
        .errors()
        .any(|i| i.kind == IssueKind::DataInconsistency));
    assert_eq!(list(tw, "workid_top"), vec!["c2".to_string()]);
}

#[tokio::test]
async fn test_rejected_config_entries_warn_every_track() {
    let config = WorksConfig {
        synonyms: "(Aria, Arie) / (only one)".to_string(),
        ..WorksConfig::default()
    };
    let (processor, mut rx) = processor(Arc::new(symphony()), config);
    for t in symphony_tracks("r1", "Adagio") {
        processor.add_track(t);
    }
    let release = next_release(&mut rx).await;
    for tw in &release.tracks {
        assert_eq!(
            tw.issues
                .warnings()
                .filter(|i| i.kind == IssueKind::Configuration)
                .count(),
            1
        );
        assert_eq!(list(tw, "warnings").len(), 1);
    }
}

#[tokio::test]
async fn test_collections_can_be_excluded() {
    let mut movement = work("m1", "Symphony No. 9: I. Allegro", &[("s9", "Symphony No. 9")]);
    movement.parents.push(ParentRelation {
        work: WorkRef {
            id: "box".to_string(),
            title: "Complete Symphonies".to_string(),
        },
        ordering_key: None,
        attributes: vec!["part of collection".to_string()],
    });
    let catalog = Arc::new(symphony().with(movement));
    let config = WorksConfig {
        include_collections: false,
        ..WorksConfig::default()
    };
    let (processor, mut rx) = processor(catalog.clone(), config);
    processor.add_track(track("r1", 1, 1, "Allegro", &[("m1", "Symphony No. 9: I. Allegro")]));
    let release = next_release(&mut rx).await;

    assert_eq!(list(release.track(1, 1).unwrap(), "workid_top"), vec!["s9".to_string()]);
    assert!(catalog.calls_for("box").is_empty());
}

#[tokio::test]
async fn test_partial_recording_uses_uncached_shadow() {
    let (processor, mut rx) = processor(Arc::new(symphony()), WorksConfig::default());
    let mut input = track("r1", 1, 1, "Allegro (excerpt)", &[("m1", "Symphony No. 9: I. Allegro")]);
    input.works[0].attributes.push("partial".to_string());
    let recording = input.recording_id.clone();
    processor.add_track(input);
    let release = next_release(&mut rx).await;

    let tw = release.track(1, 1).unwrap();
    assert_eq!(list(tw, "workid_0"), vec![recording.clone()]);
    assert_eq!(list(tw, "workid_1"), vec!["m1".to_string()]);
    assert_eq!(text(tw, "partial").as_deref(), Some("true"));
    assert_eq!(text(tw, "part_levels").as_deref(), Some("2"));
    assert!(!processor.cache().contains(&WorkKey::single(&recording)));
}

#[tokio::test]
async fn test_arrangement_stands_in_for_parent() {
    let mut arrangement = work("arr", "Air (arr. for guitar)", &[]);
    arrangement.arrangement_of.push(WorkRef {
        id: "air".to_string(),
        title: "Air".to_string(),
    });
    let catalog = Arc::new(
        FakeCatalog::default()
            .with(arrangement)
            .with(work("air", "Air", &[])),
    );
    let (processor, mut rx) = processor(catalog, WorksConfig::default());
    processor.add_track(track("r1", 1, 1, "Air", &[("arr", "Air (arr. for guitar)")]));
    let release = next_release(&mut rx).await;

    let tw = release.track(1, 1).unwrap();
    assert_eq!(list(tw, "workid_1"), vec!["air".to_string()]);
    assert_eq!(text(tw, "arrangement").as_deref(), Some("true"));
    assert!(text(tw, "work_0").unwrap().starts_with("Arrangement: "));
}

#[tokio::test]
async fn test_track_without_works_keeps_title() {
    let (processor, mut rx) = processor(Arc::new(symphony()), WorksConfig::default());
    processor.add_track(track("r1", 1, 1, "Beethoven: Bagatelle", &[]));
    let release = next_release(&mut rx).await;

    let tw = release.track(1, 1).unwrap();
    assert_eq!(tw.title, "Bagatelle");
    assert_eq!(text(tw, "part").as_deref(), Some("Bagatelle"));
    assert!(tw.issues.warnings().any(|i| i.kind == IssueKind::Ambiguity));
    assert!(list(tw, "workid_0").is_empty());
}

#[tokio::test]
async fn test_release_waits_for_last_track_then_can_be_abandoned() {
    let (processor, mut rx) = processor(Arc::new(symphony()), WorksConfig::default());
    processor.add_track(track("r1", 1, 2, "Allegro", &[("m1", "Symphony No. 9: I. Allegro")]));
    processor.wait_idle().await;

    assert!(rx.try_recv().is_err());
    assert_eq!(processor.pending_releases(), vec![ReleaseId::from("r1")]);

    assert!(processor.abandon_release(&ReleaseId::from("r1")));
    let release = next_release(&mut rx).await;
    assert_eq!(release.tracks.len(), 1);
    assert_eq!(
        release.track(1, 1).unwrap().extended_part.as_deref(),
        Some("I. Allegro")
    );
    assert!(processor.pending_releases().is_empty());
    assert!(!processor.abandon_release(&ReleaseId::from("r1")));
}
