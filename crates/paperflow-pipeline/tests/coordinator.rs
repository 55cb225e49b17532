//! End-to-end passes against scripted collaborators.

mod common;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::*;
use paperflow_core::{
    CancelToken, Paper, PaperMetadata, ProgressContext, RateLimitConfig, Stage, StageOutput,
    StageStatus,
};
use paperflow_pipeline::{Coordinator, PipelineConfig, PipelineError};
use paperflow_store::{DuckDbStore, MemoryStore, StageCounts, StateStore, StoreError, UpsertOutcome};

fn seeded(ids: &[&str]) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for (i, id) in ids.iter().enumerate() {
        store.upsert_metadata(&meta(id, 1 + i as u32)).unwrap();
    }
    store
}

#[test]
fn failed_download_does_not_hold_back_other_papers() {
    let ids = ["p1", "p2", "p3"];
    let store = seeded(&ids);
    let harness = Harness::default();
    harness.fetcher.missing.lock().unwrap().insert("p2".to_string());
    let coordinator = harness.coordinator(fast_config(3), store.clone());

    let report = coordinator.run_once(10).unwrap();
    assert!(!report.cancelled);
    let download = report.stage(Stage::Download).unwrap();
    assert_eq!((download.succeeded, download.failed), (2, 1));
    // NotFound is permanent: one call only
    assert_eq!(harness.fetcher.calls_for("p2"), 1);

    let p2 = store.get("p2").unwrap().unwrap();
    assert!(p2.download.completed_at.is_none());
    assert_eq!(p2.download.error.as_deref(), Some("not found: no pdf"));
    assert_eq!(p2.status(Stage::Extract), StageStatus::Blocked);

    for id in ["p1", "p3"] {
        let paper = store.get(id).unwrap().unwrap();
        assert!(paper.extract.is_complete(), "{id} extracted in the same pass");
        assert!(paper.translate.is_complete(), "{id} translated in the same pass");
        assert_eq!(
            paper.translated_text.as_deref(),
            Some(format!("text of {id}").to_uppercase().as_str())
        );
    }
    assert_invariants(store.as_ref(), &ids);

    // Next pass retries the failed paper once the content appears
    harness.fetcher.missing.lock().unwrap().clear();
    let report = coordinator.run_once(10).unwrap();
    assert_eq!(report.stage(Stage::Download).unwrap().succeeded, 1);
    let p2 = store.get("p2").unwrap().unwrap();
    assert!(p2.translate.is_complete());
    assert!(p2.download.error.is_none());
    assert_eq!(harness.fetcher.calls_for("p1"), 1);
}

#[test]
fn translator_recovers_after_two_transient_failures() {
    let store = seeded(&["p1"]);
    let harness = Harness {
        translator: Arc::new(FlakyTranslator::failing(2)),
        ..Default::default()
    };
    let coordinator = harness.coordinator(fast_config(5), store.clone());

    let report = coordinator.run_once(10).unwrap();
    let translate = report.stage(Stage::Translate).unwrap();
    assert_eq!(translate.succeeded, 1);
    assert_eq!(translate.retried_then_succeeded, 1);
    assert_eq!(translate.calls, 3);
    assert_eq!(harness.translator.calls.load(Ordering::SeqCst), 3);

    let paper = store.get("p1").unwrap().unwrap();
    assert!(paper.translate.completed_at.is_some());
    assert!(paper.translate.error.is_none());
}

#[test]
fn transient_failures_stop_at_max_attempts() {
    let store = seeded(&["p1"]);
    let harness = Harness {
        fetcher: Arc::new(ScriptedFetcher {
            always_unavailable: true,
            ..Default::default()
        }),
        ..Default::default()
    };
    let coordinator = harness.coordinator(fast_config(4), store.clone());

    let report = coordinator.run_once(10).unwrap();
    assert_eq!(harness.fetcher.calls.load(Ordering::SeqCst), 4);
    assert_eq!(report.stage(Stage::Download).unwrap().failed, 1);
    assert_eq!(report.stage(Stage::Extract).unwrap().total, 0);

    let paper = store.get("p1").unwrap().unwrap();
    assert_eq!(
        paper.download.error.as_deref(),
        Some("unavailable: mirror overloaded")
    );
    assert_eq!(paper.status(Stage::Download), StageStatus::Failed);
}

#[test]
fn in_flight_downloads_never_exceed_concurrency() {
    let ids: Vec<String> = (0..24).map(|i| format!("p{i:02}")).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let store = seeded(&id_refs);
    let harness = Harness {
        fetcher: Arc::new(ScriptedFetcher {
            delay: Duration::from_millis(10),
            ..Default::default()
        }),
        ..Default::default()
    };
    let mut config = fast_config(1);
    config.stages.download.concurrency = 3;
    let coordinator = harness.coordinator(config, store.clone());

    let report = coordinator.run_once(24).unwrap();
    assert_eq!(report.stage(Stage::Download).unwrap().succeeded, 24);
    let peak = harness.fetcher.max_in_flight.load(Ordering::SeqCst);
    assert!((1..=3).contains(&peak), "peak in-flight {peak}");
}

#[test]
fn empty_store_gives_empty_report() {
    let store = Arc::new(MemoryStore::new());
    let harness = Harness::default();
    let coordinator = harness.coordinator(fast_config(3), store);

    let report = coordinator.run_once(10).unwrap();
    assert!(!report.made_progress());
    assert_eq!(report.succeeded() + report.failed(), 0);
    for stage in Stage::TRACKED {
        assert_eq!(report.stage(stage).unwrap().total, 0);
    }
    assert_eq!(harness.fetcher.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn batch_size_caps_each_stage() {
    let store = seeded(&["p1", "p2", "p3", "p4", "p5"]);
    let harness = Harness::default();
    let coordinator = harness.coordinator(fast_config(1), store.clone());

    let report = coordinator.run_once(2).unwrap();
    assert_eq!(report.stage(Stage::Download).unwrap().total, 2);
    // Newest submissions first
    assert!(store.get("p5").unwrap().unwrap().download.is_complete());
    assert!(store.get("p4").unwrap().unwrap().download.is_complete());
    assert!(!store.get("p1").unwrap().unwrap().download.is_complete());
}

#[test]
fn zero_batch_rejected() {
    let coordinator = Harness::default().coordinator(fast_config(1), Arc::new(MemoryStore::new()));
    let err = coordinator.run_once(0).unwrap_err();
    assert!(matches!(err, PipelineError::Config(ref e) if e.field == "batch_size"));
}

#[test]
fn zero_concurrency_rejected_at_construction() {
    let mut config = fast_config(1);
    config.stages.translate.concurrency = 0;
    let result = Coordinator::new(
        config,
        Arc::new(MemoryStore::new()),
        Harness::default().collaborators(),
        Arc::new(ProgressContext::hidden()),
    );
    match result {
        Err(PipelineError::Config(e)) => assert_eq!(e.field, "stages.translate.concurrency"),
        Err(e) => panic!("unexpected error {e}"),
        Ok(_) => panic!("zero concurrency accepted"),
    }
}

#[test]
fn rate_limit_spaces_out_calls() {
    let store = seeded(&["p1", "p2", "p3", "p4", "p5"]);
    let harness = Harness::default();
    let mut config = fast_config(1);
    config.stages.download.concurrency = 5;
    config.rate_limits = BTreeMap::from([(
        "content".to_string(),
        RateLimitConfig {
            capacity: 1,
            refill_per_sec: 20.0,
        },
    )]);
    let coordinator = harness.coordinator(config, store);

    let started = Instant::now();
    let report = coordinator.run_once(5).unwrap();
    let elapsed = started.elapsed();
    assert_eq!(report.stage(Stage::Download).unwrap().succeeded, 5);
    // One token up front, four more at 20/s
    assert!(elapsed >= Duration::from_millis(180), "took {elapsed:?}");
}

#[test]
fn metadata_queries_are_ingested_once_per_run() {
    let store = Arc::new(MemoryStore::new());
    let source = ScriptedSource::new(vec![meta("a", 3), meta("b", 2), meta("c", 1)]);
    source.fail_first.store(1, Ordering::SeqCst);
    let harness = Harness {
        source: Arc::new(source),
        ..Default::default()
    };
    let mut config = fast_config(3);
    config.queries = vec![query(Some(2))];
    let coordinator = harness.coordinator(config, store.clone());

    let reports = coordinator.run_until_idle(10, 5, &CancelToken::new()).unwrap();
    let first = &reports[0];
    assert_eq!(first.ingest.records, 2);
    assert_eq!(first.ingest.inserted, 2);
    assert_eq!(first.stage(Stage::Metadata).unwrap().retried_then_succeeded, 1);
    // One failed attempt, one full read; later passes skip metadata
    assert_eq!(harness.source.calls.load(Ordering::SeqCst), 2);
    assert!(reports[1..].iter().all(|r| r.stage(Stage::Metadata).is_none()));

    assert_eq!(store.len(), 2);
    assert!(store.get("c").unwrap().is_none());
    assert!(store.get("a").unwrap().unwrap().translate.is_complete());
}

#[test]
fn reingesting_keeps_progress() {
    let store = Arc::new(MemoryStore::new());
    let harness = Harness {
        source: Arc::new(ScriptedSource::new(vec![meta("a", 3)])),
        ..Default::default()
    };
    let mut config = fast_config(1);
    config.queries = vec![query(None)];
    let coordinator = harness.coordinator(config, store.clone());

    coordinator.run_once(10).unwrap();
    let done = store.get("a").unwrap().unwrap();
    assert!(done.translate.is_complete());

    let report = coordinator.run_once(10).unwrap();
    assert_eq!(report.ingest.unchanged, 1);
    assert!(!report.made_progress());
    assert_eq!(store.get("a").unwrap().unwrap(), done);
    assert_eq!(harness.fetcher.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn run_until_idle_drains_small_batches() {
    let ids = ["p1", "p2", "p3", "p4", "p5"];
    let store = seeded(&ids);
    let harness = Harness::default();
    let coordinator = harness.coordinator(fast_config(1), store.clone());

    let reports = coordinator.run_until_idle(2, 20, &CancelToken::new()).unwrap();
    let last = reports.last().unwrap();
    assert!(!last.made_progress());
    assert!(reports.len() < 20);
    for id in ids {
        assert!(store.get(id).unwrap().unwrap().translate.is_complete(), "{id}");
    }
    let counts = store.stage_counts().unwrap();
    for (stage, c) in counts {
        assert_eq!(c, StageCounts { done: 5, ..Default::default() }, "{stage}");
    }
}

/// Outputs and completion flags, ignoring timestamps.
fn outcome(paper: &Paper) -> (Option<String>, Option<String>, Option<String>, [bool; 3]) {
    (
        paper.content_location.clone(),
        paper.extracted_text.clone(),
        paper.translated_text.clone(),
        [
            paper.download.is_complete(),
            paper.extract.is_complete(),
            paper.translate.is_complete(),
        ],
    )
}

const RESUME_IDS: [&str; 6] = ["p1", "p2", "p3", "p4", "p5", "p6"];

fn resume_source() -> ScriptedSource {
    ScriptedSource::new(
        RESUME_IDS
            .iter()
            .enumerate()
            .map(|(i, id)| meta(id, 1 + i as u32))
            .collect(),
    )
}

/// Two queries, so metadata ingest can be cut between them.
fn resume_config() -> PipelineConfig {
    let mut config = fast_config(2);
    let mut second = query(None);
    second.category = "physics.ao-ph".to_string();
    config.queries = vec![query(None), second];
    config
}

fn uninterrupted_reference() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let harness = Harness {
        source: Arc::new(resume_source()),
        ..Default::default()
    };
    harness
        .coordinator(resume_config(), store.clone())
        .run_until_idle(10, 10, &CancelToken::new())
        .unwrap();
    store
}

/// Interrupted and resumed runs end in the reference state, and no paper's
/// stage action succeeded twice.
fn assert_resumed_like(reference: &MemoryStore, store: &MemoryStore, harness: &Harness, label: &str) {
    for id in RESUME_IDS {
        let resumed = store.get(id).unwrap().unwrap();
        let expected = reference.get(id).unwrap().unwrap();
        assert_eq!(outcome(&resumed), outcome(&expected), "{label}: {id}");

        let text = format!("text of {id}");
        assert_eq!(harness.fetcher.calls_for(id), 1, "{label}: {id} downloaded once");
        assert_eq!(harness.extractor.calls_for(&text), 1, "{label}: {id} extracted once");
        assert_eq!(harness.translator.successes_for(&text), 1, "{label}: {id} translated once");
    }
    assert_eq!(harness.blobs.puts.load(Ordering::SeqCst), RESUME_IDS.len(), "{label}");
    assert_invariants(store, &RESUME_IDS);
}

#[test]
fn interrupted_run_resumes_to_same_state() {
    let reference = uninterrupted_reference();
    for id in RESUME_IDS {
        assert!(reference.get(id).unwrap().unwrap().translate.is_complete(), "{id}");
    }

    let points = [
        (Stage::Metadata, 2),
        (Stage::Download, RESUME_IDS.len()),
        (Stage::Extract, RESUME_IDS.len()),
        (Stage::Translate, RESUME_IDS.len()),
    ];
    for (stage, calls) in points {
        for after in 1..=calls {
            let label = format!("cancel at {stage} call {after}");
            let cancel = CancelToken::new();
            let hook = Some((cancel.clone(), after));
            let mut harness = Harness {
                source: Arc::new(resume_source()),
                ..Default::default()
            };
            match stage {
                Stage::Metadata => {
                    harness.source = Arc::new(ScriptedSource {
                        cancel: hook,
                        ..resume_source()
                    })
                }
                Stage::Download => {
                    harness.fetcher = Arc::new(ScriptedFetcher {
                        delay: Duration::from_millis(1),
                        cancel: hook,
                        ..Default::default()
                    })
                }
                Stage::Extract => {
                    harness.extractor = Arc::new(Utf8Extractor {
                        cancel: hook,
                        ..Default::default()
                    })
                }
                Stage::Translate => {
                    harness.translator = Arc::new(FlakyTranslator {
                        cancel: hook,
                        ..Default::default()
                    })
                }
            }

            let store = Arc::new(MemoryStore::new());
            let coordinator = harness.coordinator(resume_config(), store.clone());
            let interrupted = coordinator.run_once_with_cancel(10, &cancel).unwrap();
            assert!(interrupted.cancelled, "{label}");
            let cut = interrupted.stages.last().unwrap();
            assert_eq!(cut.stage, stage, "{label}: nothing runs after the cut");
            assert_eq!(cut.failed, 0, "{label}");
            assert_eq!(cut.succeeded + cut.skipped, cut.total, "{label}");
            if stage.is_tracked() {
                // Every started action was persisted
                let persisted = store
                    .snapshot()
                    .iter()
                    .filter(|p| p.status(stage) == StageStatus::Done)
                    .count();
                assert_eq!(persisted, cut.succeeded, "{label}");
            }
            assert_invariants(store.as_ref(), &RESUME_IDS);

            coordinator
                .run_until_idle(10, 10, &CancelToken::new())
                .unwrap();
            assert_resumed_like(&reference, &store, &harness, &label);
        }
    }
}

/// Store whose success writes fail while `broken` is set.
struct BrokenStore {
    inner: MemoryStore,
    broken: AtomicBool,
}

impl BrokenStore {
    fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            broken: AtomicBool::new(true),
        }
    }
}

impl StateStore for BrokenStore {
    fn fetch_eligible(&self, stage: Stage, limit: usize) -> Result<Vec<Paper>, StoreError> {
        self.inner.fetch_eligible(stage, limit)
    }

    fn record_success(&self, paper_id: &str, output: StageOutput) -> Result<bool, StoreError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(StoreError::Corrupt {
                id: paper_id.to_string(),
                reason: "write lost".to_string(),
            });
        }
        self.inner.record_success(paper_id, output)
    }

    fn record_failure(&self, paper_id: &str, stage: Stage, message: &str) -> Result<bool, StoreError> {
        self.inner.record_failure(paper_id, stage, message)
    }

    fn upsert_metadata(&self, metadata: &PaperMetadata) -> Result<UpsertOutcome, StoreError> {
        self.inner.upsert_metadata(metadata)
    }

    fn get(&self, paper_id: &str) -> Result<Option<Paper>, StoreError> {
        self.inner.get(paper_id)
    }

    fn stage_counts(&self) -> Result<Vec<(Stage, StageCounts)>, StoreError> {
        self.inner.stage_counts()
    }

    fn failures(&self, stage: Stage, limit: usize) -> Result<Vec<(String, String)>, StoreError> {
        self.inner.failures(stage, limit)
    }
}

#[test]
fn store_failure_aborts_the_pass() {
    let inner = MemoryStore::new();
    inner.upsert_metadata(&meta("p1", 1)).unwrap();
    inner.upsert_metadata(&meta("p2", 2)).unwrap();
    let harness = Harness::default();
    let coordinator = harness.coordinator(fast_config(1), Arc::new(BrokenStore::new(inner)));

    let err = coordinator.run_once(10).unwrap_err();
    assert!(matches!(err, PipelineError::Store(StoreError::Corrupt { .. })));
    assert_eq!(harness.extractor.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn aborted_pass_resumes_once_store_heals() {
    let reference = uninterrupted_reference();

    let store = Arc::new(BrokenStore::new(MemoryStore::new()));
    let harness = Harness {
        source: Arc::new(resume_source()),
        ..Default::default()
    };
    let coordinator = harness.coordinator(resume_config(), store.clone());

    let err = coordinator.run_once(10).unwrap_err();
    assert!(matches!(err, PipelineError::Store(StoreError::Corrupt { .. })));
    // Ingest is unaffected; the lost download writes leave papers pending
    for id in RESUME_IDS {
        let paper = store.get(id).unwrap().unwrap();
        assert_eq!(paper.status(Stage::Download), StageStatus::Pending, "{id}");
    }
    assert_eq!(harness.extractor.calls.load(Ordering::SeqCst), 0);

    store.broken.store(false, Ordering::SeqCst);
    coordinator
        .run_until_idle(10, 10, &CancelToken::new())
        .unwrap();

    for id in RESUME_IDS {
        let resumed = store.get(id).unwrap().unwrap();
        let expected = reference.get(id).unwrap().unwrap();
        assert_eq!(outcome(&resumed), outcome(&expected), "{id}");
        let text = format!("text of {id}");
        // Downloads whose results were lost are fetched again, at most once more
        assert!(harness.fetcher.calls_for(id) <= 2, "{id}");
        assert_eq!(harness.extractor.calls_for(&text), 1, "{id}");
        assert_eq!(harness.translator.successes_for(&text), 1, "{id}");
    }
    assert_invariants(store.as_ref(), &RESUME_IDS);
}

#[test]
fn permanently_failed_newest_paper_does_not_starve_older_ones() {
    let ids = ["p1", "p2", "p3"];
    let store = seeded(&ids);
    let harness = Harness::default();
    harness.fetcher.missing.lock().unwrap().insert("p3".to_string());
    let coordinator = harness.coordinator(fast_config(1), store.clone());

    let reports = coordinator.run_until_idle(1, 10, &CancelToken::new()).unwrap();
    // p3 fails, p2 and p1 complete one pass each, then a pass with only p3
    assert_eq!(reports.len(), 4);
    assert!(!reports.last().unwrap().made_progress());

    for id in ["p1", "p2"] {
        assert!(store.get(id).unwrap().unwrap().translate.is_complete(), "{id}");
    }
    assert_eq!(
        store.get("p3").unwrap().unwrap().status(Stage::Download),
        StageStatus::Failed
    );
    assert_eq!(harness.fetcher.calls_for("p3"), 2);
    let download = store
        .stage_counts()
        .unwrap()
        .into_iter()
        .find(|(stage, _)| *stage == Stage::Download)
        .unwrap()
        .1;
    assert_eq!(
        download,
        StageCounts {
            pending: 0,
            done: 2,
            failed: 1,
            ..Default::default()
        }
    );
}

#[test]
fn duckdb_store_survives_restart_between_passes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("papers.duckdb");
    let harness = Harness::default();
    harness.fetcher.missing.lock().unwrap().insert("p2".to_string());

    {
        let store = Arc::new(DuckDbStore::open(&path).unwrap());
        for (i, id) in ["p1", "p2", "p3"].iter().enumerate() {
            store.upsert_metadata(&meta(id, 1 + i as u32)).unwrap();
        }
        let report = harness
            .coordinator(fast_config(2), store.clone())
            .run_once(10)
            .unwrap();
        assert_eq!(report.stage(Stage::Translate).unwrap().succeeded, 2);
    }

    harness.fetcher.missing.lock().unwrap().clear();
    let store = Arc::new(DuckDbStore::open(&path).unwrap());
    let p2 = store.get("p2").unwrap().unwrap();
    assert_eq!(p2.status(Stage::Download), StageStatus::Failed);

    let report = harness
        .coordinator(fast_config(2), store.clone())
        .run_once(10)
        .unwrap();
    assert_eq!(report.stage(Stage::Download).unwrap().total, 1);
    assert_invariants(store.as_ref(), &["p1", "p2", "p3"]);
    assert_eq!(
        store.get("p2").unwrap().unwrap().translated_text.as_deref(),
        Some("TEXT OF P2")
    );
}
