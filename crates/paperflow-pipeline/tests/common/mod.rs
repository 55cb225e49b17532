//! Scripted collaborators and fixtures shared by the pipeline tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDate;
use paperflow_core::{
    BlobStore, CancelToken, CollaboratorError, ContentFetcher, ErrorKind, MetadataQuery,
    MetadataSource, MetadataStream, PaperMetadata, ProgressContext, RetryConfig, TextExtractor,
    Translator,
};
use paperflow_pipeline::{Collaborators, Coordinator, PipelineConfig};
use paperflow_store::StateStore;

pub fn meta(id: &str, day: u32) -> PaperMetadata {
    PaperMetadata {
        id: id.to_string(),
        title: format!("Paper {id}"),
        abstract_text: "Receiver functions beneath the Carpathians.".to_string(),
        authors: vec!["A. Author".to_string()],
        categories: vec!["physics.geo-ph".to_string()],
        submission_date: NaiveDate::from_ymd_opt(2025, 3, day).unwrap(),
        update_date: NaiveDate::from_ymd_opt(2025, 3, day).unwrap(),
    }
}

pub fn query(limit: Option<usize>) -> MetadataQuery {
    MetadataQuery {
        category: "physics.geo-ph".to_string(),
        start_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2025, 3, 31).unwrap(),
        limit,
    }
}

/// Millisecond backoff, no jitter, no rate limits.
pub fn fast_config(max_attempts: u32) -> PipelineConfig {
    PipelineConfig {
        rate_limits: BTreeMap::new(),
        retry: RetryConfig {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 5,
            jitter: 0.0,
        },
        ..Default::default()
    }
}

/// Cancels `token` once call number `after` has started.
pub type CancelHook = Option<(CancelToken, usize)>;

fn fire(hook: &CancelHook, call: usize) {
    if let Some((token, after)) = hook {
        if call >= *after {
            token.cancel();
        }
    }
}

fn count(map: &Mutex<HashMap<String, usize>>, key: &str) {
    *map.lock().unwrap().entry(key.to_string()).or_default() += 1;
}

/// Returns `records` for every query; the first `fail_first` calls yield
/// a transient error after one record.
#[derive(Default)]
pub struct ScriptedSource {
    pub records: Vec<PaperMetadata>,
    pub fail_first: AtomicUsize,
    pub cancel: CancelHook,
    pub calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(records: Vec<PaperMetadata>) -> Self {
        Self {
            records,
            ..Default::default()
        }
    }
}

impl MetadataSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn fetch_batch<'a>(&'a self, _query: &'a MetadataQuery) -> MetadataStream<'a> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        fire(&self.cancel, n);
        let fail = self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let records = self.records.iter().cloned().map(Ok);
        if fail {
            let err = CollaboratorError::new(ErrorKind::Network, "connection reset");
            Box::new(records.take(1).chain(std::iter::once(Err(err))))
        } else {
            Box::new(records)
        }
    }
}

/// Content fetcher that records call counts and peak concurrency.
#[derive(Default)]
pub struct ScriptedFetcher {
    /// Ids that fail with `NotFound`
    pub missing: Mutex<HashSet<String>>,
    /// Every call fails with a transient error
    pub always_unavailable: bool,
    pub delay: Duration,
    pub cancel: CancelHook,
    pub calls: AtomicUsize,
    pub per_paper: Mutex<HashMap<String, usize>>,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn calls_for(&self, id: &str) -> usize {
        self.per_paper.lock().unwrap().get(id).copied().unwrap_or(0)
    }
}

impl ContentFetcher for ScriptedFetcher {
    fn fetch(&self, paper: &PaperMetadata) -> Result<Vec<u8>, CollaboratorError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        count(&self.per_paper, &paper.id);
        fire(&self.cancel, n);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.always_unavailable {
            return Err(CollaboratorError::transient("mirror overloaded"));
        }
        if self.missing.lock().unwrap().contains(&paper.id) {
            return Err(CollaboratorError::new(ErrorKind::NotFound, "no pdf"));
        }
        Ok(format!("text of {}", paper.id).into_bytes())
    }
}

#[derive(Default)]
pub struct MemoryBlobs {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    pub puts: AtomicUsize,
}

impl BlobStore for MemoryBlobs {
    fn put(&self, paper_id: &str, bytes: &[u8]) -> Result<String, CollaboratorError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let location = format!("papers/test/{paper_id}.pdf");
        self.objects
            .lock()
            .unwrap()
            .insert(location.clone(), bytes.to_vec());
        Ok(location)
    }

    fn get(&self, location: &str) -> Result<Vec<u8>, CollaboratorError> {
        self.objects
            .lock()
            .unwrap()
            .get(location)
            .cloned()
            .ok_or_else(|| CollaboratorError::new(ErrorKind::NotFound, location))
    }
}

/// Treats content as UTF-8 text.
#[derive(Default)]
pub struct Utf8Extractor {
    pub cancel: CancelHook,
    pub calls: AtomicUsize,
    /// Calls by extracted text
    pub per_text: Mutex<HashMap<String, usize>>,
}

impl Utf8Extractor {
    pub fn calls_for(&self, text: &str) -> usize {
        self.per_text.lock().unwrap().get(text).copied().unwrap_or(0)
    }
}

impl TextExtractor for Utf8Extractor {
    fn extract(&self, content: &[u8]) -> Result<String, CollaboratorError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        fire(&self.cancel, n);
        let text = String::from_utf8_lossy(content).into_owned();
        count(&self.per_text, &text);
        Ok(text)
    }
}

/// Upper-cases its input after `fail_first` transient failures.
#[derive(Default)]
pub struct FlakyTranslator {
    pub fail_first: AtomicUsize,
    pub cancel: CancelHook,
    pub calls: AtomicUsize,
    /// Successful calls by source text
    pub per_text: Mutex<HashMap<String, usize>>,
}

impl FlakyTranslator {
    pub fn successes_for(&self, text: &str) -> usize {
        self.per_text.lock().unwrap().get(text).copied().unwrap_or(0)
    }

    pub fn failing(times: usize) -> Self {
        Self {
            fail_first: AtomicUsize::new(times),
            ..Default::default()
        }
    }
}

impl Translator for FlakyTranslator {
    fn translate(&self, text: &str) -> Result<String, CollaboratorError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        fire(&self.cancel, n);
        let fail = self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(CollaboratorError::new(ErrorKind::RateLimited, "slow down"));
        }
        count(&self.per_text, text);
        Ok(text.to_uppercase())
    }
}

/// Concrete handles to the mocks behind a coordinator.
pub struct Harness {
    pub source: Arc<ScriptedSource>,
    pub fetcher: Arc<ScriptedFetcher>,
    pub blobs: Arc<MemoryBlobs>,
    pub extractor: Arc<Utf8Extractor>,
    pub translator: Arc<FlakyTranslator>,
}

impl Default for Harness {
    fn default() -> Self {
        Self {
            source: Arc::new(ScriptedSource::default()),
            fetcher: Arc::new(ScriptedFetcher::default()),
            blobs: Arc::new(MemoryBlobs::default()),
            extractor: Arc::new(Utf8Extractor::default()),
            translator: Arc::new(FlakyTranslator::default()),
        }
    }
}

impl Harness {
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            source: self.source.clone(),
            fetcher: self.fetcher.clone(),
            blobs: self.blobs.clone(),
            extractor: self.extractor.clone(),
            translator: self.translator.clone(),
        }
    }

    pub fn coordinator(&self, config: PipelineConfig, store: Arc<dyn StateStore>) -> Coordinator {
        Coordinator::new(
            config,
            store,
            self.collaborators(),
            Arc::new(ProgressContext::hidden()),
        )
        .unwrap()
    }
}

/// Every stored paper satisfies the stage ordering and single-outcome rules.
pub fn assert_invariants(store: &dyn StateStore, ids: &[&str]) {
    for id in ids {
        let paper = store.get(id).unwrap().unwrap();
        if let Err(e) = paper.check_invariants() {
            panic!("{id}: {e}");
        }
    }
}
