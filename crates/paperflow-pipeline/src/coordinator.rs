//! Pipeline passes: every eligible paper advances by at most one stage.
//!
//! Stages run strictly in order (metadata, download, extract, translate).
//! Stage N's batch is fully resolved before stage N+1 selects its own, so a
//! paper downloaded early in a pass can be extracted later in the same pass.
//! Eligibility comes from the store alone, which makes a pass safe to repeat
//! after any interruption.

use std::sync::Arc;
use std::time::Instant;

use paperflow_core::{
    BlobStore, CancelToken, CollaboratorError, ConfigError, ContentFetcher, ErrorKind,
    MetadataQuery, MetadataSource, Paper, PaperMetadata, RateLimiter, RetryPolicy,
    SharedProgress, Stage, StageOutput, TextExtractor, Translator, WorkUnit,
};
use paperflow_store::StateStore;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::executor::{ExecutionReport, StageExecutor};
use crate::report::{IngestSummary, PassReport};

/// External systems called by the stage actions.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn MetadataSource>,
    pub fetcher: Arc<dyn ContentFetcher>,
    pub blobs: Arc<dyn BlobStore>,
    pub extractor: Arc<dyn TextExtractor>,
    pub translator: Arc<dyn Translator>,
}

pub struct Coordinator {
    config: PipelineConfig,
    store: Arc<dyn StateStore>,
    collab: Collaborators,
    /// Indexed by `Stage as usize`
    executors: Vec<StageExecutor>,
    progress: SharedProgress,
}

impl Coordinator {
    /// Validate `config` and build one executor per stage. All executors
    /// share a single rate limiter, so stages calling the same collaborator
    /// key draw from the same bucket.
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn StateStore>,
        collab: Collaborators,
        progress: SharedProgress,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let limiter = Arc::new(RateLimiter::new(&config.rate_limits)?);
        let retry = RetryPolicy::from_config(&config.retry)?;
        let executors = Stage::ALL
            .into_iter()
            .map(|stage| {
                StageExecutor::new(
                    stage,
                    config.stages.get(stage).concurrency,
                    limiter.clone(),
                    retry.clone(),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        log::debug!("Coordinator ready: {limiter:?}, {} queries", config.queries.len());
        Ok(Self {
            config,
            store,
            collab,
            executors,
            progress,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    fn executor(&self, stage: Stage) -> &StageExecutor {
        &self.executors[stage as usize]
    }

    /// One full pass with `batch_size` papers per tracked stage.
    pub fn run_once(&self, batch_size: usize) -> Result<PassReport, PipelineError> {
        self.run_once_with_cancel(batch_size, &CancelToken::new())
    }

    /// One full pass that stops early once `cancel` fires.
    ///
    /// Cancellation between stages starts nothing further. Mid-stage, units
    /// already claimed finish and are persisted before the pass returns with
    /// `cancelled` set.
    pub fn run_once_with_cancel(
        &self,
        batch_size: usize,
        cancel: &CancelToken,
    ) -> Result<PassReport, PipelineError> {
        self.pass(batch_size, cancel, true)
    }

    /// Repeat passes while they make progress, up to `max_passes`.
    ///
    /// Metadata is ingested on the first pass only; later passes drain the
    /// tracked stages. Stops when cancelled, or after a pass that completed
    /// nothing while no paper is left pending at any stage. Every pass turns
    /// at least one pending paper into done or failed, so the loop ends.
    pub fn run_until_idle(
        &self,
        batch_size: usize,
        max_passes: usize,
        cancel: &CancelToken,
    ) -> Result<Vec<PassReport>, PipelineError> {
        let mut reports = Vec::new();
        for pass in 1..=max_passes {
            let report = self.pass(batch_size, cancel, pass == 1)?;
            let (progressed, cancelled) = (report.made_progress(), report.cancelled);
            reports.push(report);
            if cancelled {
                break;
            }
            if !progressed && !self.has_pending()? {
                log::info!("Idle after {pass} passes");
                break;
            }
        }
        Ok(reports)
    }

    /// Some paper has a tracked stage never attempted since it became eligible.
    fn has_pending(&self) -> Result<bool, PipelineError> {
        let counts = self.store.stage_counts()?;
        Ok(counts.iter().any(|(_, c)| c.pending > 0))
    }

    fn pass(
        &self,
        batch_size: usize,
        cancel: &CancelToken,
        with_metadata: bool,
    ) -> Result<PassReport, PipelineError> {
        if batch_size == 0 {
            return Err(ConfigError::new("batch_size", "must be at least 1").into());
        }
        let started = Instant::now();
        let mut report = PassReport::default();

        for stage in Stage::ALL {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let stage_report = match stage {
                Stage::Metadata if !with_metadata => continue,
                Stage::Metadata => self.ingest(cancel, &mut report.ingest)?,
                _ => self.advance(stage, batch_size, cancel)?,
            };
            report.stages.push(stage_report);
        }
        if cancel.is_cancelled() {
            report.cancelled = true;
        }

        report.elapsed = started.elapsed();
        report.log();
        Ok(report)
    }

    /// Select up to `batch_size` papers eligible for a tracked stage and run
    /// its action over them.
    fn advance(
        &self,
        stage: Stage,
        batch_size: usize,
        cancel: &CancelToken,
    ) -> Result<ExecutionReport, PipelineError> {
        let papers = self.store.fetch_eligible(stage, batch_size)?;
        if papers.is_empty() {
            log::debug!("{stage}: nothing eligible");
            return Ok(ExecutionReport::empty(stage));
        }
        let units: Vec<WorkUnit> = papers
            .into_iter()
            .map(|paper| WorkUnit::new(paper, stage))
            .collect();

        let key = self.config.stages.get(stage).collaborator_key(stage);
        let pb = self.progress.stage_bar(stage.name(), units.len());
        let result = self.executor(stage).run(
            &units,
            |paper| self.act(stage, paper),
            key,
            self.store.as_ref(),
            cancel,
            &pb,
        );
        pb.finish_and_clear();
        Ok(result?)
    }

    /// The action of one tracked stage for one paper.
    fn act(&self, stage: Stage, paper: &Paper) -> Result<StageOutput, CollaboratorError> {
        match stage {
            Stage::Download => {
                let bytes = self.collab.fetcher.fetch(&paper.metadata)?;
                let location = self.collab.blobs.put(paper.id(), &bytes)?;
                Ok(StageOutput::ContentLocation(location))
            }
            Stage::Extract => {
                let location = required_input(paper, "content_location", &paper.content_location)?;
                let bytes = self.collab.blobs.get(location)?;
                let text = self.collab.extractor.extract(&bytes)?;
                Ok(StageOutput::ExtractedText(text))
            }
            Stage::Translate => {
                let text = required_input(paper, "extracted_text", &paper.extracted_text)?;
                let translated = self.collab.translator.translate(text)?;
                Ok(StageOutput::TranslatedText(translated))
            }
            Stage::Metadata => Err(CollaboratorError::permanent(
                "metadata is ingested per query, not per paper",
            )),
        }
    }

    /// Metadata stage: each configured query is one unit. A unit drains the
    /// source's sequence (up to the query's limit) and its records are
    /// upserted on the calling thread. A failed attempt restarts the
    /// sequence from the beginning; upserts are idempotent.
    fn ingest(
        &self,
        cancel: &CancelToken,
        summary: &mut IngestSummary,
    ) -> Result<ExecutionReport, PipelineError> {
        let stage = Stage::Metadata;
        let queries = &self.config.queries;
        if queries.is_empty() {
            log::debug!("metadata: no queries configured");
            return Ok(ExecutionReport::empty(stage));
        }

        let key = self.config.stages.metadata.collaborator_key(stage);
        let source = self.collab.source.as_ref();
        let store = self.store.as_ref();
        let pb = self.progress.stage_bar(stage.name(), queries.len());
        let result = self.executor(stage).execute(
            queries,
            key,
            |q: &MetadataQuery| q.category.as_str(),
            |q| collect_query(source, q),
            |q, result| {
                if let Ok(records) = result {
                    let before = *summary;
                    for metadata in &records {
                        summary.add(store.upsert_metadata(metadata)?);
                    }
                    log::info!(
                        "{} {q}: {} records, {} new",
                        source.name(),
                        records.len(),
                        summary.inserted - before.inserted
                    );
                }
                Ok(())
            },
            cancel,
            &pb,
        );
        pb.finish_and_clear();
        Ok(result?)
    }
}

fn collect_query(
    source: &dyn MetadataSource,
    query: &MetadataQuery,
) -> Result<Vec<PaperMetadata>, CollaboratorError> {
    let limit = query.limit.unwrap_or(usize::MAX);
    source.fetch_batch(query).take(limit).collect()
}

fn required_input<'a>(
    paper: &Paper,
    field: &str,
    value: &'a Option<String>,
) -> Result<&'a str, CollaboratorError> {
    value.as_deref().ok_or_else(|| {
        CollaboratorError::new(
            ErrorKind::Malformed,
            format!("{} has no {field}", paper.id()),
        )
    })
}
