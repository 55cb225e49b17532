//! In-process store for tests and dry runs.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::Utc;
use paperflow_core::{Paper, PaperMetadata, Stage, StageOutput, StageStatus};

use crate::error::StoreError;
use crate::state::{require_tracked, StageCounts, StateStore, UpsertOutcome};

/// [`StateStore`] backed by a map under one lock.
#[derive(Default)]
pub struct MemoryStore {
    papers: Mutex<BTreeMap<String, Paper>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with papers in arbitrary states.
    pub fn with_papers(papers: impl IntoIterator<Item = Paper>) -> Self {
        let map = papers
            .into_iter()
            .map(|p| (p.id().to_string(), p))
            .collect();
        Self {
            papers: Mutex::new(map),
        }
    }

    /// Snapshot of every paper, ordered by id.
    pub fn snapshot(&self) -> Vec<Paper> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Paper>> {
        self.papers.lock().expect("memory store lock poisoned")
    }
}

impl StateStore for MemoryStore {
    fn fetch_eligible(&self, stage: Stage, limit: usize) -> Result<Vec<Paper>, StoreError> {
        require_tracked(stage)?;
        let papers = self.lock();
        let mut eligible: Vec<&Paper> = papers.values().filter(|p| p.is_eligible(stage)).collect();
        let failed = |p: &Paper| p.status(stage) == StageStatus::Failed;
        eligible.sort_by(|a, b| {
            failed(a)
                .cmp(&failed(b))
                .then_with(|| b.metadata.submission_date.cmp(&a.metadata.submission_date))
                .then_with(|| a.id().cmp(b.id()))
        });
        Ok(eligible.into_iter().take(limit).cloned().collect())
    }

    fn record_success(&self, paper_id: &str, output: StageOutput) -> Result<bool, StoreError> {
        let stage = output.stage();
        let mut papers = self.lock();
        let paper = papers
            .get_mut(paper_id)
            .ok_or_else(|| StoreError::NotFound(paper_id.to_string()))?;
        if paper.is_complete(stage) {
            return Ok(false);
        }
        if let Some(prev) = stage.previous() {
            if !paper.is_complete(prev) {
                return Err(StoreError::OutOfOrder {
                    id: paper_id.to_string(),
                    stage,
                });
            }
        }
        Ok(paper.apply_success(output, Utc::now()))
    }

    fn record_failure(
        &self,
        paper_id: &str,
        stage: Stage,
        message: &str,
    ) -> Result<bool, StoreError> {
        require_tracked(stage)?;
        let mut papers = self.lock();
        let paper = papers
            .get_mut(paper_id)
            .ok_or_else(|| StoreError::NotFound(paper_id.to_string()))?;
        Ok(paper.apply_failure(stage, message))
    }

    fn upsert_metadata(&self, metadata: &PaperMetadata) -> Result<UpsertOutcome, StoreError> {
        let mut papers = self.lock();
        match papers.get_mut(&metadata.id) {
            None => {
                papers.insert(metadata.id.clone(), Paper::new(metadata.clone()));
                Ok(UpsertOutcome::Inserted)
            }
            Some(existing) => {
                let current = &mut existing.metadata;
                let changed = current.title != metadata.title
                    || current.abstract_text != metadata.abstract_text
                    || current.authors != metadata.authors
                    || current.categories != metadata.categories
                    || current.update_date != metadata.update_date;
                if !changed {
                    return Ok(UpsertOutcome::Unchanged);
                }
                current.title = metadata.title.clone();
                current.abstract_text = metadata.abstract_text.clone();
                current.authors = metadata.authors.clone();
                current.categories = metadata.categories.clone();
                current.update_date = metadata.update_date;
                Ok(UpsertOutcome::Updated)
            }
        }
    }

    fn get(&self, paper_id: &str) -> Result<Option<Paper>, StoreError> {
        Ok(self.lock().get(paper_id).cloned())
    }

    fn stage_counts(&self) -> Result<Vec<(Stage, StageCounts)>, StoreError> {
        let papers = self.lock();
        Ok(Stage::TRACKED
            .iter()
            .map(|&stage| {
                let mut counts = StageCounts::default();
                for paper in papers.values() {
                    counts.add(paper.status(stage));
                }
                (stage, counts)
            })
            .collect())
    }

    fn failures(&self, stage: Stage, limit: usize) -> Result<Vec<(String, String)>, StoreError> {
        require_tracked(stage)?;
        let papers = self.lock();
        Ok(papers
            .values()
            .filter(|p| !p.is_complete(stage))
            .filter_map(|p| {
                let error = p.record(stage)?.error.clone()?;
                Some((p.id().to_string(), error))
            })
            .take(limit)
            .collect())
    }
}
