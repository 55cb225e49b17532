//! The persistence contract the pipeline runs against.

use paperflow_core::{Paper, PaperMetadata, Stage, StageOutput, StageStatus};

use crate::error::StoreError;

/// What `upsert_metadata` did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    /// Existing paper with changed descriptive fields
    Updated,
    Unchanged,
}

/// Per-stage paper counts for status reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageCounts {
    pub blocked: u64,
    pub pending: u64,
    pub done: u64,
    pub failed: u64,
}

impl StageCounts {
    pub fn add(&mut self, status: StageStatus) {
        match status {
            StageStatus::Blocked => self.blocked += 1,
            StageStatus::Pending => self.pending += 1,
            StageStatus::Done => self.done += 1,
            StageStatus::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.blocked + self.pending + self.done + self.failed
    }
}

/// Durable per-paper progress.
///
/// Implementations serialize their own writes; callers may share one store
/// across threads. Every method is a single atomic update: a reader never
/// observes an output without its `completed_at`.
pub trait StateStore: Send + Sync {
    /// Up to `limit` papers eligible for `stage`, newest submission first,
    /// ties broken by id. Failed papers are included.
    fn fetch_eligible(&self, stage: Stage, limit: usize) -> Result<Vec<Paper>, StoreError>;

    /// Persist `output` and mark its stage complete, clearing any error.
    ///
    /// Returns `false` without changing anything if the stage was already
    /// complete (first success wins).
    fn record_success(&self, paper_id: &str, output: StageOutput) -> Result<bool, StoreError>;

    /// Overwrite the stage's error message. No-op (returns `false`) when the
    /// stage is already complete.
    fn record_failure(&self, paper_id: &str, stage: Stage, message: &str)
        -> Result<bool, StoreError>;

    /// Insert a new paper or refresh descriptive fields of an existing one.
    ///
    /// Stage progress and `submission_date` of an existing paper are left alone.
    fn upsert_metadata(&self, metadata: &PaperMetadata) -> Result<UpsertOutcome, StoreError>;

    fn get(&self, paper_id: &str) -> Result<Option<Paper>, StoreError>;

    /// Counts for every tracked stage, in pass order.
    fn stage_counts(&self) -> Result<Vec<(Stage, StageCounts)>, StoreError>;

    /// Papers whose last attempt at `stage` failed, as `(id, error)`.
    fn failures(&self, stage: Stage, limit: usize) -> Result<Vec<(String, String)>, StoreError>;
}

/// Reject operations on the untracked metadata stage.
pub(crate) fn require_tracked(stage: Stage) -> Result<(), StoreError> {
    if stage.is_tracked() {
        Ok(())
    } else {
        Err(StoreError::UnsupportedStage(stage))
    }
}
