//! Pass-level summaries

use std::time::Duration;

use paperflow_core::Stage;
use paperflow_store::UpsertOutcome;

use crate::executor::ExecutionReport;

/// What the metadata stage did with the records it received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub records: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl IngestSummary {
    pub fn add(&mut self, outcome: UpsertOutcome) {
        self.records += 1;
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
        }
    }
}

/// Aggregate result of one coordinator pass.
///
/// Per-paper failures are counted here, never raised.
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    /// One entry per stage that ran, in pass order
    pub stages: Vec<ExecutionReport>,
    pub ingest: IngestSummary,
    /// The pass stopped early on a cancellation request
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl PassReport {
    pub fn stage(&self, stage: Stage) -> Option<&ExecutionReport> {
        self.stages.iter().find(|r| r.stage == stage)
    }

    pub fn succeeded(&self) -> usize {
        self.stages.iter().map(|r| r.succeeded).sum()
    }

    pub fn failed(&self) -> usize {
        self.stages.iter().map(|r| r.failed).sum()
    }

    /// New papers ingested or any tracked stage completed for some paper.
    pub fn made_progress(&self) -> bool {
        self.ingest.inserted > 0
            || self
                .stages
                .iter()
                .any(|r| r.stage.is_tracked() && r.succeeded > 0)
    }

    pub fn log(&self) {
        let stages = self
            .stages
            .iter()
            .map(|r| match r.stage {
                Stage::Metadata => format!(
                    "metadata {} records ({} new)",
                    self.ingest.records, self.ingest.inserted
                ),
                stage => format!("{stage} {}/{}", r.succeeded, r.total),
            })
            .collect::<Vec<_>>()
            .join(", ");
        let stages = if stages.is_empty() { "nothing to do".to_string() } else { stages };
        log::info!(
            "Pass {}: {stages} in {:.1}s",
            if self.cancelled { "cancelled" } else { "done" },
            self.elapsed.as_secs_f64()
        );
    }
}
