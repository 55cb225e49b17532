//! Paper records and their per-stage progress

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::stage::{Stage, StageOutput};

/// Metadata captured when a paper is first ingested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperMetadata {
    /// Stable external identifier (version suffix stripped)
    pub id: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub authors: Vec<String>,
    pub categories: Vec<String>,
    pub submission_date: NaiveDate,
    pub update_date: NaiveDate,
}

/// Progress of one tracked stage.
///
/// `completed_at` and `error` are never both set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl StageRecord {
    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// Derived per-stage state of a paper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    /// Prior stage not complete yet
    Blocked,
    Pending,
    Done,
    /// Last attempt failed; re-selected on the next pass
    Failed,
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Blocked => "blocked",
            Self::Pending => "pending",
            Self::Done => "done",
            Self::Failed => "failed",
        })
    }
}

/// Full persisted state of a paper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paper {
    #[serde(flatten)]
    pub metadata: PaperMetadata,
    pub download: StageRecord,
    pub extract: StageRecord,
    pub translate: StageRecord,
    pub content_location: Option<String>,
    pub extracted_text: Option<String>,
    pub translated_text: Option<String>,
}

impl Paper {
    /// Freshly ingested paper: only metadata is present.
    pub fn new(metadata: PaperMetadata) -> Self {
        Self {
            metadata,
            download: StageRecord::default(),
            extract: StageRecord::default(),
            translate: StageRecord::default(),
            content_location: None,
            extracted_text: None,
            translated_text: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    /// Progress record of a tracked stage. `None` for the metadata stage.
    pub fn record(&self, stage: Stage) -> Option<&StageRecord> {
        match stage {
            Stage::Metadata => None,
            Stage::Download => Some(&self.download),
            Stage::Extract => Some(&self.extract),
            Stage::Translate => Some(&self.translate),
        }
    }

    pub fn record_mut(&mut self, stage: Stage) -> Option<&mut StageRecord> {
        match stage {
            Stage::Metadata => None,
            Stage::Download => Some(&mut self.download),
            Stage::Extract => Some(&mut self.extract),
            Stage::Translate => Some(&mut self.translate),
        }
    }

    /// Output field of a tracked stage.
    pub fn output(&self, stage: Stage) -> Option<&str> {
        match stage {
            Stage::Metadata => None,
            Stage::Download => self.content_location.as_deref(),
            Stage::Extract => self.extracted_text.as_deref(),
            Stage::Translate => self.translated_text.as_deref(),
        }
    }

    /// Whether `stage` has completed. The metadata stage is complete by existence.
    pub fn is_complete(&self, stage: Stage) -> bool {
        self.record(stage).map_or(true, StageRecord::is_complete)
    }

    pub fn status(&self, stage: Stage) -> StageStatus {
        if let Some(prev) = stage.previous() {
            if !self.is_complete(prev) {
                return StageStatus::Blocked;
            }
        }
        match self.record(stage) {
            None => StageStatus::Done,
            Some(r) if r.is_complete() => StageStatus::Done,
            Some(r) if r.error.is_some() => StageStatus::Failed,
            Some(_) => StageStatus::Pending,
        }
    }

    /// Eligible = prior stage done, this stage not done.
    pub fn is_eligible(&self, stage: Stage) -> bool {
        matches!(
            self.status(stage),
            StageStatus::Pending | StageStatus::Failed
        )
    }

    /// Every tracked stage complete.
    pub fn is_terminal(&self) -> bool {
        Stage::TRACKED.iter().all(|s| self.is_complete(*s))
    }

    /// Apply a successful stage output in place.
    ///
    /// Returns `false` (and changes nothing) if the stage was already complete.
    pub fn apply_success(&mut self, output: StageOutput, at: DateTime<Utc>) -> bool {
        let stage = output.stage();
        if self.is_complete(stage) {
            return false;
        }
        match output {
            StageOutput::ContentLocation(v) => self.content_location = Some(v),
            StageOutput::ExtractedText(v) => self.extracted_text = Some(v),
            StageOutput::TranslatedText(v) => self.translated_text = Some(v),
        }
        if let Some(record) = self.record_mut(stage) {
            record.completed_at = Some(at);
            record.error = None;
        }
        true
    }

    /// Record a failed attempt. No-op on a completed stage.
    pub fn apply_failure(&mut self, stage: Stage, message: &str) -> bool {
        match self.record_mut(stage) {
            Some(record) if !record.is_complete() => {
                record.error = Some(message.to_string());
                true
            }
            _ => false,
        }
    }

    /// Check the row-level invariants: output present iff complete, complete
    /// excludes error, and no stage complete ahead of its predecessor.
    pub fn check_invariants(&self) -> Result<(), String> {
        for stage in Stage::TRACKED {
            let Some(record) = self.record(stage) else {
                continue;
            };
            if record.is_complete() != self.output(stage).is_some() {
                return Err(format!("{}: {stage} output/completed_at mismatch", self.id()));
            }
            if record.is_complete() && record.error.is_some() {
                return Err(format!("{}: {stage} both completed and failed", self.id()));
            }
            if let Some(prev) = stage.previous() {
                if record.is_complete() && !self.is_complete(prev) {
                    return Err(format!("{}: {stage} complete before {prev}", self.id()));
                }
            }
        }
        Ok(())
    }
}

/// One (paper, stage) pair scheduled for execution. Never persisted.
#[derive(Debug, Clone)]
pub struct WorkUnit {
    pub paper: Paper,
    pub stage: Stage,
}

impl WorkUnit {
    pub fn new(paper: Paper, stage: Stage) -> Self {
        Self { paper, stage }
    }

    pub fn id(&self) -> &str {
        self.paper.id()
    }
}

#[cfg(test)]
pub(crate) fn sample_metadata(id: &str) -> PaperMetadata {
    PaperMetadata {
        id: id.to_string(),
        title: format!("Paper {id}"),
        abstract_text: "An abstract.".to_string(),
        authors: vec!["A. Author".to_string()],
        categories: vec!["physics.geo-ph".to_string()],
        submission_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
        update_date: NaiveDate::from_ymd_opt(2025, 3, 2).unwrap(),
    }
}
