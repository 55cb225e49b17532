//! Pipeline stage identifiers and per-stage outputs

use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the four sequential processing steps a paper moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Metadata,
    Download,
    Extract,
    Translate,
}

impl Stage {
    /// All stages in pass order.
    pub const ALL: [Stage; 4] = [
        Stage::Metadata,
        Stage::Download,
        Stage::Extract,
        Stage::Translate,
    ];

    /// Stages that track `completed_at`/`error` on the paper row.
    pub const TRACKED: [Stage; 3] = [Stage::Download, Stage::Extract, Stage::Translate];

    /// Stage that must be complete before this one is eligible.
    pub fn previous(self) -> Option<Stage> {
        match self {
            Self::Metadata => None,
            Self::Download => Some(Self::Metadata),
            Self::Extract => Some(Self::Download),
            Self::Translate => Some(Self::Extract),
        }
    }

    /// Whether this stage has its own progress columns.
    pub fn is_tracked(self) -> bool {
        !matches!(self, Self::Metadata)
    }

    /// Default rate-limiter key for the collaborator this stage calls.
    pub fn default_collaborator(self) -> &'static str {
        match self {
            Self::Metadata => "metadata",
            Self::Download => "content",
            Self::Extract => "extract",
            Self::Translate => "translator",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Metadata => "metadata",
            Self::Download => "download",
            Self::Extract => "extract",
            Self::Translate => "translate",
        }
    }

    /// Parse a stage name (CLI / config).
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "metadata" => Some(Self::Metadata),
            "download" => Some(Self::Download),
            "extract" => Some(Self::Extract),
            "translate" => Some(Self::Translate),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Output field written by a successful tracked stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutput {
    /// Blob store key of the downloaded content
    ContentLocation(String),
    ExtractedText(String),
    TranslatedText(String),
}

impl StageOutput {
    /// Stage this output belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            Self::ContentLocation(_) => Stage::Download,
            Self::ExtractedText(_) => Stage::Extract,
            Self::TranslatedText(_) => Stage::Translate,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Self::ContentLocation(s) | Self::ExtractedText(s) | Self::TranslatedText(s) => s,
        }
    }
}
