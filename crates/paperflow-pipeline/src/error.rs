//! Pass-level errors

use paperflow_core::ConfigError;
use paperflow_store::StoreError;

/// Errors that stop a pipeline pass. Per-paper failures are never reported
/// here; they are recorded on the paper and counted in the pass report.
#[derive(Debug)]
pub enum PipelineError {
    /// State store failed or returned inconsistent state; the pass aborted
    Store(StoreError),
    /// Rejected at construction, before any work started
    Config(ConfigError),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(e) => write!(f, "state store integrity failure: {e}"),
            Self::Config(e) => write!(f, "configuration: {e}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Config(e) => Some(e),
        }
    }
}

impl From<StoreError> for PipelineError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<ConfigError> for PipelineError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}
