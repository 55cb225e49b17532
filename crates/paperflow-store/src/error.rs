//! Store errors. Every variant is an integrity failure for the running pass.

use paperflow_core::Stage;

#[derive(Debug)]
pub enum StoreError {
    /// Backend rejected or failed a statement
    Database(duckdb::Error),
    /// Paper id not present
    NotFound(String),
    /// Operation has no meaning for this stage (e.g. success on `metadata`)
    UnsupportedStage(Stage),
    /// Success recorded before the prior stage completed
    OutOfOrder { id: String, stage: Stage },
    /// Persisted row cannot be decoded or violates its invariants
    Corrupt { id: String, reason: String },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Database(e) => write!(f, "database: {e}"),
            Self::NotFound(id) => write!(f, "paper {id} not found"),
            Self::UnsupportedStage(stage) => write!(f, "stage {stage} has no persisted progress"),
            Self::OutOfOrder { id, stage } => {
                write!(f, "{id}: {stage} completed before its prior stage")
            }
            Self::Corrupt { id, reason } => write!(f, "{id}: corrupt row: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Database(e) => Some(e),
            _ => None,
        }
    }
}

impl From<duckdb::Error> for StoreError {
    fn from(e: duckdb::Error) -> Self {
        Self::Database(e)
    }
}
