//! paperflow-pipeline: stage execution and pass coordination
//!
//! [`Coordinator`] runs passes over a [`paperflow_store::StateStore`],
//! delegating each stage's batch to a [`StageExecutor`] that bounds
//! concurrency, rate-limits collaborator calls and retries transient
//! failures.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod report;
mod work_queue;

pub use config::{PipelineConfig, StageSettings, StagesConfig};
pub use coordinator::{Collaborators, Coordinator};
pub use error::PipelineError;
pub use executor::{ExecutionReport, StageExecutor};
pub use report::{IngestSummary, PassReport};
