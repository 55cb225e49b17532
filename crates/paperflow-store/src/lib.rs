//! paperflow-store: durable paper progress and downloaded content.
//!
//! - [`StateStore`]: per-paper stage progress, implemented by
//!   [`DuckDbStore`] (on disk) and [`MemoryStore`] (tests, dry runs)
//! - [`FsBlobStore`]: atomic file writes for downloaded PDFs

mod blob;
mod db;
mod error;
mod memory;
mod sql;
mod state;

pub use blob::FsBlobStore;
pub use db::DuckDbStore;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use state::{StageCounts, StateStore, UpsertOutcome};
