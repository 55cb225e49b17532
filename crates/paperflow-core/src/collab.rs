//! Capability traits for the external systems each stage calls.
//!
//! Concrete implementations are injected into the coordinator at
//! construction. All calls are blocking and may be made from several worker
//! threads at once, hence the `Send + Sync` bounds.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;
use crate::paper::PaperMetadata;

/// Selection of papers to ingest from a metadata source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataQuery {
    /// Subject category, e.g. `physics.geo-ph`
    pub category: String,
    /// First submission day (inclusive)
    pub start_date: NaiveDate,
    /// Last submission day (inclusive)
    pub end_date: NaiveDate,
    /// Upper bound on records returned
    #[serde(default)]
    pub limit: Option<usize>,
}

impl std::fmt::Display for MetadataQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}..{}]", self.category, self.start_date, self.end_date)
    }
}

/// Lazy sequence of metadata records produced by a [`MetadataSource`].
pub type MetadataStream<'a> =
    Box<dyn Iterator<Item = Result<PaperMetadata, CollaboratorError>> + Send + 'a>;

/// Produces paper metadata records.
pub trait MetadataSource: Send + Sync {
    /// Short lowercase name for logs
    fn name(&self) -> &str;

    /// Start a fresh, finite sequence of records for `query`.
    ///
    /// Calling this again restarts from the beginning.
    fn fetch_batch<'a>(&'a self, query: &'a MetadataQuery) -> MetadataStream<'a>;
}

/// Retrieves the binary content of a paper.
pub trait ContentFetcher: Send + Sync {
    fn fetch(&self, paper: &PaperMetadata) -> Result<Vec<u8>, CollaboratorError>;
}

/// Durable object storage addressed by opaque location strings.
pub trait BlobStore: Send + Sync {
    /// Store content for a paper and return its location.
    fn put(&self, paper_id: &str, bytes: &[u8]) -> Result<String, CollaboratorError>;

    /// Read content previously returned by [`BlobStore::put`].
    fn get(&self, location: &str) -> Result<Vec<u8>, CollaboratorError>;
}

/// Turns stored binary content into plain text.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, content: &[u8]) -> Result<String, CollaboratorError>;
}

/// Translates extracted text.
///
/// Quota exhaustion is reported as [`crate::ErrorKind::QuotaExhausted`],
/// which is never retried.
pub trait Translator: Send + Sync {
    fn translate(&self, text: &str) -> Result<String, CollaboratorError>;
}
