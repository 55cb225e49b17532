//! paperflow-core: shared building blocks for the paper processing pipeline
//!
//! Stage and paper model, collaborator capability traits, the collaborator
//! error taxonomy, retry policy, rate limiting, cancellation, HTTP access
//! and logging/progress plumbing.

pub mod cancel;
pub mod collab;
pub mod error;
pub mod logging;
pub mod paper;
pub mod progress;
pub mod ratelimit;
pub mod retry;
pub mod stage;
pub mod stream;

// Re-exports for convenience
pub use cancel::CancelToken;
pub use collab::{
    BlobStore, ContentFetcher, MetadataQuery, MetadataSource, MetadataStream, TextExtractor,
    Translator,
};
pub use error::{CollaboratorError, ConfigError, ErrorKind};
pub use logging::{IndicatifLogger, init_logging};
pub use paper::{Paper, PaperMetadata, StageRecord, StageStatus, WorkUnit};
pub use progress::{ProgressContext, SharedProgress, fmt_count};
pub use ratelimit::{RateLimitConfig, RateLimiter};
pub use retry::{Attempted, GiveUp, RetryConfig, RetryDecision, RetryPolicy};
pub use stage::{Stage, StageOutput};
pub use stream::{HttpClient, HttpConfig, SHARED_RUNTIME, StreamError};
