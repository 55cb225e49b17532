//! Error taxonomy shared by all external collaborators

use std::time::Duration;

use crate::stream::StreamError;

/// Classification of a collaborator failure.
///
/// Transient kinds are retried by the retry policy; everything else is
/// recorded on the paper immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Timeout,
    /// Connection-level failure without a response
    Network,
    /// Remote asked us to slow down
    RateLimited,
    /// 5xx or temporarily overloaded backend
    Unavailable,
    NotFound,
    /// Bad identifier or query
    Malformed,
    Unauthorized,
    /// Content we cannot process (e.g. no extractable text)
    Unsupported,
    /// Quota used up for good, distinct from [`ErrorKind::RateLimited`]
    QuotaExhausted,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Network | Self::RateLimited | Self::Unavailable
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::RateLimited => "rate limited",
            Self::Unavailable => "unavailable",
            Self::NotFound => "not found",
            Self::Malformed => "malformed",
            Self::Unauthorized => "unauthorized",
            Self::Unsupported => "unsupported",
            Self::QuotaExhausted => "quota exhausted",
        }
    }
}

/// Failure of a single collaborator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollaboratorError {
    pub kind: ErrorKind,
    pub message: String,
    /// Server-requested wait before the next attempt (HTTP `Retry-After`)
    pub retry_after: Option<Duration>,
}

impl CollaboratorError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Generic transient failure (treated as [`ErrorKind::Unavailable`]).
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    /// Generic permanent failure (treated as [`ErrorKind::Unsupported`]).
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported, message)
    }

    pub fn with_retry_after(mut self, wait: Duration) -> Self {
        self.retry_after = Some(wait);
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl std::fmt::Display for CollaboratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.label(), self.message)
    }
}

impl std::error::Error for CollaboratorError {}

impl From<StreamError> for CollaboratorError {
    fn from(e: StreamError) -> Self {
        let message = e.to_string();
        match e {
            StreamError::Http {
                status: Some(status),
                retry_after,
                ..
            } => {
                let kind = match status {
                    429 => ErrorKind::RateLimited,
                    401 | 403 => ErrorKind::Unauthorized,
                    404 | 410 => ErrorKind::NotFound,
                    500..=599 => ErrorKind::Unavailable,
                    _ => ErrorKind::Malformed,
                };
                Self {
                    kind,
                    message,
                    retry_after,
                }
            }
            StreamError::Http { status: None, .. } => Self::new(ErrorKind::Network, message),
            StreamError::Decode(_) => Self::new(ErrorKind::Malformed, message),
            StreamError::Timeout(_) => Self::new(ErrorKind::Timeout, message),
            StreamError::Io(io) => {
                let kind = match io.kind() {
                    std::io::ErrorKind::TimedOut => ErrorKind::Timeout,
                    std::io::ErrorKind::StorageFull => ErrorKind::Unsupported,
                    _ => ErrorKind::Network,
                };
                Self::new(kind, message)
            }
        }
    }
}

/// Invalid pipeline configuration, rejected before any work starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub field: String,
    pub reason: String,
}

impl ConfigError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid {}: {}", self.field, self.reason)
    }
}

impl std::error::Error for ConfigError {}
