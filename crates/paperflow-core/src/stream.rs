//! Blocking HTTP access for collaborators.
//!
//! Uses async reqwest on a shared tokio runtime with `tokio::time::timeout`
//! around each request, but presents a sync interface so stage workers can
//! call it from plain threads.

use std::io;
use std::sync::LazyLock;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Error types for HTTP operations
#[derive(Debug)]
pub enum StreamError {
    /// Transport failure or non-success response
    Http {
        status: Option<u16>,
        message: String,
        /// Parsed `Retry-After` header, if the server sent one
        retry_after: Option<Duration>,
    },
    /// Response arrived but its body could not be decoded
    Decode(String),
    /// Request exceeded its deadline
    Timeout(Duration),
    /// I/O error
    Io(io::Error),
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http {
                status: Some(s),
                message,
                ..
            } => write!(f, "HTTP {s}: {message}"),
            Self::Http {
                status: None,
                message,
                ..
            } => write!(f, "HTTP error: {message}"),
            Self::Decode(message) => write!(f, "undecodable response: {message}"),
            Self::Timeout(d) => write!(f, "request timed out after {}s", d.as_secs()),
            Self::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for StreamError {}

impl StreamError {
    /// Keeps the status code when reqwest has one
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_decode() {
            return Self::Decode(e.to_string());
        }
        Self::Http {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
            retry_after: None,
        }
    }
}

impl From<io::Error> for StreamError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Runtime the blocking HTTP helpers drive their futures on.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// Connection settings for an [`HttpClient`].
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub user_agent: String,
    pub connect_timeout: Duration,
    /// Deadline for a whole request including the body
    pub request_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("paperflow/", env!("CARGO_PKG_VERSION")).to_string(),
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Pooled HTTP client with a sync facade.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
    request_timeout: Duration,
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> Result<Self, StreamError> {
        let inner = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(8)
            .build()
            .map_err(|e| StreamError::from_reqwest(&e))?;
        Ok(Self {
            inner,
            request_timeout: config.request_timeout,
        })
    }

    /// GET a URL and return the raw body.
    pub fn get_bytes(&self, url: &str) -> Result<Vec<u8>, StreamError> {
        let request = self.inner.get(url);
        self.block_on(async move {
            let response = send_checked(request).await?;
            let body = response
                .bytes()
                .await
                .map_err(|e| StreamError::from_reqwest(&e))?;
            Ok(body.to_vec())
        })
    }

    /// GET a URL and return the body as text.
    pub fn get_text(&self, url: &str) -> Result<String, StreamError> {
        let request = self.inner.get(url);
        self.block_on(async move {
            let response = send_checked(request).await?;
            response.text().await.map_err(|e| StreamError::from_reqwest(&e))
        })
    }

    /// POST a JSON body and decode a JSON response.
    pub fn post_json<B, R>(&self, url: &str, body: &B) -> Result<R, StreamError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let request = self.inner.post(url).json(body);
        self.block_on(async move {
            let response = send_checked(request).await?;
            response
                .json::<R>()
                .await
                .map_err(|e| StreamError::from_reqwest(&e))
        })
    }

    fn block_on<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, StreamError>>,
    ) -> Result<T, StreamError> {
        let deadline = self.request_timeout;
        SHARED_RUNTIME.handle().block_on(async move {
            match tokio::time::timeout(deadline, fut).await {
                Ok(result) => result,
                Err(_) => Err(StreamError::Timeout(deadline)),
            }
        })
    }
}

/// Send a request and turn non-2xx statuses into [`StreamError::Http`].
async fn send_checked(request: reqwest::RequestBuilder) -> Result<reqwest::Response, StreamError> {
    let response = request
        .send()
        .await
        .map_err(|e| StreamError::from_reqwest(&e))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    // Keep a short snippet of the body for the error message
    let body = response.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(200).collect();
    Err(StreamError::Http {
        status: Some(status.as_u16()),
        message: if snippet.is_empty() {
            status.to_string()
        } else {
            format!("{status}: {snippet}")
        },
        retry_after,
    })
}

/// Parse a `Retry-After` value given in seconds. HTTP-date values are ignored.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
