//! Ollama `/api/generate` client

use std::time::Duration;

use paperflow_core::{CollaboratorError, ErrorKind, HttpClient, HttpConfig};
use serde::{Deserialize, Serialize};

use crate::translate::{LlmBackend, TranslatorConfig};

/// Request body for Ollama /api/generate
#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

/// Response body from Ollama /api/generate
#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Blocking client for a local or remote Ollama instance.
pub struct OllamaClient {
    base_url: String,
    model: String,
    http: HttpClient,
}

impl OllamaClient {
    /// Build a client with its own timeout, on top of the shared HTTP settings.
    pub fn new(config: &TranslatorConfig, http: &HttpConfig) -> Result<Self, CollaboratorError> {
        let http = HttpClient::new(&HttpConfig {
            request_timeout: Duration::from_secs(config.timeout_secs),
            ..http.clone()
        })?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            http,
        })
    }

    pub fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }
}

/// A 429 whose body talks about quota is a hard limit, not back-pressure.
fn classify(err: CollaboratorError) -> CollaboratorError {
    if err.kind == ErrorKind::RateLimited && err.message.to_ascii_lowercase().contains("quota") {
        return CollaboratorError::new(ErrorKind::QuotaExhausted, err.message);
    }
    err
}

impl LlmBackend for OllamaClient {
    fn generate(&self, prompt: &str) -> Result<String, CollaboratorError> {
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };
        let response: GenerateResponse = self
            .http
            .post_json(&self.generate_url(), &body)
            .map_err(|e| classify(e.into()))?;
        Ok(response.response)
    }
}
