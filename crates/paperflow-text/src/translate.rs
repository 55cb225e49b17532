//! Chunked translation on top of a text-generation backend.

use paperflow_core::{CollaboratorError, ErrorKind, Translator};
use serde::Deserialize;

use crate::chunk::split_text;

/// Translation settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TranslatorConfig {
    pub source_lang: String,
    pub target_lang: String,
    /// Max characters per backend call
    pub chunk_size: usize,
    /// Ollama-compatible endpoint
    pub base_url: String,
    pub model: String,
    /// Per-request timeout; local models can be slow on long chunks
    pub timeout_secs: u64,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            source_lang: "English".to_string(),
            target_lang: "Ukrainian".to_string(),
            chunk_size: 5000,
            base_url: "http://localhost:11434".to_string(),
            model: "gemma3".to_string(),
            timeout_secs: 300,
        }
    }
}

/// A model that turns a prompt into a completion.
pub trait LlmBackend: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<String, CollaboratorError>;
}

/// [`Translator`] that splits text into paragraph chunks and translates each
/// with one backend call. Any failed chunk fails the whole text.
pub struct ChunkedTranslator<B> {
    backend: B,
    source_lang: String,
    target_lang: String,
    chunk_size: usize,
}

impl<B: LlmBackend> ChunkedTranslator<B> {
    pub fn new(backend: B, config: &TranslatorConfig) -> Self {
        log::info!(
            "translator: {} -> {}, {} chars per chunk",
            config.source_lang,
            config.target_lang,
            config.chunk_size
        );
        Self {
            backend,
            source_lang: config.source_lang.clone(),
            target_lang: config.target_lang.clone(),
            chunk_size: config.chunk_size.max(1),
        }
    }

    pub fn prompt(&self, chunk: &str) -> String {
        format!(
            "Translate following text from {} to {}. Preserve all formatting, including \
             paragraphs, bullet points, and any special characters:\n\n{chunk}",
            self.source_lang, self.target_lang
        )
    }
}

impl<B: LlmBackend> Translator for ChunkedTranslator<B> {
    fn translate(&self, text: &str) -> Result<String, CollaboratorError> {
        if text.trim().is_empty() {
            return Err(CollaboratorError::new(
                ErrorKind::Malformed,
                "empty text provided for translation",
            ));
        }

        let chunks = split_text(text, self.chunk_size);
        let total = chunks.len();
        let mut translated = Vec::with_capacity(total);
        for (i, chunk) in chunks.iter().enumerate() {
            log::debug!(
                "translating chunk {}/{total} ({} chars)",
                i + 1,
                chunk.chars().count()
            );
            let out = self.backend.generate(&self.prompt(chunk)).map_err(|e| {
                CollaboratorError {
                    message: format!("chunk {}/{total}: {}", i + 1, e.message),
                    ..e
                }
            })?;
            let out = out.trim();
            if out.is_empty() {
                return Err(CollaboratorError::transient(format!(
                    "chunk {}/{total}: empty response",
                    i + 1
                )));
            }
            translated.push(out.to_string());
        }
        Ok(translated.join("\n\n"))
    }
}
