//! paperflow-text: text extraction and translation collaborators.

mod chunk;
mod extract;
mod ollama;
mod translate;

pub use chunk::split_text;
pub use extract::PdfTextExtractor;
pub use ollama::OllamaClient;
pub use translate::{ChunkedTranslator, LlmBackend, TranslatorConfig};
