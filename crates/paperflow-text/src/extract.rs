//! PDF text extraction

use paperflow_core::{CollaboratorError, ErrorKind, TextExtractor};

/// Pure-Rust PDF text extraction via `pdf-extract`.
///
/// Malformed PDFs can make `pdf-extract` panic; a panic is reported as a
/// permanent `Unsupported` error instead of tearing down the worker.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfTextExtractor;

impl PdfTextExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl TextExtractor for PdfTextExtractor {
    fn extract(&self, content: &[u8]) -> Result<String, CollaboratorError> {
        if content.is_empty() {
            return Err(CollaboratorError::new(ErrorKind::Malformed, "empty content"));
        }
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            pdf_extract::extract_text_from_mem(content)
        }));
        let text = match result {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                return Err(CollaboratorError::new(
                    ErrorKind::Unsupported,
                    format!("PDF extraction failed: {e}"),
                ))
            }
            Err(_) => {
                return Err(CollaboratorError::new(
                    ErrorKind::Unsupported,
                    "PDF extraction panicked (malformed PDF)",
                ))
            }
        };
        finish(text)
    }
}

/// Trim extracted text and reject documents without any.
fn finish(text: String) -> Result<String, CollaboratorError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(CollaboratorError::new(
            ErrorKind::Unsupported,
            "no text could be extracted",
        ));
    }
    log::debug!("extracted {} characters", text.chars().count());
    Ok(text.to_string())
}
