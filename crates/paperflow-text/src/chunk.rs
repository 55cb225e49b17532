//! Paragraph-aware text chunking for length-limited translation backends.

/// Split `text` into chunks of at most `chunk_size` characters, breaking
/// only between paragraphs (blank lines).
///
/// A single paragraph longer than `chunk_size` becomes a chunk of its own.
/// Chunks are meant to be re-joined with `"\n\n"`.
pub fn split_text(text: &str, chunk_size: usize) -> Vec<String> {
    if text.chars().count() <= chunk_size {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for paragraph in text.split("\n\n") {
        let len = paragraph.chars().count();
        let joined_len = if current.is_empty() {
            len
        } else {
            current_len + 2 + len
        };

        if joined_len <= chunk_size {
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(paragraph);
            current_len = joined_len;
        } else {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            current.push_str(paragraph);
            current_len = len;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
