//! PDF download from arxiv.org

use paperflow_core::{CollaboratorError, ContentFetcher, ErrorKind, HttpClient, PaperMetadata};

use crate::config::ArxivConfig;

/// Fetches the PDF rendition of a paper.
pub struct ArxivFetcher {
    config: ArxivConfig,
    http: HttpClient,
}

impl ArxivFetcher {
    pub fn new(config: ArxivConfig, http: HttpClient) -> Self {
        Self { config, http }
    }

    pub fn url_for(&self, paper: &PaperMetadata) -> String {
        self.config.pdf_url_for(&paper.id)
    }
}

impl ContentFetcher for ArxivFetcher {
    fn fetch(&self, paper: &PaperMetadata) -> Result<Vec<u8>, CollaboratorError> {
        let url = self.url_for(paper);
        log::debug!("downloading {} from {url}", paper.id);
        let bytes = self.http.get_bytes(&url)?;
        if bytes.is_empty() {
            // arxiv.org occasionally answers 200 with no body while a PDF is being built
            return Err(CollaboratorError::new(
                ErrorKind::Unavailable,
                format!("empty response for {}", paper.id),
            ));
        }
        log::debug!("downloaded {} ({} bytes)", paper.id, bytes.len());
        Ok(bytes)
    }
}
