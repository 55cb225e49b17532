//! arXiv endpoint configuration

use std::time::Duration;

use serde::Deserialize;

/// Settings for the arXiv metadata source and PDF fetcher.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArxivConfig {
    /// Atom query endpoint
    pub api_url: String,
    /// PDF URL template; `{id}` is replaced with the paper id
    pub pdf_url: String,
    /// Results requested per API page (arXiv caps this at 2000)
    pub page_size: usize,
    /// Pause between consecutive API pages; arXiv asks for 3s
    pub page_delay_secs: f64,
}

impl Default for ArxivConfig {
    fn default() -> Self {
        Self {
            api_url: "http://export.arxiv.org/api/query".to_string(),
            pdf_url: "https://arxiv.org/pdf/{id}.pdf".to_string(),
            page_size: 100,
            page_delay_secs: 3.0,
        }
    }
}

impl ArxivConfig {
    pub fn page_delay(&self) -> Duration {
        Duration::from_secs_f64(self.page_delay_secs.max(0.0))
    }

    pub fn pdf_url_for(&self, id: &str) -> String {
        self.pdf_url.replace("{id}", id)
    }
}
