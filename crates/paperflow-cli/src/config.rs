//! `paperflow.toml`: storage paths plus the pipeline, arXiv, translator and
//! HTTP sections

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use paperflow_arxiv::ArxivConfig;
use paperflow_core::HttpConfig;
use paperflow_pipeline::PipelineConfig;
use paperflow_text::TranslatorConfig;
use serde::Deserialize;

/// Whole application configuration; every section is optional.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
    pub arxiv: ArxivConfig,
    pub translator: TranslatorConfig,
    pub http: HttpSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// DuckDB file holding per-paper state
    pub database: PathBuf,
    /// Root directory of the blob store
    pub blob_dir: PathBuf,
    /// Key prefix of stored PDFs inside `blob_dir`
    pub blob_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("./data/paperflow.duckdb"),
            blob_dir: PathBuf::from("./data"),
            blob_prefix: "papers/arxiv".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    pub user_agent: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for HttpSection {
    fn default() -> Self {
        let defaults = HttpConfig::default();
        Self {
            user_agent: defaults.user_agent,
            connect_timeout_secs: defaults.connect_timeout.as_secs(),
            request_timeout_secs: defaults.request_timeout.as_secs(),
        }
    }
}

impl HttpSection {
    pub fn to_http_config(&self) -> HttpConfig {
        HttpConfig {
            user_agent: self.user_agent.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

/// Replace every `${NAME}` in `raw` with the environment variable `NAME`.
///
/// Returns the name of the first unset variable as the error.
fn substitute_env(raw: &str) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(open) = rest.find("${") {
        let Some(len) = rest[open + 2..].find('}') else {
            break;
        };
        let name = &rest[open + 2..open + 2 + len];
        let value = std::env::var(name).map_err(|_| name.to_string())?;
        out.push_str(&rest[..open]);
        out.push_str(&value);
        rest = &rest[open + 3 + len..];
    }
    out.push_str(rest);
    Ok(out)
}

impl Config {
    /// First existing file among `./paperflow.toml` and the per-user
    /// `config.toml` (`~/.config/paperflow/` on Linux), else defaults.
    pub fn load() -> Result<Self> {
        let mut candidates = vec![PathBuf::from("paperflow.toml")];
        if let Some(dirs) = directories::ProjectDirs::from("", "", "paperflow") {
            candidates.push(dirs.config_dir().join("config.toml"));
        }
        match candidates.iter().find(|p| p.is_file()) {
            Some(path) => Self::from_file(path),
            None => {
                log::debug!("no paperflow.toml found, running on built-in defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        let mut config: Config =
            toml::from_str(&text).with_context(|| format!("cannot parse {}", path.display()))?;
        config
            .expand_env()
            .with_context(|| format!("in {}", path.display()))?;
        log::info!("config: {}", path.display());
        Ok(config)
    }

    /// Endpoint and identity settings may reference environment variables.
    fn expand_env(&mut self) -> Result<()> {
        let fields = [
            ("translator.base_url", &mut self.translator.base_url),
            ("translator.model", &mut self.translator.model),
            ("arxiv.api_url", &mut self.arxiv.api_url),
            ("arxiv.pdf_url", &mut self.arxiv.pdf_url),
            ("http.user_agent", &mut self.http.user_agent),
        ];
        for (field, value) in fields {
            *value = substitute_env(value)
                .map_err(|var| anyhow::anyhow!("{field}: environment variable {var} is not set"))?;
        }
        Ok(())
    }
}
