//! Pipeline configuration
//!
//! Built once (usually deserialized from the `[pipeline]` table of the
//! application config), validated at coordinator construction, and never
//! mutated afterwards.

use std::collections::BTreeMap;
use std::time::Duration;

use paperflow_core::{ConfigError, MetadataQuery, RateLimitConfig, RetryConfig, RetryPolicy, Stage};
use serde::Deserialize;

/// Execution settings of one stage.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct StageSettings {
    /// Simultaneously in-flight units
    pub concurrency: usize,
    /// Rate-limiter key of the collaborator this stage calls; defaults to
    /// the stage's own (`metadata`, `content`, `extract`, `translator`)
    pub collaborator: Option<String>,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            concurrency: 1,
            collaborator: None,
        }
    }
}

impl StageSettings {
    fn with_concurrency(concurrency: usize) -> Self {
        Self {
            concurrency,
            collaborator: None,
        }
    }

    pub fn collaborator_key(&self, stage: Stage) -> &str {
        self.collaborator
            .as_deref()
            .unwrap_or_else(|| stage.default_collaborator())
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct StagesConfig {
    pub metadata: StageSettings,
    pub download: StageSettings,
    pub extract: StageSettings,
    pub translate: StageSettings,
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            metadata: StageSettings::with_concurrency(1),
            download: StageSettings::with_concurrency(4),
            extract: StageSettings::with_concurrency(4),
            translate: StageSettings::with_concurrency(2),
        }
    }
}

impl StagesConfig {
    pub fn get(&self, stage: Stage) -> &StageSettings {
        match stage {
            Stage::Metadata => &self.metadata,
            Stage::Download => &self.download,
            Stage::Extract => &self.extract,
            Stage::Translate => &self.translate,
        }
    }
}

/// Everything the coordinator needs besides its collaborators.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Papers selected per stage per pass
    pub batch_size: usize,
    pub stages: StagesConfig,
    /// Token buckets by collaborator key; keys without one are unlimited
    pub rate_limits: BTreeMap<String, RateLimitConfig>,
    pub retry: RetryConfig,
    /// Metadata queries ingested by the metadata stage
    pub queries: Vec<MetadataQuery>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        // arXiv asks for one request every 3 seconds on both endpoints
        let arxiv = RateLimitConfig::every(Duration::from_secs(3));
        let rate_limits = [("metadata", arxiv), ("content", arxiv)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Self {
            batch_size: 10,
            stages: StagesConfig::default(),
            rate_limits,
            retry: RetryConfig::default(),
            queries: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Reject settings that cannot run, before any work is started.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::new("batch_size", "must be at least 1"));
        }
        for stage in Stage::ALL {
            let settings = self.stages.get(stage);
            if settings.concurrency == 0 {
                return Err(ConfigError::new(
                    format!("stages.{stage}.concurrency"),
                    "must be at least 1",
                ));
            }
            if settings.collaborator_key(stage).trim().is_empty() {
                return Err(ConfigError::new(
                    format!("stages.{stage}.collaborator"),
                    "must not be empty",
                ));
            }
        }
        for (key, limit) in &self.rate_limits {
            limit.validate(key)?;
        }
        RetryPolicy::from_config(&self.retry)?;
        for (i, query) in self.queries.iter().enumerate() {
            if query.category.trim().is_empty() {
                return Err(ConfigError::new(
                    format!("queries[{i}].category"),
                    "must not be empty",
                ));
            }
            if query.start_date > query.end_date {
                return Err(ConfigError::new(
                    format!("queries[{i}].end_date"),
                    format!("{} is before start_date {}", query.end_date, query.start_date),
                ));
            }
        }
        Ok(())
    }
}
