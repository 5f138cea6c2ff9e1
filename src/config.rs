use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::batch::DEFAULT_BATCH_SIZE;
use crate::error::{PipelineError, Result};
use crate::search::SearchConfig;

/// Run configuration, usually read from a TOML file:
///
/// ```toml
/// [batch]
/// size = 3
///
/// [search]
/// db_type = "prot"
/// database = "nr"
/// max_target_seqs = 500
/// evalue = 1e-3
/// max_workers = 4
/// timeout_secs = 3600
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineConfig {
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_batch_size")]
    pub size: usize,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: default_batch_size(),
        }
    }
}

impl PipelineConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: PipelineConfig =
            toml::from_str(text).map_err(|e| PipelineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch.size == 0 {
            return Err(PipelineError::InvalidBatchSize);
        }
        if self.search.database.trim().is_empty() {
            return Err(PipelineError::Config("search.database is empty".into()));
        }
        if !(self.search.evalue > 0.0) {
            return Err(PipelineError::Config(format!(
                "search.evalue must be positive, got {}",
                self.search.evalue
            )));
        }
        Ok(())
    }
}
