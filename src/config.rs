// src/config.rs

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Name of the config file used when `CONFIG_FILE` is not set.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Pipeline settings loaded from a YAML file under `config/`.
///
/// Loaded once per process and immutable afterwards. Environment access
/// (`CONFIG_FILE`, `GCP_SERVICE_ACCOUNT_KEY`) happens in the binaries, which
/// pass everything in here explicitly.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub gcp_project_id: String,
    pub dataset_id: String,
    pub table_id: String,
    /// Schema file name, resolved under `data/schemas/`.
    pub schema_file: String,
    /// CSV file name, resolved under `data/`.
    pub data_file: String,
    /// BigQuery location used when the dataset has to be created.
    pub location: String,

    /// How many times a failed transformation statement is retried before it
    /// is recorded as an error and skipped.
    #[serde(default = "default_statement_retries")]
    pub statement_retries: u32,
    /// Initial backoff before a statement retry; doubles per attempt.
    #[serde(default = "default_statement_backoff_ms")]
    pub statement_backoff_ms: u64,
    /// Pause after each successful statement so that tables created by one
    /// statement are visible to the next.
    #[serde(default = "default_propagation_delay_ms")]
    pub propagation_delay_ms: u64,
}

fn default_statement_retries() -> u32 {
    2
}

fn default_statement_backoff_ms() -> u64 {
    500
}

fn default_propagation_delay_ms() -> u64 {
    1000
}

impl Config {
    /// Read `<config_dir>/<file_name>`. A missing or malformed file is fatal.
    pub fn load(config_dir: &Path, file_name: &str) -> Result<Self> {
        let path = config_dir.join(file_name);
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("reading config file '{}'", path.display()))?;
        let config: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing config file '{}'", path.display()))?;
        Ok(config)
    }

    /// Fully qualified `project.dataset.table` name of the destination table.
    pub fn qualified_table(&self) -> String {
        format!(
            "{}.{}.{}",
            self.gcp_project_id, self.dataset_id, self.table_id
        )
    }
}
