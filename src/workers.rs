//! Worker registry
//!
//! Maps each job kind to the command line of its analysis worker.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;

use crate::jobs::JobKind;
use crate::runner::CommandSpec;

/// Default per-worker timeout when the table does not set one
const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Configuration for one analysis worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Program plus leading arguments; job arguments are appended
    pub command: CommandSpec,
    pub timeout: Duration,
}

/// Raw TOML configuration for a worker
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawWorkerConfig {
    run_command: String,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
    #[serde(default)]
    work_dir: Option<PathBuf>,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Worker configurations for every job kind
#[derive(Debug, Clone)]
pub struct WorkerRegistry {
    workers: HashMap<JobKind, WorkerConfig>,
}

impl WorkerRegistry {
    /// Load the registry from a TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read worker config {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid worker config {}", path.display()))
    }

    /// Registry built into the binary (`files/workers.toml`)
    pub fn embedded() -> anyhow::Result<Self> {
        let content = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/workers.toml"));
        Self::from_toml_str(content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let mut raw_configs: HashMap<String, RawWorkerConfig> = toml::from_str(content)?;

        let mut workers = HashMap::new();
        for kind in JobKind::ALL {
            let raw = raw_configs
                .remove(kind.config_key())
                .ok_or_else(|| anyhow::anyhow!("Missing [{}] worker table", kind.config_key()))?;
            workers.insert(kind, into_worker_config(kind, raw)?);
        }

        if let Some(unknown) = raw_configs.keys().next() {
            bail!("Unknown worker table [{}]", unknown);
        }

        Ok(Self { workers })
    }

    /// Get the worker configuration for a job kind
    pub fn get(&self, kind: JobKind) -> &WorkerConfig {
        // Every kind is inserted by from_toml_str
        &self.workers[&kind]
    }
}

fn into_worker_config(kind: JobKind, raw: RawWorkerConfig) -> anyhow::Result<WorkerConfig> {
    let parts: Vec<String> = raw
        .run_command
        .split_whitespace()
        .map(|s| s.to_string())
        .collect();
    let mut command = CommandSpec::from_vec(&parts)
        .ok_or_else(|| anyhow::anyhow!("Empty run_command for {}", kind))?;

    if raw.timeout_secs == 0 {
        bail!("timeout_secs for {} must be positive", kind);
    }

    if let Some(dir) = raw.work_dir {
        command = command.with_work_dir(dir);
    }

    Ok(WorkerConfig {
        command,
        timeout: Duration::from_secs(raw.timeout_secs),
    })
}
