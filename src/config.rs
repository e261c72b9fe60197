use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::workers::WorkerRegistry;

const DEFAULT_MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory for staged uploads
    pub upload_dir: PathBuf,
    /// Directory for comparison result files
    pub output_dir: PathBuf,
    /// Allowed CORS origins; `*` allows any origin
    pub cors_origins: Vec<String>,
    /// Request body limit in bytes
    pub max_upload_bytes: usize,
    /// Worker registry file; the embedded default is used when unset
    pub workers_config: Option<PathBuf>,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var            | Default            |
    /// |--------------------|--------------------|
    /// | `HOST`             | `0.0.0.0`          |
    /// | `PORT`             | `5000`             |
    /// | `UPLOAD_DIR`       | `uploads`          |
    /// | `OUTPUT_DIR`       | `outputs`          |
    /// | `CORS_ORIGINS`     | `*`                |
    /// | `MAX_UPLOAD_BYTES` | `67108864`         |
    /// | `WORKERS_CONFIG`   | embedded registry  |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let host = var("HOST").unwrap_or_else(|| "0.0.0.0".into());

        let port: u16 = var("PORT")
            .unwrap_or_else(|| "5000".into())
            .trim()
            .parse()
            .context("PORT must be a valid u16")?;

        let upload_dir = var("UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("uploads"));
        let output_dir = var("OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("outputs"));

        let cors_origins: Vec<String> = var("CORS_ORIGINS")
            .unwrap_or_else(|| "*".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let max_upload_bytes = match var("MAX_UPLOAD_BYTES") {
            Some(v) => v
                .trim()
                .parse()
                .context("MAX_UPLOAD_BYTES must be a valid byte count")?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        let workers_config = var("WORKERS_CONFIG").map(PathBuf::from);

        Ok(Self {
            host,
            port,
            upload_dir,
            output_dir,
            cors_origins,
            max_upload_bytes,
            workers_config,
        })
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let ip = self
            .host
            .parse::<IpAddr>()
            .with_context(|| format!("Invalid HOST address '{}'", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// True when any origin may call the API
    pub fn allows_any_origin(&self) -> bool {
        self.cors_origins.iter().any(|o| o == "*")
    }

    /// Load the worker registry from `WORKERS_CONFIG`, or the embedded default
    pub fn load_workers(&self) -> Result<WorkerRegistry> {
        match &self.workers_config {
            Some(path) => WorkerRegistry::load(path),
            None => WorkerRegistry::embedded(),
        }
    }
}
