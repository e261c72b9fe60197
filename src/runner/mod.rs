//! Runner module - worker process execution
//!
//! This module provides a unified interface for running analysis workers:
//! - `ProcessRunner`: spawns the worker as a local process in its own process group
//!
//! The runner module does NOT:
//! - Know which job a worker belongs to
//! - Parse worker output
//! - Stage or remove uploaded files

pub mod process;

use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Command specification for execution
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    /// Program path or name
    pub program: String,
    /// Arguments to the program
    pub args: Vec<String>,
    /// Working directory
    pub work_dir: Option<std::path::PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            work_dir: None,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(|a| a.into()));
        self
    }

    /// Append a filesystem path as the next argument
    pub fn with_path_arg(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push(path.as_ref().to_string_lossy().into_owned());
        self
    }

    pub fn with_work_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.work_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Create from a command vector (first element is program, rest are args)
    pub fn from_vec(cmd: &[String]) -> Option<Self> {
        let (program, args) = cmd.split_first()?;
        Some(Self::new(program.clone()).with_args(args.iter().cloned()))
    }
}

/// Limits applied to a single worker invocation
#[derive(Debug, Clone)]
pub struct RunLimits {
    /// Wall-clock budget before the process group is killed
    pub timeout: Duration,
}

impl RunLimits {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
        }
    }
}

/// Execution status (raw, no job interpretation)
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    /// Program exited normally with given exit code
    Exited(i32),
    /// Killed by signal
    Signaled(i32),
    /// Timeout elapsed, process group killed
    TimedOut,
    /// Cancellation requested, process group killed
    Cancelled,
}

impl RunStatus {
    /// Check if execution was successful (exited with code 0)
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Exited(0))
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Exited(code) => write!(f, "exited with code {}", code),
            RunStatus::Signaled(sig) => write!(f, "killed by signal {}", sig),
            RunStatus::TimedOut => write!(f, "timed out"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Outcome of running a program
#[derive(Debug)]
pub struct RunOutcome {
    /// Execution status
    pub status: RunStatus,
    /// Stdout content
    pub stdout: String,
    /// Stderr content
    pub stderr: String,
    /// Wall-clock time in milliseconds
    pub elapsed_ms: u64,
}

/// Two-way resolution of a run: stdout on success, stderr otherwise
#[derive(Debug, PartialEq)]
pub enum Outcome {
    Success(String),
    Failure { status: RunStatus, stderr: String },
}

impl RunOutcome {
    /// Check if execution was successful
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn into_outcome(self) -> Outcome {
        if self.is_success() {
            Outcome::Success(self.stdout)
        } else {
            Outcome::Failure {
                status: self.status,
                stderr: self.stderr,
            }
        }
    }
}

/// Errors that prevent a run from producing an outcome at all
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to collect worker output: {0}")]
    Io(#[from] std::io::Error),
}

/// Runner trait for executing worker programs
#[async_trait]
pub trait Runner: Send + Sync {
    /// Run a command to completion, honoring the limits and the cancellation token
    async fn run(
        &self,
        cmd: &CommandSpec,
        limits: &RunLimits,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, RunError>;
}

// Re-exports
pub use process::ProcessRunner;
