//! Job pipeline
//!
//! Every request goes through the same sequence:
//! stage upload -> invoke worker -> acquire result -> release files.
//! The jobs differ only in worker arguments and where the result comes from.

pub mod features;

use serde_json::Value;
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{JobError, WorkerError};
use crate::runner::{CommandSpec, Outcome, RunLimits, Runner};
use crate::staging::{StagedFile, StagingArea, UploadedArtifact};
use crate::workers::{WorkerConfig, WorkerRegistry};

pub use features::CropFeatures;

/// Longest stderr/stdout excerpt written to the log
const LOG_EXCERPT_CHARS: usize = 2048;

/// The three analysis jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    CompareMl,
    CompareDl,
    RecommendCrop,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [JobKind::CompareMl, JobKind::CompareDl, JobKind::RecommendCrop];

    /// Table name in the worker registry
    pub fn config_key(self) -> &'static str {
        match self {
            JobKind::CompareMl => "compare_ml",
            JobKind::CompareDl => "compare_dl",
            JobKind::RecommendCrop => "recommend_crop",
        }
    }

    pub fn route(self) -> &'static str {
        match self {
            JobKind::CompareMl => "/compare-ml-classifiers",
            JobKind::CompareDl => "/compare-dl-classifiers",
            JobKind::RecommendCrop => "/recommend-crop",
        }
    }

    /// What the caller sees when the job fails server-side
    pub fn failure_message(self) -> &'static str {
        match self {
            JobKind::CompareMl => "Failed to compare ML classifiers.",
            JobKind::CompareDl => "Failed to compare DL classifiers.",
            JobKind::RecommendCrop => "Failed to recommend crop.",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_key())
    }
}

/// Job-specific request parameters
#[derive(Debug, Clone)]
pub enum JobParams {
    CompareMl,
    CompareDl,
    RecommendCrop(CropFeatures),
}

impl JobParams {
    pub fn kind(&self) -> JobKind {
        match self {
            JobParams::CompareMl => JobKind::CompareMl,
            JobParams::CompareDl => JobKind::CompareDl,
            JobParams::RecommendCrop(_) => JobKind::RecommendCrop,
        }
    }
}

/// Runs jobs end to end: staging, invocation, result parsing, cleanup
pub struct JobExecutor {
    staging: StagingArea,
    workers: WorkerRegistry,
    runner: Arc<dyn Runner>,
}

impl JobExecutor {
    pub fn new(staging: StagingArea, workers: WorkerRegistry, runner: Arc<dyn Runner>) -> Self {
        Self {
            staging,
            workers,
            runner,
        }
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    /// Run one job. The staged upload is released on every path; if this
    /// future is dropped early the staged file's guard removes it instead.
    #[instrument(skip_all, fields(job = %params.kind(), upload = %upload.file_name))]
    pub async fn execute(
        &self,
        upload: UploadedArtifact,
        params: JobParams,
        cancel: CancellationToken,
    ) -> Result<Value, JobError> {
        let staged = self
            .staging
            .stage(&upload)
            .await
            .map_err(JobError::infra("failed to stage upload"))?;
        drop(upload);

        let result = self.run_staged(&params, &staged, &cancel).await;
        let result = settle(result, staged.release().await, "failed to remove staged upload");

        if result.is_ok() {
            info!("Job completed");
        }
        result
    }

    async fn run_staged(
        &self,
        params: &JobParams,
        staged: &StagedFile,
        cancel: &CancellationToken,
    ) -> Result<Value, JobError> {
        let kind = params.kind();
        let worker = self.workers.get(kind);
        let cmd = worker.command.clone().with_path_arg(staged.path());

        match params {
            JobParams::CompareMl | JobParams::CompareDl => {
                let slot = self
                    .staging
                    .reserve_output(kind.config_key())
                    .await
                    .map_err(JobError::infra("failed to reserve output file"))?;

                let cmd = cmd.with_path_arg(slot.path());
                let result: Result<Value, JobError> = async {
                    // Comparison workers report progress on stdout; the result is the file
                    self.invoke(worker, &cmd, cancel).await?;
                    Ok(read_output_file(slot.path()).await?)
                }
                .await;

                settle(result, slot.release().await, "failed to remove output file")
            }
            JobParams::RecommendCrop(features) => {
                let cmd = cmd.with_args(features.worker_args());
                let stdout = self.invoke(worker, &cmd, cancel).await?;
                Ok(parse_json(&stdout)?)
            }
        }
    }

    async fn invoke(
        &self,
        worker: &WorkerConfig,
        cmd: &CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<String, WorkerError> {
        let limits = RunLimits::new(worker.timeout);
        let outcome = self.runner.run(cmd, &limits, cancel).await?;

        debug!(
            program = %cmd.program,
            status = %outcome.status,
            elapsed_ms = outcome.elapsed_ms,
            "Worker finished"
        );

        match outcome.into_outcome() {
            Outcome::Success(stdout) => Ok(stdout),
            Outcome::Failure { status, stderr } => {
                warn!(
                    %status,
                    stderr = %excerpt(&stderr),
                    "Worker failed"
                );
                Err(WorkerError::Failed { status })
            }
        }
    }
}

/// Combine a job result with the outcome of releasing one of its files.
/// A job error takes precedence; a release error fails an otherwise good job.
fn settle(
    result: Result<Value, JobError>,
    released: io::Result<()>,
    context: &'static str,
) -> Result<Value, JobError> {
    match (result, released) {
        (result, Ok(())) => result,
        (Ok(_), Err(source)) => Err(JobError::Infra { context, source }),
        (Err(e), Err(release_err)) => {
            warn!(error = %release_err, "{}", context);
            Err(e)
        }
    }
}

async fn read_output_file(path: &Path) -> Result<Value, WorkerError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| WorkerError::OutputRead {
            path: path.to_path_buf(),
            source,
        })?;
    parse_json(&content)
}

fn parse_json(text: &str) -> Result<Value, WorkerError> {
    serde_json::from_str(text.trim()).map_err(|e| {
        warn!(output = %excerpt(text), "Worker output is not valid JSON");
        WorkerError::InvalidJson(e)
    })
}

fn excerpt(text: &str) -> &str {
    let text = text.trim();
    match text.char_indices().nth(LOG_EXCERPT_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
