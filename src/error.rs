use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::path::PathBuf;

use crate::jobs::JobKind;
use crate::runner::{RunError, RunStatus};

/// Message returned when a request carries no `file` part
pub const NO_FILE_MESSAGE: &str = "No file uploaded.";

/// Why a job request did not produce a result.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// No `file` part was attached (or the body was not multipart at all).
    #[error("{}", NO_FILE_MESSAGE)]
    MissingUpload,

    /// A form field failed validation before any worker was started.
    #[error("Invalid value for field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// The multipart body could not be read.
    #[error("Malformed multipart body: {message}")]
    MalformedForm { status: StatusCode, message: String },

    /// Staging or cleanup filesystem failure.
    #[error("{context}: {source}")]
    Infra {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The worker failed or produced unusable output.
    #[error(transparent)]
    Worker(#[from] WorkerError),
}

impl JobError {
    pub fn infra(context: &'static str) -> impl FnOnce(std::io::Error) -> Self {
        move |source| JobError::Infra { context, source }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Run(#[from] RunError),

    #[error("worker {status}")]
    Failed { status: RunStatus },

    #[error("failed to read worker output {}: {source}", .path.display())]
    OutputRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("worker output is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
}

/// A failed job request, rendered as `{"error": "..."}`.
///
/// Client errors echo their message. Server-side failures are logged in full
/// and the caller only sees the per-job generic message.
#[derive(Debug)]
pub struct JobFailure {
    pub kind: JobKind,
    pub error: JobError,
}

impl IntoResponse for JobFailure {
    fn into_response(self) -> Response {
        let (status, message) = match &self.error {
            JobError::MissingUpload | JobError::InvalidField { .. } => {
                tracing::info!(job = %self.kind, error = %self.error, "Rejected job request");
                (StatusCode::BAD_REQUEST, self.error.to_string())
            }
            JobError::MalformedForm { status, .. } => {
                tracing::info!(job = %self.kind, error = %self.error, "Rejected job request");
                (*status, self.error.to_string())
            }
            JobError::Infra { .. } => {
                tracing::error!(job = %self.kind, error = %self.error, "Job infrastructure error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    self.kind.failure_message().to_string(),
                )
            }
            JobError::Worker(_) => {
                tracing::error!(job = %self.kind, error = %self.error, "Job worker error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    self.kind.failure_message().to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn render(kind: JobKind, error: JobError) -> (StatusCode, serde_json::Value) {
        let response = JobFailure { kind, error }.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_missing_upload_is_400_with_static_message() {
        let (status, body) = render(JobKind::CompareMl, JobError::MissingUpload).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "No file uploaded." }));
    }

    #[tokio::test]
    async fn test_worker_failure_hides_detail() {
        let error = JobError::Worker(WorkerError::Failed {
            status: RunStatus::Exited(1),
        });
        let (status, body) = render(JobKind::RecommendCrop, error).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "error": "Failed to recommend crop." }));
    }

    #[tokio::test]
    async fn test_infra_failure_hides_detail() {
        let error = JobError::Infra {
            context: "failed to stage upload",
            source: std::io::Error::other("disk full"),
        };
        let (status, body) = render(JobKind::CompareDl, error).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "error": "Failed to compare DL classifiers." }));
    }

    #[tokio::test]
    async fn test_malformed_form_keeps_status() {
        let error = JobError::MalformedForm {
            status: StatusCode::PAYLOAD_TOO_LARGE,
            message: "length limit exceeded".into(),
        };
        let (status, _) = render(JobKind::CompareMl, error).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }
}
