use axum::extract::multipart::{Multipart, MultipartRejection};
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use super::upload::{read_form, JobForm};
use super::AppState;
use crate::error::{JobError, JobFailure};
use crate::jobs::{CropFeatures, JobKind, JobParams};

type JobResponse = Result<Json<Value>, JobFailure>;

/// POST /compare-ml-classifiers
pub async fn compare_ml(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> JobResponse {
    run_job(state, JobKind::CompareMl, multipart, |_| Ok(JobParams::CompareMl)).await
}

/// POST /compare-dl-classifiers
pub async fn compare_dl(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> JobResponse {
    run_job(state, JobKind::CompareDl, multipart, |_| Ok(JobParams::CompareDl)).await
}

/// POST /recommend-crop
pub async fn recommend_crop(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> JobResponse {
    run_job(state, JobKind::RecommendCrop, multipart, |form| {
        CropFeatures::from_fields(&form.fields).map(JobParams::RecommendCrop)
    })
    .await
}

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Read the form, check the upload, build parameters, then run the job.
/// Parameters are validated before anything touches the disk.
async fn run_job(
    state: AppState,
    kind: JobKind,
    multipart: Result<Multipart, MultipartRejection>,
    params: impl FnOnce(&JobForm) -> Result<JobParams, JobError>,
) -> JobResponse {
    let fail = |error| JobFailure { kind, error };

    let mut form = read_form(multipart).await.map_err(fail)?;
    let upload = form.take_upload().map_err(fail)?;
    let params = params(&form).map_err(fail)?;

    let cancel = state.shutdown.child_token();
    let result = state
        .executor
        .execute(upload, params, cancel)
        .await
        .map_err(fail)?;

    Ok(Json(result))
}
