//! Multipart form reading

use std::collections::HashMap;

use axum::extract::multipart::{Multipart, MultipartError, MultipartRejection};
use tracing::debug;

use crate::error::JobError;
use crate::staging::UploadedArtifact;

/// Name of the multipart part carrying the dataset
pub const FILE_FIELD: &str = "file";

/// A job request as read from its multipart body
#[derive(Debug, Default)]
pub struct JobForm {
    /// The first `file` part that carried a filename
    pub upload: Option<UploadedArtifact>,
    /// Text fields by name; later duplicates replace earlier ones
    pub fields: HashMap<String, String>,
}

impl JobForm {
    /// Take the upload, or fail with `MissingUpload`
    pub fn take_upload(&mut self) -> Result<UploadedArtifact, JobError> {
        self.upload.take().ok_or(JobError::MissingUpload)
    }
}

/// Read every part of a multipart body.
///
/// A body that is not multipart at all yields an empty form, which the
/// handlers report as a missing upload.
pub async fn read_form(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<JobForm, JobError> {
    let mut multipart = match multipart {
        Ok(m) => m,
        Err(rejection) => {
            debug!(error = %rejection, "Request body is not multipart");
            return Ok(JobForm::default());
        }
    };

    let mut form = JobForm::default();
    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().unwrap_or("").to_string();

        if name == FILE_FIELD {
            let file_name = match field.file_name() {
                Some(f) => f.to_string(),
                // A file part without a filename is not an upload
                None => continue,
            };
            let bytes = field.bytes().await.map_err(malformed)?;
            if form.upload.is_none() {
                form.upload = Some(UploadedArtifact::new(file_name, bytes));
            }
        } else if field.file_name().is_none() {
            let text = field.text().await.map_err(malformed)?;
            form.fields.insert(name, text);
        }
    }

    Ok(form)
}

fn malformed(e: MultipartError) -> JobError {
    JobError::MalformedForm {
        status: e.status(),
        message: e.body_text(),
    }
}
