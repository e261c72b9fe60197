//! Upload staging
//!
//! Uploaded datasets are written under a unique name so workers can read them
//! by path, and comparison workers get a unique output file per request.
//! Every staged path is removed exactly once: through `release`, or on drop
//! if the request is abandoned before it gets there.

use axum::body::Bytes;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Fallback name for uploads without a usable filename
const DEFAULT_UPLOAD_NAME: &str = "upload";

/// An uploaded file as received from the client
#[derive(Debug, Clone)]
pub struct UploadedArtifact {
    /// Filename as sent by the client (untrusted)
    pub file_name: String,
    pub bytes: Bytes,
}

impl UploadedArtifact {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }
}

/// Directories holding per-request files
#[derive(Debug, Clone)]
pub struct StagingArea {
    upload_dir: PathBuf,
    output_dir: PathBuf,
}

impl StagingArea {
    /// Relative directories are resolved against the current directory, so
    /// staged paths stay valid for workers running in another work_dir.
    pub fn new(upload_dir: impl AsRef<Path>, output_dir: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self {
            upload_dir: absolutize(upload_dir.as_ref())?,
            output_dir: absolutize(output_dir.as_ref())?,
        })
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write an upload to `<upload_dir>/<uuid>_<file name>`
    pub async fn stage(&self, artifact: &UploadedArtifact) -> io::Result<StagedFile> {
        fs::create_dir_all(&self.upload_dir).await?;

        let name = format!(
            "{}_{}",
            Uuid::new_v4(),
            sanitize_file_name(&artifact.file_name)
        );
        let path = self.upload_dir.join(name);

        // create_new: never clobber another request's file
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        let guard = PathGuard::new(path);

        file.write_all(&artifact.bytes).await?;
        file.flush().await?;

        debug!(
            path = %guard.path.display(),
            bytes = artifact.bytes.len(),
            "Staged upload"
        );
        Ok(StagedFile(guard))
    }

    /// Reserve `<output_dir>/<uuid>_<stem>.json` for a worker to write into.
    /// The file itself is not created.
    pub async fn reserve_output(&self, stem: &str) -> io::Result<OutputSlot> {
        fs::create_dir_all(&self.output_dir).await?;
        let path = self
            .output_dir
            .join(format!("{}_{}.json", Uuid::new_v4(), stem));
        Ok(OutputSlot(PathGuard::new(path)))
    }
}

/// An upload persisted for the lifetime of one request
#[derive(Debug)]
pub struct StagedFile(PathGuard);

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.0.path
    }

    /// Delete the staged file. A file that is already gone counts as released.
    pub async fn release(self) -> io::Result<()> {
        self.0.release().await
    }
}

/// A per-request result file written by a comparison worker
#[derive(Debug)]
pub struct OutputSlot(PathGuard);

impl OutputSlot {
    pub fn path(&self) -> &Path {
        &self.0.path
    }

    /// Delete the result file if the worker wrote one
    pub async fn release(self) -> io::Result<()> {
        self.0.release().await
    }
}

#[derive(Debug)]
struct PathGuard {
    path: PathBuf,
    armed: bool,
}

impl PathGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    async fn release(mut self) -> io::Result<()> {
        self.armed = false;
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed abandoned staged file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove abandoned staged file"
            ),
        }
    }
}

/// Keep only the last path component of a client-supplied filename
fn sanitize_file_name(name: &str) -> String {
    let base = name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or("")
        .replace('\0', "");
    let base = base.trim();

    if base.is_empty() || base == "." || base == ".." {
        DEFAULT_UPLOAD_NAME.to_string()
    } else {
        base.to_string()
    }
}

fn absolutize(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
