#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use crop_analytics::config::ServerConfig;
use crop_analytics::http::{router, AppState};
use crop_analytics::jobs::JobExecutor;
use crop_analytics::runner::ProcessRunner;
use crop_analytics::staging::StagingArea;

const BOUNDARY: &str = "----crop-analytics-test-boundary";

/// Recommendation worker: records its arguments, checks the staged file, prints a result
pub const RECOMMEND_OK: &str = r#"
printf '%s\n' "$@" > "$WORK/recommend.args"
test -f "$1" || exit 3
echo '{"Recommended Crop":"rice"}'
"#;

/// Comparison worker: chatter on stdout, result in the output file
pub const COMPARE_OK: &str = r#"
echo "Training SVM..."
test -f "$1" || exit 3
printf '{"SVM":{"accuracy":0.97,"f1":0.95}}' > "$2"
"#;

/// Comparison worker whose result echoes the uploaded content
pub const COMPARE_ECHO: &str = r#"
sleep 0.2
value=$(cat "$1")
printf '{"echo":{"value":%s}}' "$value" > "$2"
"#;

pub const FAILING: &str = r#"
echo "Traceback: something broke" >&2
exit 1
"#;

pub const NOT_JSON: &str = r#"
echo "Predicted crop: rice"
"#;

pub const SLOW: &str = r#"
sleep 30
"#;

/// Worker scripts for each job kind
pub struct Scripts {
    pub compare_ml: &'static str,
    pub compare_dl: &'static str,
    pub recommend_crop: &'static str,
    pub timeout_secs: u64,
}

impl Default for Scripts {
    fn default() -> Self {
        Self {
            compare_ml: COMPARE_OK,
            compare_dl: COMPARE_OK,
            recommend_crop: RECOMMEND_OK,
            timeout_secs: 30,
        }
    }
}

/// A router wired to `sh` workers inside a temp directory
pub struct TestApp {
    pub app: Router,
    pub shutdown: CancellationToken,
    dir: TempDir,
}

impl TestApp {
    pub fn new(scripts: Scripts) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        std::fs::create_dir_all(&work).unwrap();

        let mut registry = String::new();
        for (key, body) in [
            ("compare_ml", scripts.compare_ml),
            ("compare_dl", scripts.compare_dl),
            ("recommend_crop", scripts.recommend_crop),
        ] {
            let script = work.join(format!("{}.sh", key));
            std::fs::write(
                &script,
                format!("WORK='{}'\n{}", work.display(), body),
            )
            .unwrap();
            registry.push_str(&format!(
                "[{}]\nrun_command = \"sh {}\"\ntimeout_secs = {}\n\n",
                key,
                script.display(),
                scripts.timeout_secs
            ));
        }
        let registry_path = dir.path().join("workers.toml");
        std::fs::write(&registry_path, registry).unwrap();

        let mut config = ServerConfig::from_lookup(|_| None).unwrap();
        config.upload_dir = dir.path().join("uploads");
        config.output_dir = dir.path().join("outputs");
        config.workers_config = Some(registry_path);

        let workers = config.load_workers().unwrap();
        let staging = StagingArea::new(&config.upload_dir, &config.output_dir).unwrap();
        let executor = JobExecutor::new(staging, workers, Arc::new(ProcessRunner::new()));

        let shutdown = CancellationToken::new();
        let app = router(AppState::new(executor, shutdown.clone()), &config).unwrap();

        Self { app, shutdown, dir }
    }

    pub fn work_file(&self, name: &str) -> PathBuf {
        self.dir.path().join("work").join(name)
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.dir.path().join("uploads")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.dir.path().join("outputs")
    }

    /// True when neither staged uploads nor output files remain
    pub fn staging_is_clean(&self) -> bool {
        dir_is_empty(&self.upload_dir()) && dir_is_empty(&self.output_dir())
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        send(self.app.clone(), request).await
    }
}

pub async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    (status, body_json(response.into_body()).await)
}

pub async fn body_json(body: Body) -> Value {
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn dir_is_empty(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut d| d.next().is_none())
        .unwrap_or(true)
}

/// A file part for a multipart body
pub struct FilePart<'a> {
    pub field: &'a str,
    pub file_name: Option<&'a str>,
    pub content: &'a [u8],
}

impl<'a> FilePart<'a> {
    pub fn csv(content: &'a str) -> Self {
        Self {
            field: "file",
            file_name: Some("crops.csv"),
            content: content.as_bytes(),
        }
    }
}

/// Build a multipart/form-data POST
pub fn multipart_request(uri: &str, fields: &[(&str, &str)], file: Option<FilePart>) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    if let Some(file) = file {
        let disposition = match file.file_name {
            Some(name) => format!("form-data; name=\"{}\"; filename=\"{}\"", file.field, name),
            None => format!("form-data; name=\"{}\"", file.field),
        };
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: {}\r\nContent-Type: text/csv\r\n\r\n",
                BOUNDARY, disposition
            )
            .as_bytes(),
        );
        body.extend_from_slice(file.content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

pub const CROPS_CSV: &str = "N,P,K,temperature,humidity,ph,rainfall,label\n90,42,43,20.8,82,6.5,202.9,rice\n";

pub fn crop_fields() -> Vec<(&'static str, &'static str)> {
    vec![
        ("N", "90"),
        ("P", "42"),
        ("K", "43"),
        ("temperature", "20.8"),
        ("humidity", "82"),
        ("ph", "6.5"),
        ("rainfall", "202.9"),
    ]
}
