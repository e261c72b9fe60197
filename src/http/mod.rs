//! HTTP surface: three job endpoints plus a health check

pub mod handlers;
pub mod upload;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::config::ServerConfig;
use crate::jobs::{JobExecutor, JobKind};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<JobExecutor>,
    /// Cancelled on shutdown; each request runs its worker under a child token
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(executor: JobExecutor, shutdown: CancellationToken) -> Self {
        Self {
            executor: Arc::new(executor),
            shutdown,
        }
    }
}

/// Build the application router with its middleware stack
pub fn router(state: AppState, config: &ServerConfig) -> Result<Router> {
    let cors = build_cors_layer(config)?;

    Ok(Router::new()
        .route("/health", get(handlers::health))
        .route(JobKind::CompareMl.route(), post(handlers::compare_ml))
        .route(JobKind::CompareDl.route(), post(handlers::compare_dl))
        .route(JobKind::RecommendCrop.route(), post(handlers::recommend_crop))
        // Multipart reads honor this limit; axum's default is 2 MB
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors)
        .with_state(state))
}

fn build_cors_layer(config: &ServerConfig) -> Result<CorsLayer> {
    let origin = if config.allows_any_origin() {
        AllowOrigin::from(Any)
    } else {
        let origins = config
            .cors_origins
            .iter()
            .map(|o| {
                o.parse::<HeaderValue>()
                    .with_context(|| format!("Invalid CORS origin '{}'", o))
            })
            .collect::<Result<Vec<_>>>()?;
        AllowOrigin::list(origins)
    };

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(3600)))
}
