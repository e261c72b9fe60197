use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crop_analytics::config::ServerConfig;
use crop_analytics::http::{self, AppState};
use crop_analytics::jobs::{JobExecutor, JobKind};
use crop_analytics::runner::ProcessRunner;
use crop_analytics::staging::StagingArea;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("crop_analytics=info".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let addr = config.bind_addr()?;

    // Load worker registry
    let workers = config.load_workers()?;
    match &config.workers_config {
        Some(path) => info!("Loaded worker registry from {}", path.display()),
        None => info!("Using embedded worker registry"),
    }
    for kind in JobKind::ALL {
        let worker = workers.get(kind);
        info!(
            "Worker {}: {} {} (timeout {}s)",
            kind,
            worker.command.program,
            worker.command.args.join(" "),
            worker.timeout.as_secs()
        );
    }

    let staging = StagingArea::new(&config.upload_dir, &config.output_dir)
        .context("Failed to resolve staging directories")?;
    info!(
        "Staging uploads in {}, results in {}",
        staging.upload_dir().display(),
        staging.output_dir().display()
    );

    let executor = JobExecutor::new(staging, workers, Arc::new(ProcessRunner::new()));
    let shutdown = CancellationToken::new();
    let app = http::router(AppState::new(executor, shutdown.clone()), &config)?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}

/// Wait for Ctrl-C or SIGTERM, then cancel in-flight workers
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl-C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl-C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }

    // Kills running worker process groups; their requests clean up and respond
    shutdown.cancel();
}
