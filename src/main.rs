/// Archive Insights worker
///
/// Runs the job worker that drives archives through download, parsing,
/// analysis and statistics extraction, plus the metrics endpoint.
use anyhow::Context;
use archive_insights::{
    blob_store::DiskBlobBackend,
    config::BlobstoreConfig,
    jobs::Worker,
    server::{self, ServerState},
    WorkerConfig, WorkerContext,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env().context("Failed to load configuration")?;
    init_logging(&config);

    info!("Archive Insights worker v{}", env!("CARGO_PKG_VERSION"));

    let ctx = WorkerContext::new(config.clone())
        .await
        .context("Failed to initialize worker context")?;
    let ctx = Arc::new(ctx);

    let shutdown = CancellationToken::new();

    let server = if config.metrics.enabled {
        let state = ServerState {
            disk_blobs: disk_backend(&config.storage.blobstore),
        };
        let bind_address = config.metrics.bind_address.clone();
        let token = shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = server::serve(state, &bind_address, token).await {
                error!(error = %e, "Metrics server stopped");
            }
        }))
    } else {
        None
    };

    let worker = Worker::new(ctx.clone(), ctx.jobs.broker().clone(), &config.worker);
    let worker_shutdown = shutdown.clone();
    let worker_task = tokio::spawn(async move { worker.run(worker_shutdown).await });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested, draining in-flight jobs");
    shutdown.cancel();

    worker_task.await.context("Worker task panicked")??;
    if let Some(server) = server {
        server.await.context("Metrics server task panicked")?;
    }
    ctx.db.close().await;

    info!("Worker stopped");
    Ok(())
}

fn init_logging(config: &WorkerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("archive_insights={},tower_http=debug", config.logging.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// The disk backend behind presigned URLs, when blobs are stored locally
fn disk_backend(config: &BlobstoreConfig) -> Option<Arc<DiskBlobBackend>> {
    match config {
        BlobstoreConfig::Disk {
            location,
            public_url,
            signing_secret,
        } => Some(Arc::new(DiskBlobBackend::new(
            location.clone(),
            public_url.clone(),
            signing_secret.clone(),
        ))),
        _ => None,
    }
}
