/// HTTP endpoint for health, metrics and disk blob transfer
///
/// The worker has no public API of its own. This small router exposes the
/// Prometheus registry and, when blobs live on local disk, serves the
/// presigned download and upload URLs the disk backend hands out.
use crate::{
    blob_store::{content_type_for, DiskBlobBackend},
    error::{AppError, AppResult},
    metrics,
};
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Shared router state
#[derive(Clone, Default)]
pub struct ServerState {
    /// Present when the blob store is the disk backend
    pub disk_blobs: Option<Arc<DiskBlobBackend>>,
}

/// Query string of a presigned blob URL
#[derive(Debug, Deserialize)]
struct SignedQuery {
    expires: i64,
    signature: String,
}

/// Build the router
pub fn build_router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route(
            "/blobs/*key",
            get(get_blob).put(put_blob).layer(DefaultBodyLimit::disable()),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .fallback(not_found)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render_metrics(),
    )
}

/// Resolve the disk backend and check the URL signature for `method`
fn authorize<'a>(
    state: &'a ServerState,
    method: &str,
    key: &str,
    query: &SignedQuery,
) -> AppResult<&'a DiskBlobBackend> {
    let disk = state
        .disk_blobs
        .as_deref()
        .ok_or_else(|| AppError::NotFound("Blob serving is disabled".to_string()))?;

    if !disk.verify_signature(method, key, query.expires, &query.signature) {
        return Err(AppError::Validation(format!(
            "Invalid or expired signature for {}",
            key
        )));
    }
    Ok(disk)
}

async fn get_blob(
    State(state): State<ServerState>,
    Path(key): Path<String>,
    Query(query): Query<SignedQuery>,
) -> AppResult<Response> {
    let disk = authorize(&state, "GET", &key, &query)?;
    let path = disk.blob_path(&key)?;

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::NotFound(format!("Blob {} not found", key)));
        }
        Err(e) => return Err(e.into()),
    };

    let stream = tokio_util::io::ReaderStream::new(file);
    Ok((
        [(header::CONTENT_TYPE, content_type_for(&key))],
        Body::from_stream(stream),
    )
        .into_response())
}

async fn put_blob(
    State(state): State<ServerState>,
    Path(key): Path<String>,
    Query(query): Query<SignedQuery>,
    body: Body,
) -> AppResult<StatusCode> {
    let disk = authorize(&state, "PUT", &key, &query)?;
    let path = disk.blob_path(&key)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut file = tokio::fs::File::create(&path).await?;
    let mut stream = body.into_data_stream();
    let mut size = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| AppError::BlobStorage(format!("Upload interrupted: {}", e)))?;
        size += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    debug!(key = %key, size, "Blob uploaded");
    Ok(StatusCode::CREATED)
}

async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "NotFound",
            "message": "Endpoint not found"
        })),
    )
}

/// Serve until `shutdown` is cancelled
pub async fn serve(state: ServerState, bind_address: &str, shutdown: CancellationToken) -> AppResult<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to bind to {}: {}", bind_address, e)))?;
    info!("Metrics endpoint listening on {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| AppError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::{BlobBackend, BlobBody};
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn disk_state(dir: &std::path::Path) -> (ServerState, Arc<DiskBlobBackend>) {
        let disk = Arc::new(DiskBlobBackend::new(
            dir.to_path_buf(),
            "http://localhost:9464/blobs".to_string(),
            "0123456789abcdef".to_string(),
        ));
        (
            ServerState {
                disk_blobs: Some(disk.clone()),
            },
            disk,
        )
    }

    fn path_of(url: &str) -> String {
        url.trim_start_matches("http://localhost:9464").to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let response = build_router(ServerState::default())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_exposed() {
        metrics::record_job_enqueued("parse_archive");
        let response = build_router(ServerState::default())
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("jobs_enqueued_total"));
    }

    #[tokio::test]
    async fn test_presigned_upload_and_download() {
        let dir = tempfile::tempdir().unwrap();
        let (state, disk) = disk_state(dir.path());
        let router = build_router(state);

        let put_url = disk
            .presigned_put_url("acct1/archive.zip", Duration::from_secs(60))
            .await
            .unwrap();
        let response = router
            .clone()
            .oneshot(
                Request::put(path_of(&put_url))
                    .body(Body::from("zip bytes"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(disk.exists("acct1/archive.zip").await.unwrap());

        let get_url = disk
            .presigned_get_url("acct1/archive.zip", Duration::from_secs(60))
            .await
            .unwrap();
        let response = router
            .oneshot(Request::get(path_of(&get_url)).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"zip bytes");
    }

    #[tokio::test]
    async fn test_signature_is_method_bound() {
        let dir = tempfile::tempdir().unwrap();
        let (state, disk) = disk_state(dir.path());
        disk.put("acct1/a.jpg", BlobBody::Bytes(vec![1]), "image/jpeg")
            .await
            .unwrap();

        // A download signature does not authorize an upload
        let get_url = disk
            .presigned_get_url("acct1/a.jpg", Duration::from_secs(60))
            .await
            .unwrap();
        let response = build_router(state)
            .oneshot(
                Request::put(path_of(&get_url))
                    .body(Body::from("overwrite"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
