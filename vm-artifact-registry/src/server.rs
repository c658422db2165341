//! HTTP server setup and route handlers for the artifact wire protocol
//!
//! Artifacts and index documents are addressed as `/{repository}/{path}`:
//! `GET`/`HEAD` look up, `PUT`/`POST` deploy and `DELETE` removes. The caller's
//! identity is the user name of HTTP Basic credentials, if any.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::auth::identity_from_headers;
use crate::config::Config;
use crate::error::AppResult;
use crate::service::{ArtifactService, Collaborators};
use crate::state::{AppState, SuccessResponse};
use crate::storage::FileDetails;

/// Router for the wire protocol, without a listener.
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = usize::try_from(state.max_body_bytes).unwrap_or(usize::MAX);

    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/api/maven/latest/version/{repository}/{*gav}",
            get(latest_version_handler),
        )
        .route("/{repository}", get(repository_root_handler))
        .route(
            "/{repository}/{*gav}",
            get(lookup_handler)
                .put(deploy_handler)
                .post(deploy_handler)
                .delete(delete_handler),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(config: Config) -> Result<()> {
    let host = config.server.host.clone();
    let port = config.server.port;
    info!(host = %host, port = %port, "Starting artifact registry");

    let addr: SocketAddr = format!("{host}:{port}").parse().map_err(|e| {
        error!(host = %host, port = %port, error = %e, "Invalid socket address");
        anyhow::anyhow!("Invalid socket address {host}:{port}: {e}")
    })?;

    let max_body_bytes = config.mirrors.max_artifact_size_bytes();
    let service = ArtifactService::new(config, Collaborators::default()).await?;
    let state = Arc::new(AppState {
        service: Arc::new(service),
        max_body_bytes,
    });
    let app = build_router(state);

    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        error!(addr = %addr, error = %e, "Failed to bind to address");
        anyhow::anyhow!("Failed to bind to {host}:{port}: {e}")
    })?;

    info!("Server listening on {}", addr);
    axum::serve(listener, app).await.map_err(|e| {
        error!(error = %e, "Server error");
        anyhow::anyhow!("Server error: {e}")
    })?;

    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

fn artifact_response(details: &FileDetails, content: Bytes) -> Response {
    let last_modified = details
        .last_modified
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    (
        [
            (header::CONTENT_TYPE, details.content_type.clone()),
            (header::LAST_MODIFIED, last_modified),
        ],
        content,
    )
        .into_response()
}

async fn lookup_handler(
    State(state): State<Arc<AppState>>,
    Path((repository, gav)): Path<(String, String)>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let identity = identity_from_headers(&headers);
    let resolved = state
        .service
        .lookup(identity.as_ref(), &repository, &gav)
        .await?;

    match resolved.content {
        Some(content) => Ok(artifact_response(&resolved.details, content)),
        None => {
            let entries = state
                .service
                .list(identity.as_ref(), &repository, &gav)
                .await?;
            Ok(Json(entries).into_response())
        }
    }
}

async fn repository_root_handler(
    State(state): State<Arc<AppState>>,
    Path(repository): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<Vec<FileDetails>>> {
    let identity = identity_from_headers(&headers);
    let entries = state
        .service
        .list(identity.as_ref(), &repository, "")
        .await?;
    Ok(Json(entries))
}

async fn deploy_handler(
    State(state): State<Arc<AppState>>,
    Path((repository, gav)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<(StatusCode, Json<FileDetails>)> {
    let identity = identity_from_headers(&headers);
    let details = state
        .service
        .deploy(identity.as_ref(), &repository, &gav, body)
        .await?;
    Ok((StatusCode::CREATED, Json(details)))
}

async fn delete_handler(
    State(state): State<Arc<AppState>>,
    Path((repository, gav)): Path<(String, String)>,
    headers: HeaderMap,
) -> AppResult<Json<SuccessResponse>> {
    let identity = identity_from_headers(&headers);
    state
        .service
        .delete(identity.as_ref(), &repository, &gav)
        .await?;
    Ok(Json(SuccessResponse {
        message: format!("Deleted {repository}/{gav}"),
    }))
}

async fn latest_version_handler(
    State(state): State<Arc<AppState>>,
    Path((repository, gav)): Path<(String, String)>,
    headers: HeaderMap,
) -> AppResult<String> {
    let identity = identity_from_headers(&headers);
    state
        .service
        .latest_version(identity.as_ref(), &repository, &gav)
        .await
}
