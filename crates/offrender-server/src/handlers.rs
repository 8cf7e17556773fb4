//! Transfer protocol handlers.

use std::path::{Path, PathBuf};

use axum::body::Body;
use axum::extract::{Multipart, Query, Request, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use offrender_models::{is_scene_file, Quality};
use offrender_transfer::protocol::{REPLY_OK, REPLY_READY, UPLOAD_FIELD};
use offrender_transfer::{sanitize_file_name, StoreKey};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{debug, info, warn};

use crate::error::{ServerError, ServerResult};
use crate::state::AppState;

/// Liveness probe.
pub async fn ready() -> &'static str {
    REPLY_READY
}

/// Store the uploaded file in the inbox.
///
/// The body is streamed to a hidden temporary name and renamed into place,
/// so the executor never sees a partially written scene. Uploading a scene
/// clears the previous completion sentinel.
pub async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> ServerResult<&'static str> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::bad_request(e.to_string()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let name = field
            .file_name()
            .and_then(sanitize_file_name)
            .ok_or_else(|| ServerError::bad_request("upload without a usable file name"))?;

        let inbox = &state.config.paths.inbox_dir;
        tokio::fs::create_dir_all(inbox).await?;

        let dest = inbox.join(&name);
        if is_scene_file(&dest) {
            state.store.remove(StoreKey::Sentinel).await?;
        }

        let partial = inbox.join(format!(".{}.part", name));
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut written: u64 = 0;

        loop {
            match field.chunk().await {
                Ok(Some(chunk)) => {
                    file.write_all(&chunk).await?;
                    written += chunk.len() as u64;
                }
                Ok(None) => break,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&partial).await;
                    return Err(ServerError::bad_request(e.to_string()));
                }
            }
        }
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&partial, &dest).await?;
        info!(file = %dest.display(), bytes = written, "Stored upload");
        return Ok(REPLY_OK);
    }

    Err(ServerError::bad_request(format!(
        "multipart field '{}' missing",
        UPLOAD_FIELD
    )))
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub p: Option<String>,
}

/// Serve a worker file by absolute path.
pub async fn download(Query(query): Query<DownloadQuery>, request: Request) -> ServerResult<Response> {
    let path = query
        .p
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| ServerError::bad_request("missing 'p'"))?;

    serve_file(&path, request).await
}

/// Serve the first entry of the output directory.
pub async fn download_output(State(state): State<AppState>, request: Request) -> ServerResult<Response> {
    let output_dir = &state.config.paths.output_dir;
    let path = first_entry(output_dir)
        .await
        .ok_or_else(|| ServerError::not_found(output_dir.display().to_string()))?;

    debug!(file = %path.display(), "Serving render output");
    serve_file(&path, request).await
}

#[derive(Debug, Deserialize)]
pub struct QualityQuery {
    pub q: Option<String>,
}

/// Persist the render quality flag.
///
/// An empty value is accepted and changes nothing.
pub async fn set_quality(
    State(state): State<AppState>,
    Query(query): Query<QualityQuery>,
) -> ServerResult<&'static str> {
    let raw = query.q.unwrap_or_default();
    if raw.trim().is_empty() {
        return Ok(REPLY_OK);
    }

    let quality: Quality = raw.parse().map_err(|e: String| {
        warn!(value = %raw, "Rejected quality");
        ServerError::bad_request(e)
    })?;

    state
        .store
        .put(StoreKey::Quality, quality.as_str().as_bytes())
        .await?;
    info!(quality = %quality, "Quality set");
    Ok(REPLY_OK)
}

/// Last render outcome as JSON.
pub async fn status(State(state): State<AppState>) -> ServerResult<Response> {
    let bytes = state
        .store
        .try_get(StoreKey::RenderStatus)
        .await?
        .ok_or_else(|| ServerError::not_found("no render yet"))?;

    Ok(([(header::CONTENT_TYPE, "application/json")], bytes).into_response())
}

async fn serve_file(path: &Path, request: Request) -> ServerResult<Response> {
    let response = match ServeFile::new(path).oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };
    Ok(response.map(Body::new))
}

/// Lexicographically first regular file in `dir`.
async fn first_entry(dir: &Path) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    let mut files = Vec::new();

    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_type().await.is_ok_and(|t| t.is_file()) {
            files.push(entry.path());
        }
    }

    files.sort();
    files.into_iter().next()
}
