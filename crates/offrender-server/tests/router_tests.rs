//! Router tests driven through `oneshot`.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use offrender_models::{RenderEngine, RenderOutcome};
use offrender_server::{create_router, AppState, ServerConfig};
use offrender_transfer::{BlobStore, FsStore, StoreKey, WorkerPaths};
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "offrender-test-boundary";

struct TestWorker {
    _dir: TempDir,
    paths: WorkerPaths,
    store: Arc<FsStore>,
    app: Router,
}

fn worker() -> TestWorker {
    let dir = TempDir::new().unwrap();
    let paths = WorkerPaths::under(dir.path());
    let store = Arc::new(FsStore::new(paths.clone()));
    let config = ServerConfig {
        paths: paths.clone(),
        ..Default::default()
    };
    let app = create_router(AppState::with_store(config, store.clone()));

    TestWorker {
        _dir: dir,
        paths,
        store,
        app,
    }
}

fn multipart_request(field: &str, file_name: &str, contents: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(contents);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .header("content-length", body.len())
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_ready() {
    let worker = worker();
    let (status, body) = send(&worker.app, get("/ready")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"yeah");
}

#[tokio::test]
async fn test_upload_writes_into_created_inbox() {
    let worker = worker();
    assert!(!worker.paths.inbox_dir.exists());

    let (status, body) = send(
        &worker.app,
        multipart_request("file", "shot.blend", b"BLENDER-v300"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ok");
    assert_eq!(
        std::fs::read(worker.paths.inbox_dir.join("shot.blend")).unwrap(),
        b"BLENDER-v300"
    );
    assert!(!worker.paths.inbox_dir.join(".shot.blend.part").exists());
}

#[tokio::test]
async fn test_upload_last_write_wins() {
    let worker = worker();
    send(&worker.app, multipart_request("file", "shot.blend", b"first")).await;
    send(&worker.app, multipart_request("file", "shot.blend", b"second")).await;

    assert_eq!(
        std::fs::read(worker.paths.inbox_dir.join("shot.blend")).unwrap(),
        b"second"
    );
}

#[tokio::test]
async fn test_upload_strips_directories() {
    let worker = worker();
    let (status, _) = send(
        &worker.app,
        multipart_request("file", "../../escape.blend", b"x"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(worker.paths.inbox_dir.join("escape.blend").exists());
}

#[tokio::test]
async fn test_upload_scene_clears_sentinel() {
    let worker = worker();
    worker.store.put(StoreKey::Sentinel, b"").await.unwrap();

    send(&worker.app, multipart_request("file", "notes.txt", b"x")).await;
    assert!(worker.paths.sentinel_path().exists());

    send(&worker.app, multipart_request("file", "shot.blend", b"x")).await;
    assert!(!worker.paths.sentinel_path().exists());
}

#[tokio::test]
async fn test_upload_wrong_field_is_not_ok() {
    let worker = worker();
    let (status, body) = send(
        &worker.app,
        multipart_request("attachment", "shot.blend", b"x"),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, b"not_ok");
}

#[tokio::test]
async fn test_download_by_path() {
    let worker = worker();
    std::fs::create_dir_all(&worker.paths.inbox_dir).unwrap();
    let file = worker.paths.inbox_dir.join("done.txt");
    std::fs::write(&file, "").unwrap();

    let uri = format!("/dl/?p={}", file.display());
    let (status, body) = send(&worker.app, get(&uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());

    let missing = format!("/dl/?p={}", worker.paths.inbox_dir.join("nope").display());
    let (status, _) = send(&worker.app, get(&missing)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_download_output_serves_first_entry() {
    let worker = worker();

    let (status, _) = send(&worker.app, get("/dlv/")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    std::fs::create_dir_all(&worker.paths.output_dir).unwrap();
    let (status, _) = send(&worker.app, get("/dlv/")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    std::fs::write(worker.paths.output_dir.join("0001-0250.avi"), b"AVI").unwrap();
    let (status, body) = send(&worker.app, get("/dlv/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"AVI");
}

#[tokio::test]
async fn test_set_quality() {
    let worker = worker();

    let (status, body) = send(&worker.app, get("/set_quality/?q=high")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ok");
    assert_eq!(
        std::fs::read_to_string(&worker.paths.quality_file).unwrap(),
        "high"
    );

    let (status, body) = send(&worker.app, get("/set_quality/?q=")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ok");
    assert_eq!(
        std::fs::read_to_string(&worker.paths.quality_file).unwrap(),
        "high"
    );

    let (status, body) = send(&worker.app, get("/set_quality/?q=ultra")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, b"not_ok");
}

#[tokio::test]
async fn test_status() {
    let worker = worker();

    let (status, _) = send(&worker.app, get("/status")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let outcome = RenderOutcome {
        scene: "shot.blend".into(),
        engine: RenderEngine::Eevee,
        launched: true,
        exit_code: Some(0),
        finished_at: Utc::now(),
    };
    worker
        .store
        .put(StoreKey::RenderStatus, &serde_json::to_vec(&outcome).unwrap())
        .await
        .unwrap();

    let (status, body) = send(&worker.app, get("/status")).await;
    assert_eq!(status, StatusCode::OK);
    let parsed: RenderOutcome = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed, outcome);
}

#[tokio::test]
async fn test_upload_over_limit_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = ServerConfig {
        paths: WorkerPaths::under(dir.path()),
        max_upload_bytes: 16,
        ..Default::default()
    };
    let app = create_router(AppState::new(config));

    let (status, _) = send(&app, multipart_request("file", "big.blend", &[0u8; 1024])).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}
