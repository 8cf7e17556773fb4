//! Upload and download through a real listener and the transfer client.

use std::net::SocketAddr;

use offrender_server::{create_router, AppState, ServerConfig};
use offrender_transfer::{TransferClient, WorkerPaths};
use tempfile::TempDir;

async fn spawn_worker(paths: WorkerPaths) -> SocketAddr {
    let config = ServerConfig {
        paths,
        ..Default::default()
    };
    let app = create_router(AppState::new(config));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn test_upload_then_download_is_byte_identical() {
    let worker_dir = TempDir::new().unwrap();
    let paths = WorkerPaths::under(worker_dir.path());
    let addr = spawn_worker(paths.clone()).await;

    let client =
        TransferClient::new(&format!("http://{}", addr), paths.clone()).unwrap();

    let local = TempDir::new().unwrap();
    let scene = local.path().join("shot.blend");
    let contents: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(&scene, &contents).unwrap();

    client.ready().await.unwrap();
    client.upload(&scene).await.unwrap();

    let dest = local.path().join("copy.blend");
    let url = client.file_url(&paths.inbox_dir.join("shot.blend")).unwrap();
    client.download_file(&url, &dest).await.unwrap();

    assert_eq!(std::fs::read(&dest).unwrap(), contents);
}

#[tokio::test]
async fn test_sentinel_absent_then_present() {
    let worker_dir = TempDir::new().unwrap();
    let paths = WorkerPaths::under(worker_dir.path());
    let addr = spawn_worker(paths.clone()).await;
    let client =
        TransferClient::new(&format!("http://{}", addr), paths.clone()).unwrap();

    let local = TempDir::new().unwrap();
    let marker = local.path().join("done.txt");
    let url = client.sentinel_url().unwrap();

    let err = client.download_file(&url, &marker).await.unwrap_err();
    assert!(err.is_not_ready());
    assert!(!marker.exists());

    std::fs::create_dir_all(&paths.inbox_dir).unwrap();
    std::fs::write(paths.sentinel_path(), "").unwrap();

    client.download_file(&url, &marker).await.unwrap();
    assert!(marker.exists());
}
