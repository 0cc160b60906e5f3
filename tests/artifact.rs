//! Tests for artifact path layout and download-then-write persistence.

mod common;

use std::path::Path;

use chrono::NaiveDate;
use common::{http_response, png_response, spawn_router};
use imagecast::artifact::{ArtifactStore, artifact_path};
use imagecast::error::ImagecastError;

const FAKE_PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake-image-bytes";

fn at(h: u32, m: u32, s: u32) -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 2, 20)
        .unwrap()
        .and_hms_opt(h, m, s)
        .unwrap()
}

#[test]
fn artifact_path_layout() {
    let path = artifact_path(Path::new("/data/out"), "siliconflow", at(21, 56, 54));
    assert_eq!(path, Path::new("/data/out/2026-02-20/siliconflow/215654.png"));
}

#[test]
fn artifact_path_zero_pads_time() {
    let path = artifact_path(Path::new("out"), "aliyun", at(7, 5, 3));
    assert_eq!(path, Path::new("out/2026-02-20/aliyun/070503.png"));
}

#[tokio::test]
async fn persist_writes_downloaded_bytes() {
    let (port, _log) = spawn_router(|_| png_response(FAKE_PNG)).await;
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(dir.path());

    let path = store
        .persist(
            "siliconflow",
            at(21, 56, 54),
            &format!("http://127.0.0.1:{port}/img.png"),
        )
        .await
        .unwrap();

    assert_eq!(path, dir.path().join("2026-02-20/siliconflow/215654.png"));
    assert_eq!(std::fs::read(&path).unwrap(), FAKE_PNG);

    // No temp files left next to the artifact
    let siblings: Vec<_> = std::fs::read_dir(path.parent().unwrap())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(siblings.len(), 1);
}

#[tokio::test]
async fn persist_same_second_overwrites() {
    let (port, _log) = spawn_router(|request| {
        if request.starts_with("GET /first") {
            png_response(b"first")
        } else {
            png_response(b"second")
        }
    })
    .await;
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(dir.path());
    let base = format!("http://127.0.0.1:{port}");

    let a = store.persist("openai", at(8, 0, 0), &format!("{base}/first")).await.unwrap();
    let b = store.persist("openai", at(8, 0, 0), &format!("{base}/second")).await.unwrap();

    assert_eq!(a, b);
    assert_eq!(std::fs::read(&b).unwrap(), b"second");
}

#[tokio::test]
async fn persist_now_uses_provider_directory() {
    let (port, _log) = spawn_router(|_| png_response(FAKE_PNG)).await;
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(dir.path());

    let path = store
        .persist_now("modelscope", &format!("http://127.0.0.1:{port}/x"))
        .await
        .unwrap();

    assert!(path.starts_with(dir.path()));
    assert_eq!(
        path.parent().unwrap().file_name().unwrap().to_str().unwrap(),
        "modelscope"
    );
    assert_eq!(path.extension().unwrap(), "png");
    assert!(path.exists());
}

#[tokio::test]
async fn persist_http_error_writes_nothing() {
    let (port, _log) = spawn_router(|_| http_response("404 Not Found", "text/plain", b"gone")).await;
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(dir.path());

    let err = store
        .persist("openai", at(9, 0, 0), &format!("http://127.0.0.1:{port}/missing.png"))
        .await
        .unwrap_err();
    assert!(matches!(err, ImagecastError::ArtifactPersist(_)), "got {err:?}");
    assert!(!dir.path().join("2026-02-20").exists());
}

#[tokio::test]
async fn persist_empty_body_is_an_error() {
    let (port, _log) = spawn_router(|_| png_response(b"")).await;
    let dir = tempfile::tempdir().unwrap();

    let err = ArtifactStore::new(dir.path())
        .persist("openai", at(9, 0, 0), &format!("http://127.0.0.1:{port}/empty.png"))
        .await
        .unwrap_err();
    assert!(matches!(err, ImagecastError::ArtifactPersist(_)), "got {err:?}");
}

#[tokio::test]
async fn persist_rejects_oversized_image() {
    let big = vec![7u8; 4096];
    let (port, _log) = spawn_router(move |_| png_response(&big)).await;
    let dir = tempfile::tempdir().unwrap();

    let err = ArtifactStore::new(dir.path())
        .with_max_bytes(1024)
        .persist("openai", at(9, 0, 0), &format!("http://127.0.0.1:{port}/big.png"))
        .await
        .unwrap_err();
    match err {
        ImagecastError::ArtifactPersist(msg) => assert!(msg.contains("exceeds")),
        other => panic!("expected ArtifactPersist, got {other:?}"),
    }
}

#[tokio::test]
async fn persist_unreachable_host_is_an_error() {
    let (listener, port) = common::mock_listener().await;
    drop(listener);
    let dir = tempfile::tempdir().unwrap();
    let err = ArtifactStore::new(dir.path())
        .persist("openai", at(9, 0, 0), &format!("http://127.0.0.1:{port}/none.png"))
        .await
        .unwrap_err();
    assert!(matches!(err, ImagecastError::ArtifactPersist(_)), "got {err:?}");
}
