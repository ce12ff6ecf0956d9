//! Static frontend serving tests.
//!
//! Tests verify:
//! - Files in the frontend directory are served for non-API paths
//! - `/` serves `index.html`
//! - Missing files and unknown API paths answer 404

use std::fs;

use axum::http::StatusCode;
use tempfile::TempDir;

use speedsqueak_web::{create_router, RouterConfig};

use super::test_utils::{event_rows, get, MockIssuer, MockWarehouse};

const INDEX_HTML: &str = "<!doctype html><title>SpeedSqueak</title><div id=\"blobOverlay\"></div>";
const OVERLAY_JS: &str = "function closeOverlay() {}";

fn frontend_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("index.html"), INDEX_HTML).unwrap();
    fs::write(dir.path().join("blob-overlay.js"), OVERLAY_JS).unwrap();
    fs::create_dir(dir.path().join("css")).unwrap();
    fs::write(dir.path().join("css").join("site.css"), "body { margin: 0 }").unwrap();
    dir
}

fn static_router(dir: &TempDir) -> axum::Router {
    let config = RouterConfig::new(dir.path()).with_tracing(false);
    create_router(MockIssuer::new(), MockWarehouse::with_rows(event_rows(1)), config)
}

#[tokio::test]
async fn test_serves_static_file() {
    let dir = frontend_dir();

    let (status, body) = get(static_router(&dir), "/blob-overlay.js").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], OVERLAY_JS.as_bytes());
}

#[tokio::test]
async fn test_serves_nested_static_file() {
    let dir = frontend_dir();

    let (status, body) = get(static_router(&dir), "/css/site.css").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"body { margin: 0 }");
}

#[tokio::test]
async fn test_root_serves_index() {
    let dir = frontend_dir();

    let (status, body) = get(static_router(&dir), "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], INDEX_HTML.as_bytes());
}

#[tokio::test]
async fn test_missing_static_file_is_not_found() {
    let dir = frontend_dir();

    let (status, _) = get(static_router(&dir), "/does-not-exist.png").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_api_path_is_not_found() {
    let dir = frontend_dir();

    let (status, _) = get(static_router(&dir), "/api/unknown").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_api_routes_take_precedence() {
    let dir = frontend_dir();
    // A file that shadows an API path must not be served
    fs::create_dir(dir.path().join("api")).unwrap();
    fs::write(dir.path().join("api").join("events"), "static").unwrap();

    let (status, body) = get(static_router(&dir), "/api/events").await;
    assert_eq!(status, StatusCode::OK);
    let rows: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(rows.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_missing_static_dir_is_not_found() {
    let router = super::test_utils::test_router(MockIssuer::new(), MockWarehouse::with_rows(vec![]));

    let (status, _) = get(router, "/index.html").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
