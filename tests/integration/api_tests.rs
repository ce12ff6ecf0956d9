//! API integration tests for SAS issuance and the events endpoint.
//!
//! Tests verify:
//! - SAS URLs for valid blob names, with read-only permission and 1 hour expiry
//! - Missing or empty `blobName` is rejected before signing
//! - Signing and warehouse failures map to 500 with a generic body
//! - Events rows pass through unchanged and in order

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use axum::http::{Method, StatusCode};
use chrono::{DateTime, Utc};

use speedsqueak_web::error::WarehouseError;
use speedsqueak_web::EVENTS_QUERY;

use super::test_utils::{
    event_rows, get, send, test_router, test_signer, MockIssuer, MockWarehouse, TEST_ACCOUNT,
};

fn sas_url_from_body(body: &[u8]) -> String {
    let json: serde_json::Value = serde_json::from_slice(body).unwrap();
    let object = json.as_object().unwrap();
    assert_eq!(object.len(), 1, "response should have a single field");
    object["sasUrl"].as_str().unwrap().to_string()
}

fn query_params(url: &str) -> HashMap<String, String> {
    url::Url::parse(url)
        .unwrap()
        .query_pairs()
        .into_owned()
        .collect()
}

// =============================================================================
// SAS URL Issuance
// =============================================================================

#[tokio::test]
async fn test_generate_sas_url_success() {
    let router = test_router(test_signer(), MockWarehouse::with_rows(vec![]));
    let requested_at = Utc::now();

    let (status, body) = get(router, "/api/generate-sas-url?blobName=cat.png").await;
    assert_eq!(status, StatusCode::OK);

    let sas_url = sas_url_from_body(&body);
    let expected_prefix = format!(
        "https://{}.blob.core.windows.net/images/cat.png?",
        TEST_ACCOUNT
    );
    assert!(
        sas_url.starts_with(&expected_prefix),
        "unexpected URL: {}",
        sas_url
    );

    let params = query_params(&sas_url);
    assert_eq!(params["sp"], "r");
    assert_eq!(params["sr"], "b");
    assert!(params.contains_key("sig"));

    let expiry: DateTime<Utc> = params["se"].parse().unwrap();
    let delta = (expiry - requested_at).num_seconds();
    assert!((3598..=3601).contains(&delta), "expiry delta was {}", delta);
}

#[tokio::test]
async fn test_generate_sas_url_contains_blob_name() {
    for blob in ["cat.png", "2024/05/01/capture-17.jpg", "speed_trap.jpeg"] {
        let router = test_router(test_signer(), MockWarehouse::with_rows(vec![]));
        let (status, body) = get(router, &format!("/api/generate-sas-url?blobName={}", blob)).await;
        assert_eq!(status, StatusCode::OK);

        let sas_url = sas_url_from_body(&body);
        let path = url::Url::parse(&sas_url).unwrap().path().to_string();
        assert_eq!(path, format!("/images/{}", blob));
    }
}

#[tokio::test]
async fn test_generate_sas_url_fresh_signature_each_call() {
    let issuer = MockIssuer::new();
    let calls = issuer.call_counter();
    let router = test_router(issuer, MockWarehouse::with_rows(vec![]));

    for _ in 0..3 {
        let (status, _) = get(router.clone(), "/api/generate-sas-url?blobName=cat.png").await;
        assert_eq!(status, StatusCode::OK);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_generate_sas_url_missing_blob_name() {
    let issuer = MockIssuer::new();
    let calls = issuer.call_counter();
    let router = test_router(issuer, MockWarehouse::with_rows(vec![]));

    let (status, body) = get(router, "/api/generate-sas-url").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(&body[..], b"Blob name is required");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_generate_sas_url_empty_blob_name() {
    let issuer = MockIssuer::new();
    let calls = issuer.call_counter();
    let router = test_router(issuer, MockWarehouse::with_rows(vec![]));

    let (status, _) = get(router, "/api/generate-sas-url?blobName=").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_generate_sas_url_signing_failure() {
    let issuer = MockIssuer::failing();
    let calls = issuer.call_counter();
    let router = test_router(issuer, MockWarehouse::with_rows(vec![]));

    let (status, body) = get(router.clone(), "/api/generate-sas-url?blobName=cat.png").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(&body[..], b"Failed to generate SAS URL");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // The server keeps answering after a failure
    let (status, _) = get(router, "/api/generate-sas-url?blobName=dog.png").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_generate_sas_url_invalid_key_is_server_error() {
    use speedsqueak_web::{SharedKeySigner, StorageCredential};

    let signer = SharedKeySigner::new(StorageCredential::new(TEST_ACCOUNT, "not base64!"), "images");
    let router = test_router(signer, MockWarehouse::with_rows(vec![]));

    let (status, body) = get(router, "/api/generate-sas-url?blobName=cat.png").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    // The cause is logged, not returned
    assert!(!String::from_utf8_lossy(&body).contains("base64"));
}

#[tokio::test]
async fn test_generate_sas_url_rejects_post() {
    let router = test_router(MockIssuer::new(), MockWarehouse::with_rows(vec![]));

    let (status, _) = send(router, Method::POST, "/api/generate-sas-url?blobName=cat.png").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

// =============================================================================
// Events
// =============================================================================

#[tokio::test]
async fn test_events_returns_rows_in_order() {
    let rows = event_rows(5);
    let warehouse = MockWarehouse::with_rows(rows.clone());
    let queries = warehouse.query_log();
    let router = test_router(MockIssuer::new(), warehouse);

    let (status, body) = get(router, "/api/events").await;
    assert_eq!(status, StatusCode::OK);

    let returned: Vec<serde_json::Map<String, serde_json::Value>> =
        serde_json::from_slice(&body).unwrap();
    assert_eq!(returned, rows);

    let ids: Vec<u64> = returned
        .iter()
        .map(|row| row["ID"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, vec![5, 4, 3, 2, 1]);

    assert_eq!(*queries.lock().unwrap(), vec![EVENTS_QUERY.to_string()]);
}

#[tokio::test]
async fn test_events_empty_table() {
    let router = test_router(MockIssuer::new(), MockWarehouse::with_rows(vec![]));

    let (status, body) = get(router, "/api/events").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"[]");
}

#[tokio::test]
async fn test_events_preserves_column_order() {
    let router = test_router(MockIssuer::new(), MockWarehouse::with_rows(event_rows(1)));

    let (_, body) = get(router, "/api/events").await;
    let text = String::from_utf8(body.to_vec()).unwrap();

    let id = text.find("\"ID\"").unwrap();
    let timestamp = text.find("\"TIMESTAMP\"").unwrap();
    let speed = text.find("\"SPEED\"").unwrap();
    let image = text.find("\"IMAGE\"").unwrap();
    assert!(id < timestamp && timestamp < speed && speed < image);
}

#[tokio::test]
async fn test_events_warehouse_failure() {
    let warehouse = MockWarehouse::failing(WarehouseError::Query {
        code: "002003".to_string(),
        message: "SQL compilation error: Object 'EVENTS' does not exist".to_string(),
    });
    let router = test_router(MockIssuer::new(), warehouse);

    let (status, body) = get(router, "/api/events").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(&body[..], b"Failed to fetch data from Snowflake");
}

#[tokio::test]
async fn test_events_not_connected() {
    let router = test_router(
        MockIssuer::new(),
        MockWarehouse::failing(WarehouseError::NotConnected),
    );

    let (status, _) = get(router.clone(), "/api/events").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    // Still answering, still failing: no reconnect inside the request path
    let (status, _) = get(router, "/api/events").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_events_ignores_query_params() {
    let rows = event_rows(2);
    let router = test_router(MockIssuer::new(), MockWarehouse::with_rows(rows.clone()));

    let (status, body) = get(router, "/api/events?limit=1").await;
    assert_eq!(status, StatusCode::OK);

    let returned: Vec<serde_json::Map<String, serde_json::Value>> =
        serde_json::from_slice(&body).unwrap();
    assert_eq!(returned.len(), 2);
}
