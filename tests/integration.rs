//! Integration tests for the HTTP scoring service.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use riskaudit::artifact::demo_context;
use riskaudit::server::{router, ServerState};

// ---------------------------------------------------------------------------
// Helper: spin up a test server on an ephemeral port
// ---------------------------------------------------------------------------

async fn spawn_test_server(degraded: bool) -> SocketAddr {
    let context = if degraded {
        None
    } else {
        Some(Arc::new(demo_context()))
    };
    let state = Arc::new(ServerState::new(context));
    let app = router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    addr
}

// ---------------------------------------------------------------------------
// Health and schema endpoints
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_ok_with_fingerprint() {
    let addr = spawn_test_server(false).await;
    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["artifact_fingerprint"]
        .as_str()
        .unwrap()
        .starts_with("sha256:"));
}

#[tokio::test]
async fn features_expose_schema_with_defaults_and_range() {
    let addr = spawn_test_server(false).await;
    let resp = reqwest::get(format!("http://{addr}/api/v1/features"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    let features = body["features"].as_array().unwrap();
    assert_eq!(features.len(), 5);
    for f in features {
        assert!(f["name"].is_string());
        assert_eq!(f["min"], 0.0);
        assert_eq!(f["max"], 1.0);
        assert!(f["default"].as_f64().unwrap() > 0.0);
    }
}

#[tokio::test]
async fn template_columns_match_schema_order() {
    let addr = spawn_test_server(false).await;
    let resp = reqwest::get(format!("http://{addr}/api/v1/template"))
        .await
        .unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    let columns = body["columns"].as_array().unwrap();
    assert_eq!(columns[0], "Borrowing dependency");
    assert_eq!(columns.len(), 5);
}

// ---------------------------------------------------------------------------
// Scoring endpoints
// ---------------------------------------------------------------------------

#[tokio::test]
async fn score_single_company() {
    let addr = spawn_test_server(false).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/api/v1/score"))
        .json(&serde_json::json!({
            "Borrowing dependency": 0.40,
            "Unlisted Column": "ignored"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    let p = body["probability"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&p));
    assert_eq!(body["threshold"], 0.4);
    assert_eq!(body["attribution"]["method"], "exact");
    assert!(body["attribution"]["impacts"].as_array().unwrap().len() <= 5);
}

#[tokio::test]
async fn non_numeric_known_feature_is_rejected() {
    let addr = spawn_test_server(false).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/api/v1/score"))
        .json(&serde_json::json!({ "Borrowing dependency": "lots" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = resp.json().await.unwrap();
    let message = body["error"].as_str().unwrap();
    assert!(message.contains("Borrowing dependency"));
    // Single-score route must not report a batch error.
    assert!(message.starts_with("malformed input:"));
}

#[tokio::test]
async fn batch_scores_rows_and_aggregates() {
    let addr = spawn_test_server(false).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/api/v1/batch"))
        .json(&serde_json::json!([
            { "Borrowing dependency": 0.36, "Company": "Acme" },
            { "Net worth/Assets": 0.44 }
        ]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["summary"]["total"], 2);
    let high = body["summary"]["high_risk"].as_u64().unwrap();
    let stable = body["summary"]["stable"].as_u64().unwrap();
    assert_eq!(high + stable, 2);
    // Passthrough column survives to the output row.
    assert_eq!(body["rows"][0]["data"]["Company"], "Acme");
    assert_eq!(body["rows"][0]["row_index"], 0);
}

#[tokio::test]
async fn empty_batch_returns_defined_no_data_summary() {
    let addr = spawn_test_server(false).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/api/v1/batch"))
        .json(&serde_json::json!([]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["summary"]["total"], 0);
    assert!(body["summary"]["average_risk"].is_null());
}

// ---------------------------------------------------------------------------
// Degraded mode
// ---------------------------------------------------------------------------

#[tokio::test]
async fn degraded_server_refuses_to_score_but_stays_up() {
    let addr = spawn_test_server(true).await;
    let client = reqwest::Client::new();

    let health: serde_json::Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "degraded");

    let resp = client
        .post(format!("http://{addr}/api/v1/score"))
        .json(&serde_json::json!({ "Borrowing dependency": 0.4 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);

    let resp = reqwest::get(format!("http://{addr}/api/v1/features"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
}
