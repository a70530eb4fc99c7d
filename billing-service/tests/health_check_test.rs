//! Health and metrics endpoint tests.

mod common;

use common::TestApp;

#[tokio::test]
async fn health_check_works() {
    let app = TestApp::spawn().await;

    let response = reqwest::get(format!("{}/health", app.address))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "billing-service");
}

#[tokio::test]
async fn readiness_check_works() {
    let app = TestApp::spawn().await;

    let response = reqwest::get(format!("{}/ready", app.address)).await.unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn metrics_endpoint_exposes_billing_metrics() {
    let app = TestApp::spawn().await;

    let response = reqwest::get(format!("{}/metrics", app.address))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body = response.text().await.unwrap();
    assert!(body.contains("billing_"));
}
