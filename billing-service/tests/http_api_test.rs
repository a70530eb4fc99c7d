//! Network-level tests for the tenant-facing API and the webhook route.

mod common;

use billing_service::models::{CreatePayment, PaymentStatus};
use billing_service::services::gateway::{GatewayPaymentStatus, PaymentStatusInfo};
use billing_service::services::BillingStore;
use chrono::Utc;
use common::TestApp;
use serde_json::json;
use uuid::Uuid;

const TENANT: &str = "11111111-1111-1111-1111-111111111111";

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

async fn register_card(app: &TestApp) {
    let response = client()
        .post(format!("{}/billing/credentials", app.address))
        .header("X-Tenant-ID", TENANT)
        .json(&json!({
            "card_number": "4242424242424242",
            "expiry_month": "12",
            "expiry_year": "2030",
            "cvc": "123"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
}

#[tokio::test]
async fn tenant_header_is_required() {
    let app = TestApp::spawn().await;

    let response = client()
        .get(format!("{}/billing/subscriptions", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn credential_and_subscription_flow() {
    let app = TestApp::spawn().await;
    register_card(&app).await;

    let credential: serde_json::Value = client()
        .get(format!("{}/billing/credentials", app.address))
        .header("X-Tenant-ID", TENANT)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(credential["card_last4"], "4242");

    let response = client()
        .post(format!("{}/billing/subscriptions", app.address))
        .header("X-Tenant-ID", TENANT)
        .json(&json!({ "plan": "pro", "cycle": "monthly" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);

    let started: serde_json::Value = response.json().await.unwrap();
    assert_eq!(started["subscription"]["status"], "active");
    assert_eq!(started["subscription"]["plan"], "pro");
    assert_eq!(started["payment"]["status"], "paid");

    let history: serde_json::Value = client()
        .get(format!("{}/billing/payments", app.address))
        .header("X-Tenant-ID", TENANT)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history["payments"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_plan_is_rejected() {
    let app = TestApp::spawn().await;
    register_card(&app).await;

    let response = client()
        .post(format!("{}/billing/subscriptions", app.address))
        .header("X-Tenant-ID", TENANT)
        .json(&json!({ "plan": "platinum" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn start_without_credential_is_a_precondition_failure() {
    let app = TestApp::spawn().await;

    let response = client()
        .post(format!("{}/billing/subscriptions", app.address))
        .header("X-Tenant-ID", TENANT)
        .json(&json!({ "plan": "pro" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);
}

#[tokio::test]
async fn webhook_without_signature_is_rejected() {
    let app = TestApp::spawn().await;

    let response = client()
        .post(format!("{}/webhooks/portone", app.address))
        .body(r#"{"imp_uid":"imp_1","merchant_uid":"ord_1","status":"paid"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn signed_webhook_reconciles_a_pending_payment() {
    let app = TestApp::spawn().await;
    let tenant = Uuid::parse_str(TENANT).unwrap();

    app.store
        .insert_payment(&CreatePayment {
            tenant_id: tenant,
            merchant_ref: "ord_http_1".to_string(),
            transaction_id: Some("imp_http_1".to_string()),
            amount: 29_900,
            status: PaymentStatus::Pending,
            schedule_id: None,
            failure_reason: None,
        })
        .await
        .unwrap();

    app.gateway.set_payment_status(
        "imp_http_1",
        PaymentStatusInfo {
            status: GatewayPaymentStatus::Paid,
            paid_at: Some(Utc::now()),
            failure_reason: None,
        },
    );

    let response = client()
        .post(format!("{}/webhooks/portone", app.address))
        .header("X-Portone-Signature", "mock-signature")
        .body(r#"{"imp_uid":"imp_http_1","merchant_uid":"ord_http_1","status":"paid"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["result"], "applied");

    let payment = app
        .store
        .payment_by_merchant_ref("ord_http_1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status_enum(), PaymentStatus::Paid);
}

#[tokio::test]
async fn manual_retry_resolves_a_payment_over_http() {
    let app = TestApp::spawn().await;
    let tenant = Uuid::parse_str(TENANT).unwrap();

    app.store
        .insert_payment(&CreatePayment {
            tenant_id: tenant,
            merchant_ref: "ord_http_2".to_string(),
            transaction_id: Some("imp_http_2".to_string()),
            amount: 9_900,
            status: PaymentStatus::Pending,
            schedule_id: None,
            failure_reason: None,
        })
        .await
        .unwrap();

    app.gateway.set_payment_status(
        "imp_http_2",
        PaymentStatusInfo {
            status: GatewayPaymentStatus::Paid,
            paid_at: Some(Utc::now()),
            failure_reason: None,
        },
    );

    let response = client()
        .post(format!(
            "{}/billing/payments/imp_http_2/retry",
            app.address
        ))
        .header("X-Tenant-ID", TENANT)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["result"], "applied");
}

#[tokio::test]
async fn manual_sweep_endpoint_reports_work() {
    let app = TestApp::spawn().await;

    let response = client()
        .post(format!("{}/billing/runs", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let report: serde_json::Value = response.json().await.unwrap();
    assert_eq!(report["processed"], 0);
}
