//! HTTP handlers for billing-service.

pub mod credentials;
pub mod payments;
pub mod subscriptions;
pub mod webhook;

use axum::extract::State;
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::services::get_metrics;
use crate::AppState;

/// Health check endpoint for Docker/K8s liveness probes.
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": "billing-service",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// Readiness check endpoint for K8s readiness probes. Pings the
/// database when one is configured.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(db) = &state.database {
        if db.health_check().await.is_err() {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded" })),
            );
        }
    }
    (StatusCode::OK, Json(json!({ "status": "ready" })))
}

/// Prometheus metrics endpoint.
pub async fn metrics_endpoint() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

/// Manually trigger one billing sweep; the scheduled loop runs the same
/// operation.
pub async fn run_billing_sweep(
    State(state): State<AppState>,
) -> Result<Json<crate::services::SweepReport>, service_core::error::AppError> {
    let report = state
        .scheduler
        .run_due_charges(chrono::Utc::now().date_naive())
        .await?;
    Ok(Json(report))
}
