//! Gateway webhook handler.
//!
//! Responds 200 for anything processed or deliberately dropped so the
//! gateway stops redelivering; signature and re-fetch failures map to
//! error statuses, which the gateway retries.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::json;
use service_core::error::AppError;

use crate::AppState;

pub const SIGNATURE_HEADER: &str = "X-Portone-Signature";

/// PortOne payment status webhook.
pub async fn portone_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    tracing::debug!(has_signature = signature.is_some(), "Received PortOne webhook");

    let outcome = state
        .reconciler
        .process_notification(&body, signature)
        .await?;

    Ok((StatusCode::OK, Json(json!({ "result": outcome.as_str() }))))
}
