//! Billing credential handlers.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;

use crate::middleware::TenantContext;
use crate::models::BillingCredential;
use crate::services::gateway::CardDetails;
use crate::AppState;

/// Request to register a card as the tenant's billing credential.
#[derive(Debug, Deserialize)]
pub struct IssueCredentialRequest {
    pub card_number: String,
    pub expiry_month: String,
    pub expiry_year: String,
    pub cvc: String,
}

/// Masked credential metadata; raw card data never comes back out.
#[derive(Debug, Serialize)]
pub struct CredentialResponse {
    pub credential_id: uuid::Uuid,
    pub card_brand: String,
    pub card_last4: String,
    pub status: String,
    pub created_at: String,
}

impl From<BillingCredential> for CredentialResponse {
    fn from(c: BillingCredential) -> Self {
        Self {
            credential_id: c.credential_id,
            card_brand: c.card_brand,
            card_last4: c.card_last4,
            status: c.status,
            created_at: c.created_utc.to_rfc3339(),
        }
    }
}

/// Register a new billing credential, replacing any existing one.
pub async fn issue_credential(
    State(state): State<AppState>,
    tenant: TenantContext,
    Json(payload): Json<IssueCredentialRequest>,
) -> Result<(StatusCode, Json<CredentialResponse>), AppError> {
    let card = CardDetails {
        number: payload.card_number,
        expiry_month: payload.expiry_month,
        expiry_year: payload.expiry_year,
        cvc: payload.cvc,
    };

    let credential = state.credentials.issue(tenant.tenant_id, &card).await?;

    Ok((StatusCode::CREATED, Json(credential.into())))
}

/// Fetch the tenant's active credential.
pub async fn get_credential(
    State(state): State<AppState>,
    tenant: TenantContext,
) -> Result<Json<CredentialResponse>, AppError> {
    let credential = state
        .credentials
        .get(tenant.tenant_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("no active billing credential")))?;

    Ok(Json(credential.into()))
}

#[derive(Debug, Serialize)]
pub struct DeleteCredentialResponse {
    pub deleted: bool,
}

/// Delete the tenant's active credential.
pub async fn delete_credential(
    State(state): State<AppState>,
    tenant: TenantContext,
) -> Result<Json<DeleteCredentialResponse>, AppError> {
    let deleted = state.credentials.delete(tenant.tenant_id).await?;
    Ok(Json(DeleteCredentialResponse { deleted }))
}

#[derive(Debug, Serialize)]
pub struct ValidateCredentialResponse {
    pub valid: bool,
}

/// Live validation round-trip against the gateway.
pub async fn validate_credential(
    State(state): State<AppState>,
    tenant: TenantContext,
) -> Result<Json<ValidateCredentialResponse>, AppError> {
    let valid = state.credentials.validate(tenant.tenant_id).await?;
    Ok(Json(ValidateCredentialResponse { valid }))
}
