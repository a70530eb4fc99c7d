//! Payment history and manual reconciliation handlers.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;

use crate::middleware::TenantContext;
use crate::models::{ListPaymentsFilter, Payment, PaymentStatus};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub payment_id: uuid::Uuid,
    pub merchant_ref: String,
    pub transaction_id: Option<String>,
    pub amount: i64,
    pub status: String,
    pub schedule_id: Option<uuid::Uuid>,
    pub attempted_at: String,
    pub paid_at: Option<String>,
    pub failure_reason: Option<String>,
}

impl From<Payment> for PaymentResponse {
    fn from(p: Payment) -> Self {
        Self {
            payment_id: p.payment_id,
            merchant_ref: p.merchant_ref,
            transaction_id: p.transaction_id,
            amount: p.amount,
            status: p.status,
            schedule_id: p.schedule_id,
            attempted_at: p.attempted_utc.to_rfc3339(),
            paid_at: p.paid_utc.map(|t| t.to_rfc3339()),
            failure_reason: p.failure_reason,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PaymentHistoryQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PaymentHistoryResponse {
    pub payments: Vec<PaymentResponse>,
}

/// Payment history for the tenant, newest first.
pub async fn list_payments(
    State(state): State<AppState>,
    tenant: TenantContext,
    Query(query): Query<PaymentHistoryQuery>,
) -> Result<Json<PaymentHistoryResponse>, AppError> {
    let filter = ListPaymentsFilter {
        status: query.status.as_deref().map(PaymentStatus::from_string),
        limit: query.limit.unwrap_or(50),
        offset: query.offset.unwrap_or(0),
    };

    let payments = state.store.list_payments(tenant.tenant_id, &filter).await?;

    Ok(Json(PaymentHistoryResponse {
        payments: payments.into_iter().map(Into::into).collect(),
    }))
}

#[derive(Debug, Serialize)]
pub struct RetryPaymentResponse {
    pub result: String,
}

/// Re-query the gateway for one transaction; recovers payments whose
/// webhook never arrived.
pub async fn retry_payment(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(transaction_id): Path<String>,
) -> Result<Json<RetryPaymentResponse>, AppError> {
    // Scope the lookup to the tenant before touching the gateway.
    let payment = state
        .store
        .payment_by_transaction(&transaction_id)
        .await?
        .filter(|p| p.tenant_id == tenant.tenant_id)
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "no payment with transaction id {}",
                transaction_id
            ))
        })?;

    let outcome = state.reconciler.retry(&payment.transaction_id.unwrap_or(transaction_id)).await?;

    Ok(Json(RetryPaymentResponse {
        result: outcome.as_str().to_string(),
    }))
}
