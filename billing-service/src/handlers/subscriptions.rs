//! Subscription lifecycle handlers.

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;

use crate::middleware::TenantContext;
use crate::models::{BillingCycle, PlanType, Subscription};
use crate::services::lifecycle::{PlanChange, StartedSubscription};
use crate::AppState;

use super::payments::PaymentResponse;

fn parse_plan(raw: &str) -> Result<PlanType, AppError> {
    match raw {
        "starter" | "pro" | "business" => Ok(PlanType::from_string(raw)),
        other => Err(AppError::BadRequest(anyhow::anyhow!(
            "unknown plan: {}",
            other
        ))),
    }
}

fn parse_cycle(raw: &str) -> Result<BillingCycle, AppError> {
    match raw {
        "monthly" | "yearly" => Ok(BillingCycle::from_string(raw)),
        other => Err(AppError::BadRequest(anyhow::anyhow!(
            "unknown billing cycle: {}",
            other
        ))),
    }
}

#[derive(Debug, Deserialize)]
pub struct StartSubscriptionRequest {
    pub plan: String,
    #[serde(default = "default_cycle")]
    pub cycle: String,
}

fn default_cycle() -> String {
    "monthly".to_string()
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub subscription_id: uuid::Uuid,
    pub plan: String,
    pub status: String,
    pub billing_cycle: String,
    pub start_date: String,
    pub end_date: Option<String>,
    pub next_billing_date: String,
    pub auto_renew: bool,
    pub comment_count: i64,
    pub comment_limit: i64,
}

impl From<Subscription> for SubscriptionResponse {
    fn from(s: Subscription) -> Self {
        Self {
            subscription_id: s.subscription_id,
            plan: s.plan,
            status: s.status,
            billing_cycle: s.billing_cycle,
            start_date: s.start_date.to_string(),
            end_date: s.end_date.map(|d| d.to_string()),
            next_billing_date: s.next_billing_date.to_string(),
            auto_renew: s.auto_renew,
            comment_count: s.comment_count,
            comment_limit: s.comment_limit,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StartSubscriptionResponse {
    pub subscription: SubscriptionResponse,
    pub schedule_id: uuid::Uuid,
    pub next_charge_date: String,
    pub payment: PaymentResponse,
}

impl From<StartedSubscription> for StartSubscriptionResponse {
    fn from(started: StartedSubscription) -> Self {
        Self {
            subscription: started.subscription.into(),
            schedule_id: started.schedule.schedule_id,
            next_charge_date: started.schedule.next_charge_date.to_string(),
            payment: started.payment.into(),
        }
    }
}

/// Start a subscription, charging the first period up front.
pub async fn start_subscription(
    State(state): State<AppState>,
    tenant: TenantContext,
    Json(payload): Json<StartSubscriptionRequest>,
) -> Result<(StatusCode, Json<StartSubscriptionResponse>), AppError> {
    let plan = parse_plan(&payload.plan)?;
    let cycle = parse_cycle(&payload.cycle)?;

    let started = state
        .lifecycle
        .start(tenant.tenant_id, plan, cycle, Utc::now().date_naive())
        .await?;

    Ok((StatusCode::CREATED, Json(started.into())))
}

#[derive(Debug, Serialize)]
pub struct CancelSubscriptionResponse {
    pub cancelled: bool,
}

/// Cancel the active subscription. Idempotent.
pub async fn cancel_subscription(
    State(state): State<AppState>,
    tenant: TenantContext,
) -> Result<Json<CancelSubscriptionResponse>, AppError> {
    let cancelled = state
        .lifecycle
        .cancel(tenant.tenant_id, Utc::now().date_naive())
        .await?;

    Ok(Json(CancelSubscriptionResponse { cancelled }))
}

#[derive(Debug, Deserialize)]
pub struct ChangePlanRequest {
    pub plan: String,
}

#[derive(Debug, Serialize)]
pub struct ChangePlanResponse {
    pub subscription: SubscriptionResponse,
    pub prorated_amount: i64,
    pub payment: Option<PaymentResponse>,
}

impl From<PlanChange> for ChangePlanResponse {
    fn from(change: PlanChange) -> Self {
        Self {
            subscription: change.subscription.into(),
            prorated_amount: change.prorated_amount,
            payment: change.payment.map(Into::into),
        }
    }
}

/// Change the active subscription's plan, charging prorated upgrades.
pub async fn change_plan(
    State(state): State<AppState>,
    tenant: TenantContext,
    Json(payload): Json<ChangePlanRequest>,
) -> Result<Json<ChangePlanResponse>, AppError> {
    let plan = parse_plan(&payload.plan)?;

    let change = state
        .lifecycle
        .change_plan(tenant.tenant_id, plan, Utc::now().date_naive())
        .await?;

    Ok(Json(change.into()))
}

/// Reactivate a cancelled or past-due subscription.
pub async fn reactivate_subscription(
    State(state): State<AppState>,
    tenant: TenantContext,
) -> Result<Json<StartSubscriptionResponse>, AppError> {
    let started = state
        .lifecycle
        .reactivate(tenant.tenant_id, Utc::now().date_naive())
        .await?;

    Ok(Json(started.into()))
}

/// Fetch the tenant's subscription, whatever its status.
pub async fn get_subscription(
    State(state): State<AppState>,
    tenant: TenantContext,
) -> Result<Json<SubscriptionResponse>, AppError> {
    let subscription = state
        .store
        .latest_subscription(tenant.tenant_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("no subscription")))?;

    Ok(Json(subscription.into()))
}

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub comment_count: i64,
    pub comment_limit: i64,
    pub within_limit: bool,
}

/// Count one comment against the tenant's monthly quota.
pub async fn record_comment_usage(
    State(state): State<AppState>,
    tenant: TenantContext,
) -> Result<Json<UsageResponse>, AppError> {
    let count = state.store.increment_usage(tenant.tenant_id).await?;
    let subscription = state
        .store
        .active_subscription(tenant.tenant_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("no active subscription")))?;

    Ok(Json(UsageResponse {
        comment_count: count,
        comment_limit: subscription.comment_limit,
        within_limit: count <= subscription.comment_limit,
    }))
}
