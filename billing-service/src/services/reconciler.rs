//! Webhook-driven payment reconciliation.
//!
//! A webhook is a trigger to re-check, not a source of truth: after the
//! signature gate, the payment's status is re-fetched from the gateway
//! by transaction id and only that authoritative answer is applied.
//! Updates are idempotent — an already-terminal payment short-circuits
//! before any cascade — so at-least-once delivery causes at-most-once
//! side effects.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Deserialize;
use service_core::error::AppError;

use crate::models::{Payment, PaymentStatus, SubscriptionStatus};

use super::gateway::{PaymentGateway, PaymentStatusInfo};
use super::metrics::{record_subscription_operation, record_webhook_event};
use super::store::BillingStore;
use super::tenant_lock::TenantLocks;

/// Reconciliation policy knobs, all configuration-driven.
#[derive(Debug, Clone)]
pub struct ReconcilePolicy {
    /// Reject webhooks without a valid signature. Disabled only in
    /// non-verifying deployments.
    pub verify_signatures: bool,
    /// FAILED payments within the window that trigger suspension.
    pub failure_threshold: i64,
    /// Trailing window, in days, for counting failures.
    pub failure_window_days: i64,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            verify_signatures: true,
            failure_threshold: 3,
            failure_window_days: 30,
        }
    }
}

/// What processing a notification did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The payment was moved to this terminal status and cascades ran.
    Applied(PaymentStatus),
    /// The payment was already terminal; nothing changed.
    AlreadyTerminal,
    /// The gateway still reports the payment in flight.
    StillPending,
    /// No local payment carries the notified merchant reference.
    UnknownReference,
    /// The payload carried no usable reference; dropped.
    MissingReference,
}

/// Inbound notification body. The `status` field is parsed but never
/// trusted; reconciliation re-fetches from the gateway.
#[derive(Debug, Deserialize)]
struct WebhookNotification {
    #[serde(default)]
    imp_uid: Option<String>,
    #[serde(default)]
    merchant_uid: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    status: Option<String>,
}

pub struct WebhookReconciler {
    store: Arc<dyn BillingStore>,
    gateway: Arc<dyn PaymentGateway>,
    locks: TenantLocks,
    policy: ReconcilePolicy,
}

impl WebhookReconciler {
    pub fn new(
        store: Arc<dyn BillingStore>,
        gateway: Arc<dyn PaymentGateway>,
        locks: TenantLocks,
        policy: ReconcilePolicy,
    ) -> Self {
        Self {
            store,
            gateway,
            locks,
            policy,
        }
    }

    /// Process one gateway notification.
    ///
    /// Signature failures are fatal for the request; a gateway re-fetch
    /// error propagates so the delivery mechanism retries; every other
    /// anomaly is a logged no-op.
    pub async fn process_notification(
        &self,
        body: &str,
        signature: Option<&str>,
    ) -> Result<ReconcileOutcome, AppError> {
        if self.policy.verify_signatures {
            let signature = signature.ok_or_else(|| {
                record_webhook_event("rejected");
                AppError::Unauthorized(anyhow::anyhow!("missing webhook signature"))
            })?;
            if !self.gateway.verify_webhook_signature(body, signature) {
                record_webhook_event("rejected");
                return Err(AppError::Unauthorized(anyhow::anyhow!(
                    "invalid webhook signature"
                )));
            }
        }

        let notification: WebhookNotification = serde_json::from_str(body).map_err(|e| {
            record_webhook_event("rejected");
            AppError::BadRequest(anyhow::anyhow!("malformed webhook payload: {}", e))
        })?;

        let (Some(merchant_ref), Some(transaction_id)) = (
            notification.merchant_uid.filter(|s| !s.is_empty()),
            notification.imp_uid.filter(|s| !s.is_empty()),
        ) else {
            tracing::warn!("Webhook payload missing payment reference; dropping");
            record_webhook_event("missing_reference");
            return Ok(ReconcileOutcome::MissingReference);
        };

        let info = self.gateway.get_payment_status(&transaction_id).await?;
        let outcome = self
            .refetch_and_apply(&merchant_ref, &transaction_id, &info)
            .await?;

        record_webhook_event(outcome.as_str());
        Ok(outcome)
    }

    /// Re-run reconciliation for one known transaction; recovers from
    /// lost or undelivered webhooks.
    pub async fn retry(&self, transaction_id: &str) -> Result<ReconcileOutcome, AppError> {
        let payment = self
            .store
            .payment_by_transaction(transaction_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "no payment with transaction id {}",
                    transaction_id
                ))
            })?;

        let info = self.gateway.get_payment_status(transaction_id).await?;
        let outcome = self
            .refetch_and_apply(&payment.merchant_ref, transaction_id, &info)
            .await?;

        record_webhook_event(outcome.as_str());
        Ok(outcome)
    }

    async fn refetch_and_apply(
        &self,
        merchant_ref: &str,
        transaction_id: &str,
        info: &PaymentStatusInfo,
    ) -> Result<ReconcileOutcome, AppError> {
        let Some(payment) = self.store.payment_by_merchant_ref(merchant_ref).await? else {
            tracing::warn!(
                merchant_ref = %merchant_ref,
                "No local payment for notified reference; dropping"
            );
            return Ok(ReconcileOutcome::UnknownReference);
        };

        let _guard = self.locks.acquire(payment.tenant_id).await;

        // Re-read under the tenant lock: a concurrent notification may
        // have finalized this payment while we waited.
        let Some(payment) = self.store.payment_by_merchant_ref(merchant_ref).await? else {
            return Ok(ReconcileOutcome::UnknownReference);
        };

        if payment.status_enum().is_terminal() {
            tracing::info!(
                payment_id = %payment.payment_id,
                status = %payment.status,
                "Payment already terminal; notification is a no-op"
            );
            return Ok(ReconcileOutcome::AlreadyTerminal);
        }

        let new_status = PaymentStatus::from(info.status);
        if new_status == PaymentStatus::Pending {
            tracing::info!(
                payment_id = %payment.payment_id,
                "Gateway still reports payment pending"
            );
            return Ok(ReconcileOutcome::StillPending);
        }

        let finalized = self
            .store
            .finalize_payment(
                payment.payment_id,
                &crate::models::FinalizePayment {
                    transaction_id: Some(transaction_id.to_string()),
                    status: new_status,
                    paid_utc: info.paid_at,
                    failure_reason: info.failure_reason.clone(),
                },
            )
            .await?;

        tracing::info!(
            payment_id = %finalized.payment_id,
            tenant_id = %finalized.tenant_id,
            status = %finalized.status,
            "Payment reconciled"
        );

        match new_status {
            PaymentStatus::Paid => self.cascade_paid(&finalized).await?,
            PaymentStatus::Failed => self.cascade_failed(&finalized).await?,
            PaymentStatus::Canceled | PaymentStatus::PartialCanceled => {
                // Recorded for audit; subscription follow-up is a manual
                // administrative decision.
                tracing::info!(
                    payment_id = %finalized.payment_id,
                    status = %finalized.status,
                    "Cancellation recorded"
                );
            }
            PaymentStatus::Pending => unreachable!("pending short-circuits above"),
        }

        Ok(ReconcileOutcome::Applied(new_status))
    }

    /// A confirmed payment revives a past-due subscription and stamps
    /// the schedule it belongs to.
    async fn cascade_paid(&self, payment: &Payment) -> Result<(), AppError> {
        let paid_on = payment
            .paid_utc
            .unwrap_or_else(Utc::now)
            .date_naive();

        if let Some(subscription) = self.store.latest_subscription(payment.tenant_id).await? {
            match subscription.status_enum() {
                SubscriptionStatus::PastDue => {
                    let next = subscription.cycle().advance(paid_on);
                    self.store
                        .reactivate_subscription(subscription.subscription_id, next)
                        .await?;
                    record_subscription_operation(&payment.tenant_id.to_string(), "reactivate");
                    tracing::info!(
                        subscription_id = %subscription.subscription_id,
                        tenant_id = %payment.tenant_id,
                        "Past-due subscription reactivated by confirmed payment"
                    );
                }
                SubscriptionStatus::Active => {
                    // A confirmed renewal opens a fresh usage period.
                    if payment.schedule_id.is_some() {
                        self.store
                            .reset_usage(subscription.subscription_id)
                            .await?;
                    }
                }
                _ => {}
            }
        }

        if let Some(schedule_id) = payment.schedule_id {
            self.store
                .stamp_schedule_charged(schedule_id, paid_on)
                .await?;
        }

        Ok(())
    }

    /// Failure policy: reaching the configured number of FAILED payments
    /// inside the trailing window suspends the subscription and its
    /// schedule. This is the only code path that suspends.
    async fn cascade_failed(&self, payment: &Payment) -> Result<(), AppError> {
        let window_start = Utc::now() - Duration::days(self.policy.failure_window_days);
        let failures = self
            .store
            .failed_payment_count_since(payment.tenant_id, window_start)
            .await?;

        if failures < self.policy.failure_threshold {
            tracing::info!(
                tenant_id = %payment.tenant_id,
                failures = failures,
                threshold = self.policy.failure_threshold,
                "Payment failure recorded below suspension threshold"
            );
            return Ok(());
        }

        let Some(subscription) = self.store.active_subscription(payment.tenant_id).await? else {
            // Nothing active to suspend; a previous cascade already did.
            return Ok(());
        };

        self.store
            .suspend_subscription(subscription.subscription_id)
            .await?;

        record_subscription_operation(&payment.tenant_id.to_string(), "suspend");
        tracing::warn!(
            subscription_id = %subscription.subscription_id,
            tenant_id = %payment.tenant_id,
            failures = failures,
            window_days = self.policy.failure_window_days,
            "Subscription suspended after repeated payment failures"
        );

        Ok(())
    }
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Applied(_) => "applied",
            ReconcileOutcome::AlreadyTerminal => "duplicate",
            ReconcileOutcome::StillPending => "pending",
            ReconcileOutcome::UnknownReference => "unknown_reference",
            ReconcileOutcome::MissingReference => "missing_reference",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_parses_with_missing_fields() {
        let n: WebhookNotification = serde_json::from_str("{}").unwrap();
        assert!(n.imp_uid.is_none());
        assert!(n.merchant_uid.is_none());

        let n: WebhookNotification =
            serde_json::from_str(r#"{"imp_uid":"imp_1","merchant_uid":"ord_1","status":"paid"}"#)
                .unwrap();
        assert_eq!(n.imp_uid.as_deref(), Some("imp_1"));
        assert_eq!(n.merchant_uid.as_deref(), Some("ord_1"));
    }

    #[test]
    fn extra_payload_fields_are_tolerated() {
        let n: WebhookNotification = serde_json::from_str(
            r#"{"imp_uid":"imp_2","merchant_uid":"ord_2","status":"paid","amount":9900,"currency":"KRW"}"#,
        )
        .unwrap();
        assert_eq!(n.imp_uid.as_deref(), Some("imp_2"));
    }
}
