//! Subscription lifecycle management.
//!
//! Owns the per-tenant subscription state machine: start, cancel,
//! plan changes with proration, and reactivation. All mutations run
//! under the tenant's lock so webhook reconciliation and the scheduler
//! cannot interleave with them on the same tenant.

use std::sync::Arc;

use chrono::NaiveDate;
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::{
    BillingCredential, BillingCycle, BillingSchedule, CreatePayment, CreateSchedule,
    CreateSubscription, Payment, PaymentStatus, PlanType, Subscription, SubscriptionStatus,
};

use super::gateway::PaymentGateway;
use super::metrics::{record_charge_attempt, record_subscription_operation};
use super::store::BillingStore;
use super::tenant_lock::TenantLocks;

/// Result of starting or reactivating a subscription.
#[derive(Debug, Clone)]
pub struct StartedSubscription {
    pub subscription: Subscription,
    pub schedule: BillingSchedule,
    pub payment: Payment,
}

/// Result of a plan change.
#[derive(Debug, Clone)]
pub struct PlanChange {
    pub subscription: Subscription,
    /// Positive on upgrades; zero or negative amounts charge nothing.
    pub prorated_amount: i64,
    /// The proration charge, when one was made.
    pub payment: Option<Payment>,
}

/// Prorated price difference for the remainder of the current cycle.
///
/// Non-positive day counts yield zero; this guards against clock skew
/// and misconfigured cycle boundaries. Integer floor division keeps the
/// result deterministic.
pub fn prorated_difference(
    remaining_days: i64,
    total_days: i64,
    old_amount: i64,
    new_amount: i64,
) -> i64 {
    if total_days <= 0 || remaining_days <= 0 {
        return 0;
    }
    let remaining = remaining_days.min(total_days);
    remaining * (new_amount - old_amount) / total_days
}

#[derive(Clone)]
pub struct LifecycleService {
    store: Arc<dyn BillingStore>,
    gateway: Arc<dyn PaymentGateway>,
    locks: TenantLocks,
}

impl LifecycleService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        gateway: Arc<dyn PaymentGateway>,
        locks: TenantLocks,
    ) -> Self {
        Self {
            store,
            gateway,
            locks,
        }
    }

    /// Start a subscription, charging the first period immediately.
    ///
    /// A non-PAID first charge aborts the whole operation: no
    /// subscription or schedule row is created, and the failed payment
    /// stays behind as the audit record.
    pub async fn start(
        &self,
        tenant_id: Uuid,
        plan: PlanType,
        cycle: BillingCycle,
        today: NaiveDate,
    ) -> Result<StartedSubscription, AppError> {
        let _guard = self.locks.acquire(tenant_id).await;

        let credential = self.require_credential(tenant_id).await?;

        if let Some(existing) = self.store.active_subscription(tenant_id).await? {
            tracing::info!(
                tenant_id = %tenant_id,
                subscription_id = %existing.subscription_id,
                "Cancelling existing subscription before starting a new one"
            );
            self.store
                .cancel_subscription(existing.subscription_id, today)
                .await?;
        }

        let amount = plan.amount_for(cycle);
        let description = format!("{} {} subscription", plan.as_str(), cycle.as_str());
        let payment = self
            .charge_and_record(
                tenant_id,
                &credential.gateway_ref,
                "sub",
                amount,
                &description,
                None,
                "initial",
            )
            .await?;

        match payment.status_enum() {
            PaymentStatus::Paid => {}
            PaymentStatus::Pending => {
                return Err(AppError::GatewayTimeout(
                    "initial charge outcome unknown; subscription not activated".to_string(),
                ));
            }
            _ => {
                return Err(AppError::BadGateway(format!(
                    "initial charge was not approved: {}",
                    payment.failure_reason.as_deref().unwrap_or("declined")
                )));
            }
        }

        let next_billing_date = cycle.advance(today);
        let (subscription, schedule) = self
            .store
            .insert_subscription_with_schedule(
                &CreateSubscription {
                    tenant_id,
                    plan,
                    billing_cycle: cycle,
                    start_date: today,
                    next_billing_date,
                    comment_limit: plan.comment_limit(),
                },
                &CreateSchedule {
                    tenant_id,
                    credential_id: credential.credential_id,
                    plan,
                    amount,
                    billing_cycle: cycle,
                    next_charge_date: next_billing_date,
                },
            )
            .await?;

        record_subscription_operation(&tenant_id.to_string(), "start");
        tracing::info!(
            tenant_id = %tenant_id,
            subscription_id = %subscription.subscription_id,
            plan = plan.as_str(),
            cycle = cycle.as_str(),
            "Subscription started"
        );

        Ok(StartedSubscription {
            subscription,
            schedule,
            payment,
        })
    }

    /// Cancel the tenant's active subscription. Idempotent: returns
    /// false when there is nothing to cancel.
    pub async fn cancel(&self, tenant_id: Uuid, today: NaiveDate) -> Result<bool, AppError> {
        let _guard = self.locks.acquire(tenant_id).await;

        let Some(subscription) = self.store.active_subscription(tenant_id).await? else {
            return Ok(false);
        };

        self.store
            .cancel_subscription(subscription.subscription_id, today)
            .await?;

        record_subscription_operation(&tenant_id.to_string(), "cancel");
        tracing::info!(
            tenant_id = %tenant_id,
            subscription_id = %subscription.subscription_id,
            "Subscription cancelled"
        );

        Ok(true)
    }

    /// Change the active subscription's plan in place.
    ///
    /// Upgrades charge the prorated difference for the remaining days of
    /// the current cycle immediately; a failed proration charge does not
    /// roll the plan change back. Downgrades charge nothing and issue no
    /// refund.
    pub async fn change_plan(
        &self,
        tenant_id: Uuid,
        new_plan: PlanType,
        today: NaiveDate,
    ) -> Result<PlanChange, AppError> {
        let _guard = self.locks.acquire(tenant_id).await;

        let subscription = self
            .store
            .active_subscription(tenant_id)
            .await?
            .ok_or_else(|| {
                AppError::FailedPrecondition(anyhow::anyhow!("no active subscription"))
            })?;
        let credential = self.require_credential(tenant_id).await?;

        let old_plan = subscription.plan_type();
        if old_plan == new_plan {
            return Err(AppError::FailedPrecondition(anyhow::anyhow!(
                "subscription is already on plan {}",
                new_plan.as_str()
            )));
        }

        let cycle = subscription.cycle();
        let old_amount = old_plan.amount_for(cycle);
        let new_amount = new_plan.amount_for(cycle);

        let period_start = cycle.rewind(subscription.next_billing_date);
        let total_days = (subscription.next_billing_date - period_start).num_days();
        let remaining_days = (subscription.next_billing_date - today).num_days();
        let prorated = prorated_difference(remaining_days, total_days, old_amount, new_amount);

        self.store
            .apply_plan_change(
                subscription.subscription_id,
                new_plan,
                new_amount,
                new_plan.comment_limit(),
            )
            .await?;

        record_subscription_operation(&tenant_id.to_string(), "change_plan");
        tracing::info!(
            tenant_id = %tenant_id,
            subscription_id = %subscription.subscription_id,
            old_plan = old_plan.as_str(),
            new_plan = new_plan.as_str(),
            prorated_amount = prorated,
            "Plan changed"
        );

        let payment = if prorated > 0 {
            let description = format!(
                "proration {} -> {}",
                old_plan.as_str(),
                new_plan.as_str()
            );
            match self
                .charge_and_record(
                    tenant_id,
                    &credential.gateway_ref,
                    "plan",
                    prorated,
                    &description,
                    None,
                    "proration",
                )
                .await
            {
                Ok(payment) => {
                    if payment.status_enum() != PaymentStatus::Paid {
                        tracing::warn!(
                            tenant_id = %tenant_id,
                            payment_id = %payment.payment_id,
                            status = %payment.status,
                            "Proration charge not approved; will be reconciled"
                        );
                    }
                    Some(payment)
                }
                Err(e) => {
                    tracing::warn!(
                        tenant_id = %tenant_id,
                        error = %e,
                        "Proration charge failed; plan change kept"
                    );
                    None
                }
            }
        } else {
            None
        };

        let subscription = self
            .store
            .active_subscription(tenant_id)
            .await?
            .ok_or_else(|| {
                AppError::InternalError(anyhow::anyhow!("subscription vanished during plan change"))
            })?;

        Ok(PlanChange {
            subscription,
            prorated_amount: prorated,
            payment,
        })
    }

    /// Reactivate a cancelled or past-due subscription with an immediate
    /// charge, following the same abort semantics as `start`.
    pub async fn reactivate(
        &self,
        tenant_id: Uuid,
        today: NaiveDate,
    ) -> Result<StartedSubscription, AppError> {
        let _guard = self.locks.acquire(tenant_id).await;

        let subscription = self
            .store
            .latest_subscription(tenant_id)
            .await?
            .ok_or_else(|| {
                AppError::FailedPrecondition(anyhow::anyhow!("no subscription to reactivate"))
            })?;

        match subscription.status_enum() {
            SubscriptionStatus::Cancelled | SubscriptionStatus::PastDue => {}
            SubscriptionStatus::Active => {
                return Err(AppError::FailedPrecondition(anyhow::anyhow!(
                    "subscription is already active"
                )));
            }
            SubscriptionStatus::Expired => {
                return Err(AppError::FailedPrecondition(anyhow::anyhow!(
                    "subscription has expired; start a new one"
                )));
            }
        }

        let credential = self.require_credential(tenant_id).await?;
        let plan = subscription.plan_type();
        let cycle = subscription.cycle();
        let amount = plan.amount_for(cycle);
        let description = format!("{} {} reactivation", plan.as_str(), cycle.as_str());

        let payment = self
            .charge_and_record(
                tenant_id,
                &credential.gateway_ref,
                "re",
                amount,
                &description,
                None,
                "reactivation",
            )
            .await?;

        match payment.status_enum() {
            PaymentStatus::Paid => {}
            PaymentStatus::Pending => {
                return Err(AppError::GatewayTimeout(
                    "reactivation charge outcome unknown".to_string(),
                ));
            }
            _ => {
                return Err(AppError::BadGateway(format!(
                    "reactivation charge was not approved: {}",
                    payment.failure_reason.as_deref().unwrap_or("declined")
                )));
            }
        }

        let next_billing_date = cycle.advance(today);
        self.store
            .reactivate_subscription(subscription.subscription_id, next_billing_date)
            .await?;
        self.store
            .reset_usage(subscription.subscription_id)
            .await?;

        let subscription = self
            .store
            .active_subscription(tenant_id)
            .await?
            .ok_or_else(|| {
                AppError::InternalError(anyhow::anyhow!("subscription missing after reactivation"))
            })?;
        let schedule = self
            .store
            .schedule_for_subscription(subscription.subscription_id)
            .await?
            .ok_or_else(|| {
                AppError::InternalError(anyhow::anyhow!("schedule missing after reactivation"))
            })?;

        record_subscription_operation(&tenant_id.to_string(), "reactivate");
        tracing::info!(
            tenant_id = %tenant_id,
            subscription_id = %subscription.subscription_id,
            "Subscription reactivated"
        );

        Ok(StartedSubscription {
            subscription,
            schedule,
            payment,
        })
    }

    async fn require_credential(
        &self,
        tenant_id: Uuid,
    ) -> Result<BillingCredential, AppError> {
        self.store
            .active_credential(tenant_id)
            .await?
            .ok_or_else(|| {
                AppError::FailedPrecondition(anyhow::anyhow!(
                    "no active billing credential; register a card first"
                ))
            })
    }

    /// Charge the gateway and persist the attempt whatever happens.
    /// A timed-out charge is recorded PENDING: its true outcome is
    /// unknown until reconciliation resolves it.
    async fn charge_and_record(
        &self,
        tenant_id: Uuid,
        credential_ref: &str,
        ref_prefix: &str,
        amount: i64,
        description: &str,
        schedule_id: Option<Uuid>,
        kind: &str,
    ) -> Result<Payment, AppError> {
        let merchant_ref = format!("{}-{}", ref_prefix, Uuid::new_v4());

        let (transaction_id, status, failure_reason) = match self
            .gateway
            .charge(credential_ref, &merchant_ref, amount, description)
            .await
        {
            Ok(outcome) => (
                Some(outcome.transaction_id),
                PaymentStatus::from(outcome.status),
                None,
            ),
            Err(e) if e.is_timeout() => {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    merchant_ref = %merchant_ref,
                    "Charge timed out; outcome pending reconciliation"
                );
                (None, PaymentStatus::Pending, None)
            }
            Err(e) => (None, PaymentStatus::Failed, Some(e.to_string())),
        };

        let payment = self
            .store
            .insert_payment(&CreatePayment {
                tenant_id,
                merchant_ref,
                transaction_id,
                amount,
                status,
                schedule_id,
                failure_reason,
            })
            .await?;

        record_charge_attempt(&tenant_id.to_string(), kind, status.as_str());

        Ok(payment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upgrade_midway_charges_half_the_difference() {
        // 10000 -> 30000 with 15 of 30 days remaining charges exactly
        // half the 20000 difference.
        assert_eq!(prorated_difference(15, 30, 10_000, 30_000), 10_000);
    }

    #[test]
    fn proration_uses_floor_division() {
        assert_eq!(prorated_difference(15, 31, 9_900, 29_900), 9_677);
    }

    #[test]
    fn downgrade_is_non_positive() {
        assert!(prorated_difference(15, 30, 30_000, 10_000) <= 0);
    }

    #[test]
    fn non_positive_day_counts_charge_nothing() {
        assert_eq!(prorated_difference(0, 30, 10_000, 30_000), 0);
        assert_eq!(prorated_difference(-3, 30, 10_000, 30_000), 0);
        assert_eq!(prorated_difference(15, 0, 10_000, 30_000), 0);
        assert_eq!(prorated_difference(15, -1, 10_000, 30_000), 0);
    }

    #[test]
    fn remaining_days_clamp_to_full_cycle() {
        assert_eq!(prorated_difference(45, 30, 10_000, 30_000), 20_000);
    }
}
