//! In-memory implementation of `BillingStore`.
//!
//! Backs the integration test harness and dev runs without a database.
//! Enforces the same uniqueness invariants the PostgreSQL schema
//! enforces with partial unique indexes.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::{
    BillingCredential, BillingSchedule, CreateCredential, CreatePayment, CreateSchedule,
    CreateSubscription, CredentialStatus, FinalizePayment, ListPaymentsFilter, Payment,
    PaymentStatus, PlanType, ScheduleStatus, Subscription, SubscriptionStatus,
};

use super::store::BillingStore;

#[derive(Default)]
struct Inner {
    credentials: HashMap<Uuid, BillingCredential>,
    subscriptions: HashMap<Uuid, Subscription>,
    schedules: HashMap<Uuid, BillingSchedule>,
    payments: HashMap<Uuid, Payment>,
}

/// In-memory billing store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(what: &str, id: Uuid) -> AppError {
    AppError::NotFound(anyhow::anyhow!("{} {} not found", what, id))
}

#[async_trait]
impl BillingStore for MemoryStore {
    async fn insert_credential(
        &self,
        input: &CreateCredential,
    ) -> Result<BillingCredential, AppError> {
        let mut inner = self.inner.lock().unwrap();

        let already_active = inner.credentials.values().any(|c| {
            c.tenant_id == input.tenant_id
                && CredentialStatus::from_string(&c.status) == CredentialStatus::Active
        });
        if already_active {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "tenant {} already has an active credential",
                input.tenant_id
            )));
        }

        let credential = BillingCredential {
            credential_id: Uuid::new_v4(),
            tenant_id: input.tenant_id,
            gateway_ref: input.gateway_ref.clone(),
            card_brand: input.card_brand.clone(),
            card_last4: input.card_last4.clone(),
            status: CredentialStatus::Active.as_str().to_string(),
            created_utc: Utc::now(),
            deleted_utc: None,
        };
        inner
            .credentials
            .insert(credential.credential_id, credential.clone());
        Ok(credential)
    }

    async fn active_credential(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<BillingCredential>, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .credentials
            .values()
            .find(|c| {
                c.tenant_id == tenant_id
                    && CredentialStatus::from_string(&c.status) == CredentialStatus::Active
            })
            .cloned())
    }

    async fn retire_credential(
        &self,
        credential_id: Uuid,
        status: CredentialStatus,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        let credential = inner
            .credentials
            .get_mut(&credential_id)
            .ok_or_else(|| not_found("credential", credential_id))?;
        credential.status = status.as_str().to_string();
        credential.deleted_utc = Some(Utc::now());
        Ok(())
    }

    async fn insert_subscription_with_schedule(
        &self,
        subscription: &CreateSubscription,
        schedule: &CreateSchedule,
    ) -> Result<(Subscription, BillingSchedule), AppError> {
        let mut inner = self.inner.lock().unwrap();

        let already_active = inner.subscriptions.values().any(|s| {
            s.tenant_id == subscription.tenant_id
                && SubscriptionStatus::from_string(&s.status) == SubscriptionStatus::Active
        });
        if already_active {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "tenant {} already has an active subscription",
                subscription.tenant_id
            )));
        }

        let now = Utc::now();
        let sub = Subscription {
            subscription_id: Uuid::new_v4(),
            tenant_id: subscription.tenant_id,
            plan: subscription.plan.as_str().to_string(),
            status: SubscriptionStatus::Active.as_str().to_string(),
            billing_cycle: subscription.billing_cycle.as_str().to_string(),
            start_date: subscription.start_date,
            end_date: None,
            next_billing_date: subscription.next_billing_date,
            auto_renew: true,
            comment_count: 0,
            comment_limit: subscription.comment_limit,
            created_utc: now,
            updated_utc: now,
        };
        let sched = BillingSchedule {
            schedule_id: Uuid::new_v4(),
            tenant_id: schedule.tenant_id,
            subscription_id: sub.subscription_id,
            credential_id: schedule.credential_id,
            plan: schedule.plan.as_str().to_string(),
            amount: schedule.amount,
            billing_cycle: schedule.billing_cycle.as_str().to_string(),
            next_charge_date: schedule.next_charge_date,
            last_charge_date: None,
            status: ScheduleStatus::Scheduled.as_str().to_string(),
            created_utc: now,
            updated_utc: now,
        };

        inner.subscriptions.insert(sub.subscription_id, sub.clone());
        inner.schedules.insert(sched.schedule_id, sched.clone());
        Ok((sub, sched))
    }

    async fn active_subscription(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .subscriptions
            .values()
            .find(|s| {
                s.tenant_id == tenant_id
                    && SubscriptionStatus::from_string(&s.status) == SubscriptionStatus::Active
            })
            .cloned())
    }

    async fn latest_subscription(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .subscriptions
            .values()
            .filter(|s| s.tenant_id == tenant_id)
            .max_by_key(|s| s.created_utc)
            .cloned())
    }

    async fn cancel_subscription(
        &self,
        subscription_id: Uuid,
        end_date: NaiveDate,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        let sub = inner
            .subscriptions
            .get_mut(&subscription_id)
            .ok_or_else(|| not_found("subscription", subscription_id))?;
        sub.status = SubscriptionStatus::Cancelled.as_str().to_string();
        sub.end_date = Some(end_date);
        sub.updated_utc = Utc::now();

        for sched in inner
            .schedules
            .values_mut()
            .filter(|s| s.subscription_id == subscription_id)
        {
            sched.status = ScheduleStatus::Canceled.as_str().to_string();
            sched.updated_utc = Utc::now();
        }
        Ok(())
    }

    async fn suspend_subscription(&self, subscription_id: Uuid) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        let sub = inner
            .subscriptions
            .get_mut(&subscription_id)
            .ok_or_else(|| not_found("subscription", subscription_id))?;
        sub.status = SubscriptionStatus::PastDue.as_str().to_string();
        sub.updated_utc = Utc::now();

        for sched in inner
            .schedules
            .values_mut()
            .filter(|s| s.subscription_id == subscription_id)
        {
            sched.status = ScheduleStatus::Suspended.as_str().to_string();
            sched.updated_utc = Utc::now();
        }
        Ok(())
    }

    async fn expire_subscription(
        &self,
        subscription_id: Uuid,
        end_date: NaiveDate,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        let sub = inner
            .subscriptions
            .get_mut(&subscription_id)
            .ok_or_else(|| not_found("subscription", subscription_id))?;
        sub.status = SubscriptionStatus::Expired.as_str().to_string();
        sub.end_date = Some(end_date);
        sub.updated_utc = Utc::now();

        for sched in inner
            .schedules
            .values_mut()
            .filter(|s| s.subscription_id == subscription_id)
        {
            sched.status = ScheduleStatus::Completed.as_str().to_string();
            sched.updated_utc = Utc::now();
        }
        Ok(())
    }

    async fn reactivate_subscription(
        &self,
        subscription_id: Uuid,
        next_billing_date: NaiveDate,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        let sub = inner
            .subscriptions
            .get_mut(&subscription_id)
            .ok_or_else(|| not_found("subscription", subscription_id))?;
        sub.status = SubscriptionStatus::Active.as_str().to_string();
        sub.end_date = None;
        sub.next_billing_date = next_billing_date;
        sub.updated_utc = Utc::now();

        for sched in inner
            .schedules
            .values_mut()
            .filter(|s| s.subscription_id == subscription_id)
        {
            sched.status = ScheduleStatus::Scheduled.as_str().to_string();
            sched.next_charge_date = next_billing_date;
            sched.updated_utc = Utc::now();
        }
        Ok(())
    }

    async fn apply_plan_change(
        &self,
        subscription_id: Uuid,
        plan: PlanType,
        amount: i64,
        comment_limit: i64,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        let sub = inner
            .subscriptions
            .get_mut(&subscription_id)
            .ok_or_else(|| not_found("subscription", subscription_id))?;
        sub.plan = plan.as_str().to_string();
        sub.comment_limit = comment_limit;
        sub.updated_utc = Utc::now();

        for sched in inner
            .schedules
            .values_mut()
            .filter(|s| s.subscription_id == subscription_id)
        {
            sched.plan = plan.as_str().to_string();
            sched.amount = amount;
            sched.updated_utc = Utc::now();
        }
        Ok(())
    }

    async fn reset_usage(&self, subscription_id: Uuid) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        let sub = inner
            .subscriptions
            .get_mut(&subscription_id)
            .ok_or_else(|| not_found("subscription", subscription_id))?;
        sub.comment_count = 0;
        sub.updated_utc = Utc::now();
        Ok(())
    }

    async fn increment_usage(&self, tenant_id: Uuid) -> Result<i64, AppError> {
        let mut inner = self.inner.lock().unwrap();
        let sub = inner
            .subscriptions
            .values_mut()
            .find(|s| {
                s.tenant_id == tenant_id
                    && SubscriptionStatus::from_string(&s.status) == SubscriptionStatus::Active
            })
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "no active subscription for tenant {}",
                    tenant_id
                ))
            })?;
        sub.comment_count += 1;
        sub.updated_utc = Utc::now();
        Ok(sub.comment_count)
    }

    async fn past_due_subscriptions(
        &self,
        cutoff: NaiveDate,
    ) -> Result<Vec<Subscription>, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .subscriptions
            .values()
            .filter(|s| {
                SubscriptionStatus::from_string(&s.status) == SubscriptionStatus::PastDue
                    && s.next_billing_date <= cutoff
            })
            .cloned()
            .collect())
    }

    async fn schedule_for_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<BillingSchedule>, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .schedules
            .values()
            .find(|s| s.subscription_id == subscription_id)
            .cloned())
    }

    async fn due_schedules(
        &self,
        on_or_before: NaiveDate,
    ) -> Result<Vec<BillingSchedule>, AppError> {
        let inner = self.inner.lock().unwrap();
        let mut due: Vec<BillingSchedule> = inner
            .schedules
            .values()
            .filter(|s| {
                ScheduleStatus::from_string(&s.status) == ScheduleStatus::Scheduled
                    && s.next_charge_date <= on_or_before
            })
            .cloned()
            .collect();
        due.sort_by_key(|s| s.next_charge_date);
        Ok(due)
    }

    async fn advance_schedule(
        &self,
        schedule_id: Uuid,
        next_charge_date: NaiveDate,
        last_charge_date: NaiveDate,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        let sched = inner
            .schedules
            .get_mut(&schedule_id)
            .ok_or_else(|| not_found("schedule", schedule_id))?;
        sched.next_charge_date = next_charge_date;
        sched.last_charge_date = Some(last_charge_date);
        sched.updated_utc = Utc::now();
        Ok(())
    }

    async fn stamp_schedule_charged(
        &self,
        schedule_id: Uuid,
        charged_on: NaiveDate,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        let sched = inner
            .schedules
            .get_mut(&schedule_id)
            .ok_or_else(|| not_found("schedule", schedule_id))?;
        sched.last_charge_date = Some(charged_on);
        sched.updated_utc = Utc::now();
        Ok(())
    }

    async fn insert_payment(&self, input: &CreatePayment) -> Result<Payment, AppError> {
        let mut inner = self.inner.lock().unwrap();

        if inner
            .payments
            .values()
            .any(|p| p.merchant_ref == input.merchant_ref)
        {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "payment with merchant reference {} already exists",
                input.merchant_ref
            )));
        }

        let now = Utc::now();
        let payment = Payment {
            payment_id: Uuid::new_v4(),
            tenant_id: input.tenant_id,
            merchant_ref: input.merchant_ref.clone(),
            transaction_id: input.transaction_id.clone(),
            amount: input.amount,
            status: input.status.as_str().to_string(),
            schedule_id: input.schedule_id,
            attempted_utc: now,
            paid_utc: (input.status == PaymentStatus::Paid).then_some(now),
            failure_reason: input.failure_reason.clone(),
        };
        inner.payments.insert(payment.payment_id, payment.clone());
        Ok(payment)
    }

    async fn payment_by_merchant_ref(
        &self,
        merchant_ref: &str,
    ) -> Result<Option<Payment>, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .payments
            .values()
            .find(|p| p.merchant_ref == merchant_ref)
            .cloned())
    }

    async fn payment_by_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Payment>, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .payments
            .values()
            .find(|p| p.transaction_id.as_deref() == Some(transaction_id))
            .cloned())
    }

    async fn finalize_payment(
        &self,
        payment_id: Uuid,
        update: &FinalizePayment,
    ) -> Result<Payment, AppError> {
        let mut inner = self.inner.lock().unwrap();
        let payment = inner
            .payments
            .get_mut(&payment_id)
            .ok_or_else(|| not_found("payment", payment_id))?;

        if let Some(tx) = &update.transaction_id {
            payment.transaction_id = Some(tx.clone());
        }
        payment.status = update.status.as_str().to_string();
        if update.status == PaymentStatus::Paid {
            payment.paid_utc = update.paid_utc.or_else(|| Some(Utc::now()));
        }
        if update.status == PaymentStatus::Failed {
            payment.failure_reason = update.failure_reason.clone();
        }
        Ok(payment.clone())
    }

    async fn failed_payment_count_since(
        &self,
        tenant_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .payments
            .values()
            .filter(|p| {
                p.tenant_id == tenant_id
                    && PaymentStatus::from_string(&p.status) == PaymentStatus::Failed
                    && p.attempted_utc >= since
            })
            .count() as i64)
    }

    async fn list_payments(
        &self,
        tenant_id: Uuid,
        filter: &ListPaymentsFilter,
    ) -> Result<Vec<Payment>, AppError> {
        let inner = self.inner.lock().unwrap();
        let mut payments: Vec<Payment> = inner
            .payments
            .values()
            .filter(|p| p.tenant_id == tenant_id)
            .filter(|p| match filter.status {
                Some(status) => PaymentStatus::from_string(&p.status) == status,
                None => true,
            })
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.attempted_utc.cmp(&a.attempted_utc));
        Ok(payments
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.clamp(1, 100) as usize)
            .collect())
    }
}
