//! Storage abstraction for billing state.
//!
//! Operations that must hold across rows (subscription + schedule
//! creation, plan changes, suspension, reactivation) are single store
//! calls so the PostgreSQL implementation can run each inside one
//! transaction. `Database` is the production implementation;
//! `MemoryStore` backs tests and storage-less dev runs.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::{
    BillingCredential, BillingSchedule, CreateCredential, CreatePayment, CreateSchedule,
    CreateSubscription, CredentialStatus, FinalizePayment, ListPaymentsFilter, Payment, PlanType,
    Subscription,
};

#[async_trait]
pub trait BillingStore: Send + Sync {
    // -------------------------------------------------------------------
    // Credentials
    // -------------------------------------------------------------------

    /// Persist a gateway-issued credential as ACTIVE. Fails with a
    /// conflict if the tenant already has an active credential.
    async fn insert_credential(
        &self,
        input: &CreateCredential,
    ) -> Result<BillingCredential, AppError>;

    async fn active_credential(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<BillingCredential>, AppError>;

    /// Soft-delete: move the credential out of ACTIVE and stamp the
    /// deletion time. Rows are never removed.
    async fn retire_credential(
        &self,
        credential_id: Uuid,
        status: CredentialStatus,
    ) -> Result<(), AppError>;

    // -------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------

    /// Create an ACTIVE subscription and its SCHEDULED billing schedule
    /// in one unit of work.
    async fn insert_subscription_with_schedule(
        &self,
        subscription: &CreateSubscription,
        schedule: &CreateSchedule,
    ) -> Result<(Subscription, BillingSchedule), AppError>;

    async fn active_subscription(&self, tenant_id: Uuid)
        -> Result<Option<Subscription>, AppError>;

    /// Most recently created subscription regardless of status.
    async fn latest_subscription(&self, tenant_id: Uuid)
        -> Result<Option<Subscription>, AppError>;

    /// Cancel the subscription and its schedule in one unit of work.
    async fn cancel_subscription(
        &self,
        subscription_id: Uuid,
        end_date: NaiveDate,
    ) -> Result<(), AppError>;

    /// Move the subscription to PAST_DUE and its schedule to SUSPENDED.
    async fn suspend_subscription(&self, subscription_id: Uuid) -> Result<(), AppError>;

    /// Move the subscription to EXPIRED and its schedule to COMPLETED.
    async fn expire_subscription(
        &self,
        subscription_id: Uuid,
        end_date: NaiveDate,
    ) -> Result<(), AppError>;

    /// Return the subscription to ACTIVE with a fresh billing anchor and
    /// put its schedule back to SCHEDULED at the same date.
    async fn reactivate_subscription(
        &self,
        subscription_id: Uuid,
        next_billing_date: NaiveDate,
    ) -> Result<(), AppError>;

    /// Swap the plan on the subscription and its schedule in place.
    async fn apply_plan_change(
        &self,
        subscription_id: Uuid,
        plan: PlanType,
        amount: i64,
        comment_limit: i64,
    ) -> Result<(), AppError>;

    /// Zero the usage counter at the start of a new paid period.
    async fn reset_usage(&self, subscription_id: Uuid) -> Result<(), AppError>;

    /// Bump the tenant's monthly comment count; returns the new count.
    async fn increment_usage(&self, tenant_id: Uuid) -> Result<i64, AppError>;

    /// PAST_DUE subscriptions whose next billing date is on or before
    /// `cutoff` (i.e. past the grace window).
    async fn past_due_subscriptions(
        &self,
        cutoff: NaiveDate,
    ) -> Result<Vec<Subscription>, AppError>;

    // -------------------------------------------------------------------
    // Schedules
    // -------------------------------------------------------------------

    async fn schedule_for_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<BillingSchedule>, AppError>;

    /// SCHEDULED schedules with `next_charge_date` on or before the
    /// given date.
    async fn due_schedules(
        &self,
        on_or_before: NaiveDate,
    ) -> Result<Vec<BillingSchedule>, AppError>;

    /// Advance the charge cursor after an attempt, whatever its outcome.
    async fn advance_schedule(
        &self,
        schedule_id: Uuid,
        next_charge_date: NaiveDate,
        last_charge_date: NaiveDate,
    ) -> Result<(), AppError>;

    /// Stamp the last successful charge date (reconciler PAID cascade).
    async fn stamp_schedule_charged(
        &self,
        schedule_id: Uuid,
        charged_on: NaiveDate,
    ) -> Result<(), AppError>;

    // -------------------------------------------------------------------
    // Payments
    // -------------------------------------------------------------------

    /// Record a charge attempt. The merchant reference is unique; a
    /// duplicate insert is a conflict.
    async fn insert_payment(&self, input: &CreatePayment) -> Result<Payment, AppError>;

    async fn payment_by_merchant_ref(
        &self,
        merchant_ref: &str,
    ) -> Result<Option<Payment>, AppError>;

    async fn payment_by_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Payment>, AppError>;

    /// Apply the terminal update from reconciliation.
    async fn finalize_payment(
        &self,
        payment_id: Uuid,
        update: &FinalizePayment,
    ) -> Result<Payment, AppError>;

    /// FAILED payments for the tenant attempted at or after `since`.
    async fn failed_payment_count_since(
        &self,
        tenant_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, AppError>;

    /// Payment history, newest first.
    async fn list_payments(
        &self,
        tenant_id: Uuid,
        filter: &ListPaymentsFilter,
    ) -> Result<Vec<Payment>, AppError>;
}
