//! Recurring charge scheduler.
//!
//! One sweep selects every schedule due on or before the given date and
//! processes each independently: a tenant's failure never stops the
//! rest of the batch, and there is no transaction spanning the sweep.
//! The charge cursor advances one cycle from the *previous* scheduled
//! date, not from the sweep time, so late sweeps do not drift the
//! billing anchor. The same sweep also expires past-due subscriptions
//! that have exhausted the grace window.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, NaiveDate, Utc};
use service_core::error::AppError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::{BillingSchedule, CreatePayment, PaymentStatus};

use super::gateway::PaymentGateway;
use super::metrics::{record_charge_attempt, record_sweep_run, record_sweep_schedule};
use super::store::BillingStore;

/// Summary of one sweep run.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SweepReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub expired: usize,
}

pub struct ChargeScheduler {
    store: Arc<dyn BillingStore>,
    gateway: Arc<dyn PaymentGateway>,
    grace_days: u64,
}

impl ChargeScheduler {
    pub fn new(
        store: Arc<dyn BillingStore>,
        gateway: Arc<dyn PaymentGateway>,
        grace_days: u64,
    ) -> Self {
        Self {
            store,
            gateway,
            grace_days,
        }
    }

    /// Run one sweep: charge all due schedules, then expire past-due
    /// subscriptions beyond the grace window.
    pub async fn run_due_charges(&self, today: NaiveDate) -> Result<SweepReport, AppError> {
        let due = self.store.due_schedules(today).await?;
        let mut report = SweepReport {
            processed: due.len(),
            ..Default::default()
        };

        tracing::info!(due = due.len(), date = %today, "Billing sweep started");

        for schedule in due {
            match self.charge_schedule(&schedule, today).await {
                Ok(Some(status)) => {
                    if status == PaymentStatus::Paid {
                        report.succeeded += 1;
                        record_sweep_schedule("succeeded");
                    } else {
                        report.failed += 1;
                        record_sweep_schedule("failed");
                    }
                }
                Ok(None) => {
                    report.skipped += 1;
                    record_sweep_schedule("skipped");
                }
                Err(e) => {
                    // Isolated: log and keep going with the other tenants.
                    tracing::error!(
                        schedule_id = %schedule.schedule_id,
                        tenant_id = %schedule.tenant_id,
                        error = %e,
                        "Failed to process due schedule"
                    );
                    report.failed += 1;
                    record_sweep_schedule("failed");
                }
            }
        }

        report.expired = self.expire_lapsed(today).await;

        record_sweep_run("completed");
        tracing::info!(
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            expired = report.expired,
            "Billing sweep completed"
        );

        Ok(report)
    }

    /// Charge one due schedule. Returns the recorded payment status, or
    /// None when the schedule was skipped for lack of a credential.
    async fn charge_schedule(
        &self,
        schedule: &BillingSchedule,
        today: NaiveDate,
    ) -> Result<Option<PaymentStatus>, AppError> {
        let Some(credential) = self.store.active_credential(schedule.tenant_id).await? else {
            tracing::error!(
                schedule_id = %schedule.schedule_id,
                tenant_id = %schedule.tenant_id,
                "No active credential for due schedule; skipping"
            );
            return Ok(None);
        };

        let merchant_ref = format!("sched-{}-{}", schedule.schedule_id, Uuid::new_v4());
        let description = format!(
            "{} {} renewal",
            schedule.plan, schedule.billing_cycle
        );

        let (transaction_id, status, failure_reason) = match self
            .gateway
            .charge(
                &credential.gateway_ref,
                &merchant_ref,
                schedule.amount,
                &description,
            )
            .await
        {
            Ok(outcome) => (
                Some(outcome.transaction_id),
                PaymentStatus::from(outcome.status),
                None,
            ),
            Err(e) if e.is_timeout() => {
                tracing::warn!(
                    schedule_id = %schedule.schedule_id,
                    merchant_ref = %merchant_ref,
                    "Renewal charge timed out; outcome pending reconciliation"
                );
                (None, PaymentStatus::Pending, None)
            }
            Err(e) => (None, PaymentStatus::Failed, Some(e.to_string())),
        };

        self.store
            .insert_payment(&CreatePayment {
                tenant_id: schedule.tenant_id,
                merchant_ref,
                transaction_id,
                amount: schedule.amount,
                status,
                schedule_id: Some(schedule.schedule_id),
                failure_reason,
            })
            .await?;

        record_charge_attempt(
            &schedule.tenant_id.to_string(),
            "recurring",
            status.as_str(),
        );

        // Advance from the previous scheduled date regardless of the
        // payment outcome; the reconciler owns failure policy.
        let next = schedule.cycle().advance(schedule.next_charge_date);
        self.store
            .advance_schedule(schedule.schedule_id, next, today)
            .await?;

        tracing::info!(
            schedule_id = %schedule.schedule_id,
            tenant_id = %schedule.tenant_id,
            status = status.as_str(),
            next_charge_date = %next,
            "Due schedule charged"
        );

        Ok(Some(status))
    }

    /// Expire past-due subscriptions whose renewal has been owed for
    /// longer than the grace window. Failures stay per-subscription.
    async fn expire_lapsed(&self, today: NaiveDate) -> usize {
        let cutoff = match today.checked_sub_days(Days::new(self.grace_days)) {
            Some(cutoff) => cutoff,
            None => return 0,
        };

        let lapsed = match self.store.past_due_subscriptions(cutoff).await {
            Ok(lapsed) => lapsed,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list past-due subscriptions");
                return 0;
            }
        };

        let mut expired = 0;
        for subscription in lapsed {
            match self
                .store
                .expire_subscription(subscription.subscription_id, today)
                .await
            {
                Ok(()) => {
                    expired += 1;
                    tracing::info!(
                        subscription_id = %subscription.subscription_id,
                        tenant_id = %subscription.tenant_id,
                        "Subscription expired after grace period"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        subscription_id = %subscription.subscription_id,
                        error = %e,
                        "Failed to expire subscription"
                    );
                }
            }
        }
        expired
    }

    /// Periodic sweep loop. Runs until the token is cancelled.
    pub async fn run_loop(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(interval_secs = interval.as_secs(), "Billing sweep loop started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Billing sweep loop stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let today = Utc::now().date_naive();
                    if let Err(e) = self.run_due_charges(today).await {
                        record_sweep_run("failed");
                        tracing::error!(error = %e, "Billing sweep failed");
                    }
                }
            }
        }
    }
}
