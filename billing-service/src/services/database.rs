//! PostgreSQL-backed billing store.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::{
    BillingCredential, BillingSchedule, CreateCredential, CreatePayment, CreateSchedule,
    CreateSubscription, CredentialStatus, FinalizePayment, ListPaymentsFilter, Payment,
    PaymentStatus, PlanType, ScheduleStatus, Subscription, SubscriptionStatus,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::BillingStore;

const CREDENTIAL_COLUMNS: &str =
    "credential_id, tenant_id, gateway_ref, card_brand, card_last4, status, created_utc, deleted_utc";
const SUBSCRIPTION_COLUMNS: &str = "subscription_id, tenant_id, plan, status, billing_cycle, start_date, end_date, next_billing_date, auto_renew, comment_count, comment_limit, created_utc, updated_utc";
const SCHEDULE_COLUMNS: &str = "schedule_id, tenant_id, subscription_id, credential_id, plan, amount, billing_cycle, next_charge_date, last_charge_date, status, created_utc, updated_utc";
const PAYMENT_COLUMNS: &str = "payment_id, tenant_id, merchant_ref, transaction_id, amount, status, schedule_id, attempted_utc, paid_utc, failure_reason";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "billing-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

fn db_err(context: &str) -> impl FnOnce(sqlx::Error) -> AppError + '_ {
    move |e| AppError::DatabaseError(anyhow::anyhow!("{}: {}", context, e))
}

#[async_trait]
impl BillingStore for Database {
    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id))]
    async fn insert_credential(
        &self,
        input: &CreateCredential,
    ) -> Result<BillingCredential, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_credential"])
            .start_timer();

        let credential = sqlx::query_as::<_, BillingCredential>(&format!(
            r#"
            INSERT INTO billing_credentials (credential_id, tenant_id, gateway_ref, card_brand, card_last4, status)
            VALUES ($1, $2, $3, $4, $5, 'active')
            RETURNING {}
            "#,
            CREDENTIAL_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(input.tenant_id)
        .bind(&input.gateway_ref)
        .bind(&input.card_brand)
        .bind(&input.card_last4)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => AppError::Conflict(
                anyhow::anyhow!("tenant {} already has an active credential", input.tenant_id),
            ),
            other => AppError::DatabaseError(anyhow::anyhow!(
                "Failed to insert credential: {}",
                other
            )),
        })?;

        timer.observe_duration();
        info!(credential_id = %credential.credential_id, "Credential stored");

        Ok(credential)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn active_credential(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<BillingCredential>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["active_credential"])
            .start_timer();

        let credential = sqlx::query_as::<_, BillingCredential>(&format!(
            r#"
            SELECT {}
            FROM billing_credentials
            WHERE tenant_id = $1 AND status = 'active'
            "#,
            CREDENTIAL_COLUMNS
        ))
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to get active credential"))?;

        timer.observe_duration();

        Ok(credential)
    }

    #[instrument(skip(self), fields(credential_id = %credential_id))]
    async fn retire_credential(
        &self,
        credential_id: Uuid,
        status: CredentialStatus,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["retire_credential"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE billing_credentials
            SET status = $2, deleted_utc = now()
            WHERE credential_id = $1
            "#,
        )
        .bind(credential_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err("Failed to retire credential"))?;

        timer.observe_duration();
        info!(credential_id = %credential_id, status = status.as_str(), "Credential retired");

        Ok(())
    }

    #[instrument(skip(self, subscription, schedule), fields(tenant_id = %subscription.tenant_id))]
    async fn insert_subscription_with_schedule(
        &self,
        subscription: &CreateSubscription,
        schedule: &CreateSchedule,
    ) -> Result<(Subscription, BillingSchedule), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_subscription_with_schedule"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_err("Failed to begin transaction"))?;

        let sub = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            INSERT INTO subscriptions (subscription_id, tenant_id, plan, status, billing_cycle, start_date, next_billing_date, comment_limit)
            VALUES ($1, $2, $3, 'active', $4, $5, $6, $7)
            RETURNING {}
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(subscription.tenant_id)
        .bind(subscription.plan.as_str())
        .bind(subscription.billing_cycle.as_str())
        .bind(subscription.start_date)
        .bind(subscription.next_billing_date)
        .bind(subscription.comment_limit)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => AppError::Conflict(
                anyhow::anyhow!(
                    "tenant {} already has an active subscription",
                    subscription.tenant_id
                ),
            ),
            other => AppError::DatabaseError(anyhow::anyhow!(
                "Failed to insert subscription: {}",
                other
            )),
        })?;

        let sched = sqlx::query_as::<_, BillingSchedule>(&format!(
            r#"
            INSERT INTO billing_schedules (schedule_id, tenant_id, subscription_id, credential_id, plan, amount, billing_cycle, next_charge_date, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'scheduled')
            RETURNING {}
            "#,
            SCHEDULE_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(schedule.tenant_id)
        .bind(sub.subscription_id)
        .bind(schedule.credential_id)
        .bind(schedule.plan.as_str())
        .bind(schedule.amount)
        .bind(schedule.billing_cycle.as_str())
        .bind(schedule.next_charge_date)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err("Failed to insert schedule"))?;

        tx.commit()
            .await
            .map_err(db_err("Failed to commit subscription"))?;

        timer.observe_duration();
        info!(subscription_id = %sub.subscription_id, "Subscription created");

        Ok((sub, sched))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn active_subscription(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["active_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            SELECT {}
            FROM subscriptions
            WHERE tenant_id = $1 AND status = 'active'
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to get active subscription"))?;

        timer.observe_duration();

        Ok(subscription)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn latest_subscription(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["latest_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            SELECT {}
            FROM subscriptions
            WHERE tenant_id = $1
            ORDER BY created_utc DESC
            LIMIT 1
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to get latest subscription"))?;

        timer.observe_duration();

        Ok(subscription)
    }

    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    async fn cancel_subscription(
        &self,
        subscription_id: Uuid,
        end_date: NaiveDate,
    ) -> Result<(), AppError> {
        self.transition_subscription(
            subscription_id,
            SubscriptionStatus::Cancelled,
            Some(end_date),
            ScheduleStatus::Canceled,
            None,
            "cancel_subscription",
        )
        .await
    }

    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    async fn suspend_subscription(&self, subscription_id: Uuid) -> Result<(), AppError> {
        self.transition_subscription(
            subscription_id,
            SubscriptionStatus::PastDue,
            None,
            ScheduleStatus::Suspended,
            None,
            "suspend_subscription",
        )
        .await
    }

    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    async fn expire_subscription(
        &self,
        subscription_id: Uuid,
        end_date: NaiveDate,
    ) -> Result<(), AppError> {
        self.transition_subscription(
            subscription_id,
            SubscriptionStatus::Expired,
            Some(end_date),
            ScheduleStatus::Completed,
            None,
            "expire_subscription",
        )
        .await
    }

    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    async fn reactivate_subscription(
        &self,
        subscription_id: Uuid,
        next_billing_date: NaiveDate,
    ) -> Result<(), AppError> {
        self.transition_subscription(
            subscription_id,
            SubscriptionStatus::Active,
            None,
            ScheduleStatus::Scheduled,
            Some(next_billing_date),
            "reactivate_subscription",
        )
        .await
    }

    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    async fn apply_plan_change(
        &self,
        subscription_id: Uuid,
        plan: PlanType,
        amount: i64,
        comment_limit: i64,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["apply_plan_change"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_err("Failed to begin transaction"))?;

        sqlx::query(
            r#"
            UPDATE subscriptions
            SET plan = $2, comment_limit = $3, updated_utc = now()
            WHERE subscription_id = $1
            "#,
        )
        .bind(subscription_id)
        .bind(plan.as_str())
        .bind(comment_limit)
        .execute(&mut *tx)
        .await
        .map_err(db_err("Failed to update subscription plan"))?;

        sqlx::query(
            r#"
            UPDATE billing_schedules
            SET plan = $2, amount = $3, updated_utc = now()
            WHERE subscription_id = $1
            "#,
        )
        .bind(subscription_id)
        .bind(plan.as_str())
        .bind(amount)
        .execute(&mut *tx)
        .await
        .map_err(db_err("Failed to update schedule plan"))?;

        tx.commit()
            .await
            .map_err(db_err("Failed to commit plan change"))?;

        timer.observe_duration();
        info!(subscription_id = %subscription_id, plan = plan.as_str(), "Plan changed");

        Ok(())
    }

    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    async fn reset_usage(&self, subscription_id: Uuid) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["reset_usage"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE subscriptions
            SET comment_count = 0, updated_utc = now()
            WHERE subscription_id = $1
            "#,
        )
        .bind(subscription_id)
        .execute(&self.pool)
        .await
        .map_err(db_err("Failed to reset usage"))?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn increment_usage(&self, tenant_id: Uuid) -> Result<i64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["increment_usage"])
            .start_timer();

        let count: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE subscriptions
            SET comment_count = comment_count + 1, updated_utc = now()
            WHERE tenant_id = $1 AND status = 'active'
            RETURNING comment_count
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to increment usage"))?;

        timer.observe_duration();

        count.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "no active subscription for tenant {}",
                tenant_id
            ))
        })
    }

    #[instrument(skip(self))]
    async fn past_due_subscriptions(
        &self,
        cutoff: NaiveDate,
    ) -> Result<Vec<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["past_due_subscriptions"])
            .start_timer();

        let subscriptions = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            SELECT {}
            FROM subscriptions
            WHERE status = 'past_due' AND next_billing_date <= $1
            ORDER BY next_billing_date
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to list past-due subscriptions"))?;

        timer.observe_duration();

        Ok(subscriptions)
    }

    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    async fn schedule_for_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<BillingSchedule>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["schedule_for_subscription"])
            .start_timer();

        let schedule = sqlx::query_as::<_, BillingSchedule>(&format!(
            r#"
            SELECT {}
            FROM billing_schedules
            WHERE subscription_id = $1
            ORDER BY created_utc DESC
            LIMIT 1
            "#,
            SCHEDULE_COLUMNS
        ))
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to get schedule"))?;

        timer.observe_duration();

        Ok(schedule)
    }

    #[instrument(skip(self))]
    async fn due_schedules(
        &self,
        on_or_before: NaiveDate,
    ) -> Result<Vec<BillingSchedule>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["due_schedules"])
            .start_timer();

        let schedules = sqlx::query_as::<_, BillingSchedule>(&format!(
            r#"
            SELECT {}
            FROM billing_schedules
            WHERE status = 'scheduled' AND next_charge_date <= $1
            ORDER BY next_charge_date
            "#,
            SCHEDULE_COLUMNS
        ))
        .bind(on_or_before)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to list due schedules"))?;

        timer.observe_duration();

        Ok(schedules)
    }

    #[instrument(skip(self), fields(schedule_id = %schedule_id))]
    async fn advance_schedule(
        &self,
        schedule_id: Uuid,
        next_charge_date: NaiveDate,
        last_charge_date: NaiveDate,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["advance_schedule"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE billing_schedules
            SET next_charge_date = $2, last_charge_date = $3, updated_utc = now()
            WHERE schedule_id = $1
            "#,
        )
        .bind(schedule_id)
        .bind(next_charge_date)
        .bind(last_charge_date)
        .execute(&self.pool)
        .await
        .map_err(db_err("Failed to advance schedule"))?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self), fields(schedule_id = %schedule_id))]
    async fn stamp_schedule_charged(
        &self,
        schedule_id: Uuid,
        charged_on: NaiveDate,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["stamp_schedule_charged"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE billing_schedules
            SET last_charge_date = $2, updated_utc = now()
            WHERE schedule_id = $1
            "#,
        )
        .bind(schedule_id)
        .bind(charged_on)
        .execute(&self.pool)
        .await
        .map_err(db_err("Failed to stamp schedule"))?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id, merchant_ref = %input.merchant_ref))]
    async fn insert_payment(&self, input: &CreatePayment) -> Result<Payment, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_payment"])
            .start_timer();

        let paid_utc = match input.status {
            PaymentStatus::Paid => Some(Utc::now()),
            _ => None,
        };

        let payment = sqlx::query_as::<_, Payment>(&format!(
            r#"
            INSERT INTO payments (payment_id, tenant_id, merchant_ref, transaction_id, amount, status, schedule_id, paid_utc, failure_reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(input.tenant_id)
        .bind(&input.merchant_ref)
        .bind(&input.transaction_id)
        .bind(input.amount)
        .bind(input.status.as_str())
        .bind(input.schedule_id)
        .bind(paid_utc)
        .bind(&input.failure_reason)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => AppError::Conflict(
                anyhow::anyhow!(
                    "payment with merchant reference {} already exists",
                    input.merchant_ref
                ),
            ),
            other => {
                AppError::DatabaseError(anyhow::anyhow!("Failed to insert payment: {}", other))
            }
        })?;

        timer.observe_duration();
        info!(payment_id = %payment.payment_id, status = %payment.status, "Payment recorded");

        Ok(payment)
    }

    #[instrument(skip(self))]
    async fn payment_by_merchant_ref(
        &self,
        merchant_ref: &str,
    ) -> Result<Option<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["payment_by_merchant_ref"])
            .start_timer();

        let payment = sqlx::query_as::<_, Payment>(&format!(
            r#"
            SELECT {}
            FROM payments
            WHERE merchant_ref = $1
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(merchant_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to get payment by merchant reference"))?;

        timer.observe_duration();

        Ok(payment)
    }

    #[instrument(skip(self))]
    async fn payment_by_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["payment_by_transaction"])
            .start_timer();

        let payment = sqlx::query_as::<_, Payment>(&format!(
            r#"
            SELECT {}
            FROM payments
            WHERE transaction_id = $1
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to get payment by transaction id"))?;

        timer.observe_duration();

        Ok(payment)
    }

    #[instrument(skip(self, update), fields(payment_id = %payment_id))]
    async fn finalize_payment(
        &self,
        payment_id: Uuid,
        update: &FinalizePayment,
    ) -> Result<Payment, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["finalize_payment"])
            .start_timer();

        let paid_utc = match update.status {
            PaymentStatus::Paid => update.paid_utc.or_else(|| Some(Utc::now())),
            _ => None,
        };
        let failure_reason = match update.status {
            PaymentStatus::Failed => update.failure_reason.clone(),
            _ => None,
        };

        let payment = sqlx::query_as::<_, Payment>(&format!(
            r#"
            UPDATE payments
            SET transaction_id = COALESCE($2, transaction_id),
                status = $3,
                paid_utc = COALESCE($4, paid_utc),
                failure_reason = COALESCE($5, failure_reason)
            WHERE payment_id = $1
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(payment_id)
        .bind(&update.transaction_id)
        .bind(update.status.as_str())
        .bind(paid_utc)
        .bind(failure_reason)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to finalize payment"))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("payment {} not found", payment_id)))?;

        timer.observe_duration();
        info!(payment_id = %payment_id, status = %payment.status, "Payment finalized");

        Ok(payment)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn failed_payment_count_since(
        &self,
        tenant_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["failed_payment_count_since"])
            .start_timer();

        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM payments
            WHERE tenant_id = $1 AND status = 'failed' AND attempted_utc >= $2
            "#,
        )
        .bind(tenant_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("Failed to count failed payments"))?;

        timer.observe_duration();

        Ok(count)
    }

    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id))]
    async fn list_payments(
        &self,
        tenant_id: Uuid,
        filter: &ListPaymentsFilter,
    ) -> Result<Vec<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_payments"])
            .start_timer();

        let limit = filter.limit.clamp(1, 100);
        let offset = filter.offset.max(0);

        let payments = sqlx::query_as::<_, Payment>(&format!(
            r#"
            SELECT {}
            FROM payments
            WHERE tenant_id = $1
              AND ($2::text IS NULL OR status = $2)
            ORDER BY attempted_utc DESC
            LIMIT $3 OFFSET $4
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(tenant_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to list payments"))?;

        timer.observe_duration();

        Ok(payments)
    }
}

impl Database {
    /// Shared transition: update the subscription row (locked for the
    /// duration of the transaction) and its schedules together.
    async fn transition_subscription(
        &self,
        subscription_id: Uuid,
        status: SubscriptionStatus,
        end_date: Option<NaiveDate>,
        schedule_status: ScheduleStatus,
        next_charge_date: Option<NaiveDate>,
        operation: &'static str,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&[operation])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_err("Failed to begin transaction"))?;

        sqlx::query("SELECT 1 FROM subscriptions WHERE subscription_id = $1 FOR UPDATE")
            .bind(subscription_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err("Failed to lock subscription"))?;

        let updated = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = $2,
                end_date = CASE WHEN $3::date IS NOT NULL THEN $3 ELSE
                    CASE WHEN $2 = 'active' THEN NULL ELSE end_date END END,
                next_billing_date = COALESCE($4, next_billing_date),
                updated_utc = now()
            WHERE subscription_id = $1
            "#,
        )
        .bind(subscription_id)
        .bind(status.as_str())
        .bind(end_date)
        .bind(next_charge_date)
        .execute(&mut *tx)
        .await
        .map_err(db_err("Failed to update subscription status"))?;

        if updated.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "subscription {} not found",
                subscription_id
            )));
        }

        sqlx::query(
            r#"
            UPDATE billing_schedules
            SET status = $2,
                next_charge_date = COALESCE($3, next_charge_date),
                updated_utc = now()
            WHERE subscription_id = $1
            "#,
        )
        .bind(subscription_id)
        .bind(schedule_status.as_str())
        .bind(next_charge_date)
        .execute(&mut *tx)
        .await
        .map_err(db_err("Failed to update schedule status"))?;

        tx.commit()
            .await
            .map_err(db_err("Failed to commit transition"))?;

        timer.observe_duration();
        info!(subscription_id = %subscription_id, status = status.as_str(), "Subscription transitioned");

        Ok(())
    }
}
