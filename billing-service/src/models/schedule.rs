//! Billing schedule model.
//!
//! The schedule tracks one subscription's recurring charge cadence,
//! independent from the subscription's own status so that billing can be
//! suspended without cancelling the subscription outright.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::plan::{BillingCycle, PlanType};

/// Schedule status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Scheduled,
    Active,
    Paused,
    Suspended,
    Canceled,
    Completed,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Scheduled => "scheduled",
            ScheduleStatus::Active => "active",
            ScheduleStatus::Paused => "paused",
            ScheduleStatus::Suspended => "suspended",
            ScheduleStatus::Canceled => "canceled",
            ScheduleStatus::Completed => "completed",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "active" => ScheduleStatus::Active,
            "paused" => ScheduleStatus::Paused,
            "suspended" => ScheduleStatus::Suspended,
            "canceled" => ScheduleStatus::Canceled,
            "completed" => ScheduleStatus::Completed,
            _ => ScheduleStatus::Scheduled,
        }
    }
}

/// Recurring charge schedule.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BillingSchedule {
    pub schedule_id: Uuid,
    pub tenant_id: Uuid,
    pub subscription_id: Uuid,
    pub credential_id: Uuid,
    pub plan: String,
    /// Charge amount per period, smallest currency unit.
    pub amount: i64,
    pub billing_cycle: String,
    pub next_charge_date: NaiveDate,
    pub last_charge_date: Option<NaiveDate>,
    pub status: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl BillingSchedule {
    pub fn cycle(&self) -> BillingCycle {
        BillingCycle::from_string(&self.billing_cycle)
    }

    pub fn plan_type(&self) -> PlanType {
        PlanType::from_string(&self.plan)
    }

    pub fn status_enum(&self) -> ScheduleStatus {
        ScheduleStatus::from_string(&self.status)
    }
}

/// Input for creating a schedule alongside its subscription.
#[derive(Debug, Clone)]
pub struct CreateSchedule {
    pub tenant_id: Uuid,
    pub credential_id: Uuid,
    pub plan: PlanType,
    pub amount: i64,
    pub billing_cycle: BillingCycle,
    pub next_charge_date: NaiveDate,
}
