//! Payment model.
//!
//! Payment rows are the audit trail for proration and suspension
//! decisions: they are appended and updated, never deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Canceled,
    PartialCanceled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Canceled => "canceled",
            PaymentStatus::PartialCanceled => "partial_canceled",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "paid" => PaymentStatus::Paid,
            "failed" => PaymentStatus::Failed,
            "canceled" => PaymentStatus::Canceled,
            "partial_canceled" => PaymentStatus::PartialCanceled,
            _ => PaymentStatus::Pending,
        }
    }

    /// Terminal payments are updated exactly once; reconciliation
    /// short-circuits when it sees one.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

/// Payment record for one charge attempt.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub payment_id: Uuid,
    pub tenant_id: Uuid,
    /// Merchant-generated idempotency key, unique across all payments.
    pub merchant_ref: String,
    /// Gateway-assigned transaction id, absent until the gateway has one.
    pub transaction_id: Option<String>,
    pub amount: i64,
    pub status: String,
    /// Null for ad hoc and initial charges.
    pub schedule_id: Option<Uuid>,
    pub attempted_utc: DateTime<Utc>,
    pub paid_utc: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl Payment {
    pub fn status_enum(&self) -> PaymentStatus {
        PaymentStatus::from_string(&self.status)
    }
}

/// Input for recording a charge attempt.
#[derive(Debug, Clone)]
pub struct CreatePayment {
    pub tenant_id: Uuid,
    pub merchant_ref: String,
    pub transaction_id: Option<String>,
    pub amount: i64,
    pub status: PaymentStatus,
    pub schedule_id: Option<Uuid>,
    pub failure_reason: Option<String>,
}

/// Terminal update applied by the reconciler.
#[derive(Debug, Clone)]
pub struct FinalizePayment {
    pub transaction_id: Option<String>,
    pub status: PaymentStatus,
    pub paid_utc: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

/// Filter parameters for listing payments.
#[derive(Debug, Clone)]
pub struct ListPaymentsFilter {
    pub status: Option<PaymentStatus>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for ListPaymentsFilter {
    fn default() -> Self {
        Self {
            status: None,
            limit: 50,
            offset: 0,
        }
    }
}
