//! Payment gateway abstractions and implementations.
//!
//! The gateway is a capability interface: issue/delete stored billing
//! credentials, charge them, re-fetch payment status, cancel payments.
//! `PortoneClient` talks to the real API; `MockGateway` backs tests and
//! deployments without gateway credentials.

pub mod mock;
pub mod portone;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use thiserror::Error;

use crate::models::PaymentStatus;

/// Error type for gateway operations.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Gateway not configured: {0}")]
    NotConfigured(String),

    #[error("Gateway rejected request: {code} - {message}")]
    Rejected { code: String, message: String },

    #[error("Gateway request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid gateway response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// A timed-out call has an *unknown* outcome; callers record the
    /// charge as pending and let reconciliation resolve it.
    pub fn is_timeout(&self) -> bool {
        matches!(self, GatewayError::Timeout(_))
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Timeout(msg) => AppError::GatewayTimeout(msg),
            GatewayError::NotConfigured(_) => AppError::ServiceUnavailable,
            other => AppError::BadGateway(other.to_string()),
        }
    }
}

/// Raw card details forwarded to the gateway for tokenization. Never
/// persisted locally.
#[derive(Debug, Clone)]
pub struct CardDetails {
    pub number: String,
    pub expiry_month: String,
    pub expiry_year: String,
    pub cvc: String,
}

/// Masked credential metadata returned by the gateway.
#[derive(Debug, Clone)]
pub struct CredentialInfo {
    /// Gateway-side customer reference the billing key is stored under.
    pub reference: String,
    pub card_brand: String,
    pub card_last4: String,
}

/// Payment status as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayPaymentStatus {
    Paid,
    Failed,
    Cancelled,
    PartialCancelled,
    Pending,
}

impl GatewayPaymentStatus {
    pub fn from_wire(s: &str) -> Self {
        match s {
            "paid" => GatewayPaymentStatus::Paid,
            "failed" => GatewayPaymentStatus::Failed,
            "cancelled" => GatewayPaymentStatus::Cancelled,
            "partial_cancelled" => GatewayPaymentStatus::PartialCancelled,
            _ => GatewayPaymentStatus::Pending,
        }
    }
}

impl From<GatewayPaymentStatus> for PaymentStatus {
    fn from(status: GatewayPaymentStatus) -> Self {
        match status {
            GatewayPaymentStatus::Paid => PaymentStatus::Paid,
            GatewayPaymentStatus::Failed => PaymentStatus::Failed,
            GatewayPaymentStatus::Cancelled => PaymentStatus::Canceled,
            GatewayPaymentStatus::PartialCancelled => PaymentStatus::PartialCanceled,
            GatewayPaymentStatus::Pending => PaymentStatus::Pending,
        }
    }
}

/// Result of a charge request.
#[derive(Debug, Clone)]
pub struct ChargeOutcome {
    pub transaction_id: String,
    pub status: GatewayPaymentStatus,
}

/// Authoritative payment state fetched from the gateway.
#[derive(Debug, Clone)]
pub struct PaymentStatusInfo {
    pub status: GatewayPaymentStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

/// Payment gateway capability interface.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Tokenize card details under `tenant_ref` and return the stored
    /// credential's masked metadata.
    async fn issue_credential(
        &self,
        tenant_ref: &str,
        card: &CardDetails,
    ) -> Result<CredentialInfo, GatewayError>;

    /// Delete the stored credential at the gateway.
    async fn delete_credential(&self, reference: &str) -> Result<(), GatewayError>;

    /// Fetch the stored credential's metadata; used for live validation.
    async fn get_credential_info(&self, reference: &str) -> Result<CredentialInfo, GatewayError>;

    /// Charge a stored credential. `idempotency_key` is the merchant
    /// reference the gateway deduplicates on and echoes in webhooks.
    async fn charge(
        &self,
        credential_ref: &str,
        idempotency_key: &str,
        amount: i64,
        description: &str,
    ) -> Result<ChargeOutcome, GatewayError>;

    /// Fetch the authoritative status of a payment by transaction id.
    async fn get_payment_status(
        &self,
        transaction_id: &str,
    ) -> Result<PaymentStatusInfo, GatewayError>;

    /// Cancel (refund) a payment, fully or partially.
    async fn cancel_payment(
        &self,
        transaction_id: &str,
        amount: i64,
        reason: &str,
    ) -> Result<(), GatewayError>;

    /// Verify the HMAC signature of a webhook body.
    fn verify_webhook_signature(&self, body: &str, signature: &str) -> bool;
}
