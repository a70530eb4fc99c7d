//! Billing credential model.
//!
//! A credential is a gateway-tokenized reference to a stored payment
//! instrument; raw card data never lands in this table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Credential status. Removal is a soft delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    Active,
    Deleted,
    Expired,
}

impl CredentialStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialStatus::Active => "active",
            CredentialStatus::Deleted => "deleted",
            CredentialStatus::Expired => "expired",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "deleted" => CredentialStatus::Deleted,
            "expired" => CredentialStatus::Expired,
            _ => CredentialStatus::Active,
        }
    }
}

/// Stored billing credential.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BillingCredential {
    pub credential_id: Uuid,
    pub tenant_id: Uuid,
    /// Opaque customer reference at the payment gateway.
    pub gateway_ref: String,
    pub card_brand: String,
    pub card_last4: String,
    pub status: String,
    pub created_utc: DateTime<Utc>,
    pub deleted_utc: Option<DateTime<Utc>>,
}

/// Input for persisting a gateway-issued credential.
#[derive(Debug, Clone)]
pub struct CreateCredential {
    pub tenant_id: Uuid,
    pub gateway_ref: String,
    pub card_brand: String,
    pub card_last4: String,
}
