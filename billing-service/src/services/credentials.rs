//! Billing credential management.
//!
//! Owns the one-active-credential-per-tenant invariant: issuing a new
//! credential retires the existing one at the gateway and locally before
//! the new key is stored.

use std::sync::Arc;

use service_core::error::AppError;
use uuid::Uuid;

use crate::models::{BillingCredential, CreateCredential, CredentialStatus};

use super::gateway::{CardDetails, GatewayError, PaymentGateway};
use super::store::BillingStore;
use super::tenant_lock::TenantLocks;

#[derive(Clone)]
pub struct CredentialService {
    store: Arc<dyn BillingStore>,
    gateway: Arc<dyn PaymentGateway>,
    locks: TenantLocks,
}

impl CredentialService {
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

    /// Issue a new billing credential for the tenant.
    ///
    /// Any existing active credential is retired first (gateway delete,
    /// then local soft-delete), so a failure at any point leaves no
    /// second credential active.
    pub async fn issue(
        &self,
        tenant_id: Uuid,
        card: &CardDetails,
    ) -> Result<BillingCredential, AppError> {
        let _guard = self.locks.acquire(tenant_id).await;

        if let Some(existing) = self.store.active_credential(tenant_id).await? {
            tracing::info!(
                tenant_id = %tenant_id,
                credential_id = %existing.credential_id,
                "Retiring existing credential before issuing a new one"
            );
            self.gateway
                .delete_credential(&existing.gateway_ref)
                .await
                .map_err(AppError::from)?;
            self.store
                .retire_credential(existing.credential_id, CredentialStatus::Deleted)
                .await?;
        }

        let gateway_ref = format!("cred-{}", Uuid::new_v4());
        let issued = self
            .gateway
            .issue_credential(&gateway_ref, card)
            .await
            .map_err(|e| {
                tracing::error!(tenant_id = %tenant_id, error = %e, "Credential issuance failed");
                AppError::from(e)
            })?;

        let credential = self
            .store
            .insert_credential(&CreateCredential {
                tenant_id,
                gateway_ref: issued.reference,
                card_brand: issued.card_brand,
                card_last4: issued.card_last4,
            })
            .await?;

        tracing::info!(
            tenant_id = %tenant_id,
            credential_id = %credential.credential_id,
            card_brand = %credential.card_brand,
            "Billing credential issued"
        );

        Ok(credential)
    }

    /// Active credential for the tenant, if any.
    pub async fn get(&self, tenant_id: Uuid) -> Result<Option<BillingCredential>, AppError> {
        self.store.active_credential(tenant_id).await
    }

    /// Delete the tenant's active credential.
    ///
    /// Returns false when there is nothing to delete or the gateway
    /// rejects the deletion; transport failures propagate so the caller
    /// can retry.
    pub async fn delete(&self, tenant_id: Uuid) -> Result<bool, AppError> {
        let _guard = self.locks.acquire(tenant_id).await;

        let Some(credential) = self.store.active_credential(tenant_id).await? else {
            return Ok(false);
        };

        match self.gateway.delete_credential(&credential.gateway_ref).await {
            Ok(()) => {}
            Err(GatewayError::Rejected { code, message }) => {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    code = %code,
                    message = %message,
                    "Gateway rejected credential deletion"
                );
                return Ok(false);
            }
            Err(other) => return Err(AppError::from(other)),
        }

        self.store
            .retire_credential(credential.credential_id, CredentialStatus::Deleted)
            .await?;

        tracing::info!(
            tenant_id = %tenant_id,
            credential_id = %credential.credential_id,
            "Billing credential deleted"
        );

        Ok(true)
    }

    /// Live round-trip to the gateway to confirm the credential is still
    /// usable. Exposed for UI validation; scheduled charges do not gate
    /// on this.
    pub async fn validate(&self, tenant_id: Uuid) -> Result<bool, AppError> {
        let Some(credential) = self.store.active_credential(tenant_id).await? else {
            return Ok(false);
        };

        match self
            .gateway
            .get_credential_info(&credential.gateway_ref)
            .await
        {
            Ok(info) => Ok(info.reference == credential.gateway_ref),
            Err(GatewayError::Rejected { .. }) => Ok(false),
            Err(other) => Err(AppError::from(other)),
        }
    }
}
