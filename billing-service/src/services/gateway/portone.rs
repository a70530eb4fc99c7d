//! PortOne payment gateway client.
//!
//! Implements billing-key issuance against the customers API, recurring
//! charges against the subscribe payments API, and HMAC signature
//! verification for webhook bodies. All endpoints authenticate with a
//! short-lived access token that is cached inside the client and lazily
//! refreshed shortly before expiry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::Mutex;

use crate::config::PortoneConfig;

use super::{
    CardDetails, ChargeOutcome, CredentialInfo, GatewayError, GatewayPaymentStatus,
    PaymentGateway, PaymentStatusInfo,
};

/// Refresh the cached token this long before it actually expires.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// PortOne client for interacting with the PortOne REST API.
#[derive(Clone)]
pub struct PortoneClient {
    client: Client,
    config: PortoneConfig,
    token: Arc<Mutex<Option<CachedToken>>>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_utc: DateTime<Utc>,
}

/// Standard PortOne response envelope.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    code: i64,
    message: Option<String>,
    response: Option<T>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Unix timestamp (seconds).
    expired_at: i64,
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    imp_key: &'a str,
    imp_secret: &'a str,
}

#[derive(Debug, Serialize)]
struct IssueBillingKeyRequest<'a> {
    card_number: &'a str,
    /// "YYYY-MM"
    expiry: String,
    cvc: &'a str,
}

#[derive(Debug, Deserialize)]
struct BillingKeyResponse {
    customer_uid: String,
    card_name: Option<String>,
    /// Masked card number, e.g. "1234-****-****-5678".
    card_number: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChargeRequest<'a> {
    customer_uid: &'a str,
    merchant_uid: &'a str,
    amount: i64,
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChargeResponse {
    imp_uid: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct PaymentResponse {
    status: String,
    /// Unix timestamp (seconds); 0 when unpaid.
    paid_at: Option<i64>,
    fail_reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct CancelRequest<'a> {
    imp_uid: &'a str,
    amount: i64,
    reason: &'a str,
}

impl PortoneClient {
    /// Create a new PortOne client with the configured request timeout.
    pub fn new(config: PortoneConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            config,
            token: Arc::new(Mutex::new(None)),
        }
    }

    /// Check if PortOne is configured (credentials are set).
    pub fn is_configured(&self) -> bool {
        !self.config.api_key.is_empty() && !self.config.api_secret.expose_secret().is_empty()
    }

    /// Return a valid access token, refreshing when the cached one is
    /// missing or within the refresh margin of expiry. Concurrent
    /// refreshes serialize on the cache mutex; tokens are equivalent in
    /// capability so last-writer-wins is fine.
    async fn access_token(&self) -> Result<String, GatewayError> {
        if !self.is_configured() {
            return Err(GatewayError::NotConfigured(
                "PortOne credentials not configured".to_string(),
            ));
        }

        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            let margin = chrono::Duration::seconds(TOKEN_REFRESH_MARGIN_SECS);
            if token.expires_utc - margin > Utc::now() {
                return Ok(token.access_token.clone());
            }
        }

        let url = format!("{}/users/getToken", self.config.api_base_url);
        let request = TokenRequest {
            imp_key: &self.config.api_key,
            imp_secret: self.config.api_secret.expose_secret(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let token: TokenResponse = unwrap_envelope(response).await?;
        let expires_utc = DateTime::from_timestamp(token.expired_at, 0)
            .ok_or_else(|| GatewayError::InvalidResponse("invalid token expiry".to_string()))?;

        tracing::debug!(expires_utc = %expires_utc, "PortOne access token refreshed");

        *cached = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_utc,
        });

        Ok(token.access_token)
    }

    /// Verify webhook signature.
    ///
    /// The signature is computed as:
    /// `HMAC-SHA256(request_body, webhook_secret)`
    pub fn verify_signature(&self, body: &str, signature: &str) -> bool {
        match compute_signature(body, self.config.webhook_secret.expose_secret()) {
            Ok(expected) => {
                let is_valid = expected == signature;
                if !is_valid {
                    tracing::warn!("Webhook signature verification failed");
                }
                is_valid
            }
            Err(_) => false,
        }
    }
}

#[async_trait]
impl PaymentGateway for PortoneClient {
    async fn issue_credential(
        &self,
        tenant_ref: &str,
        card: &CardDetails,
    ) -> Result<CredentialInfo, GatewayError> {
        let token = self.access_token().await?;
        let url = format!(
            "{}/subscribe/customers/{}",
            self.config.api_base_url, tenant_ref
        );
        let request = IssueBillingKeyRequest {
            card_number: &card.number,
            expiry: format!("{}-{}", card.expiry_year, card.expiry_month),
            cvc: &card.cvc,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let issued: BillingKeyResponse = unwrap_envelope(response).await?;
        tracing::info!(customer_uid = %issued.customer_uid, "PortOne billing key issued");

        Ok(credential_info(issued))
    }

    async fn delete_credential(&self, reference: &str) -> Result<(), GatewayError> {
        let token = self.access_token().await?;
        let url = format!(
            "{}/subscribe/customers/{}",
            self.config.api_base_url, reference
        );

        let response = self
            .client
            .delete(&url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(transport_error)?;

        let _: BillingKeyResponse = unwrap_envelope(response).await?;
        tracing::info!(customer_uid = %reference, "PortOne billing key deleted");

        Ok(())
    }

    async fn get_credential_info(&self, reference: &str) -> Result<CredentialInfo, GatewayError> {
        let token = self.access_token().await?;
        let url = format!(
            "{}/subscribe/customers/{}",
            self.config.api_base_url, reference
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(transport_error)?;

        let info: BillingKeyResponse = unwrap_envelope(response).await?;
        Ok(credential_info(info))
    }

    async fn charge(
        &self,
        credential_ref: &str,
        idempotency_key: &str,
        amount: i64,
        description: &str,
    ) -> Result<ChargeOutcome, GatewayError> {
        let token = self.access_token().await?;
        let url = format!("{}/subscribe/payments/again", self.config.api_base_url);
        let request = ChargeRequest {
            customer_uid: credential_ref,
            merchant_uid: idempotency_key,
            amount,
            name: description,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let charged: ChargeResponse = unwrap_envelope(response).await?;
        tracing::info!(
            imp_uid = %charged.imp_uid,
            merchant_uid = %idempotency_key,
            amount = amount,
            status = %charged.status,
            "PortOne charge requested"
        );

        Ok(ChargeOutcome {
            transaction_id: charged.imp_uid,
            status: GatewayPaymentStatus::from_wire(&charged.status),
        })
    }

    async fn get_payment_status(
        &self,
        transaction_id: &str,
    ) -> Result<PaymentStatusInfo, GatewayError> {
        let token = self.access_token().await?;
        let url = format!("{}/payments/{}", self.config.api_base_url, transaction_id);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(transport_error)?;

        let payment: PaymentResponse = unwrap_envelope(response).await?;
        let paid_at = payment
            .paid_at
            .filter(|secs| *secs > 0)
            .and_then(|secs| DateTime::from_timestamp(secs, 0));

        Ok(PaymentStatusInfo {
            status: GatewayPaymentStatus::from_wire(&payment.status),
            paid_at,
            failure_reason: payment.fail_reason,
        })
    }

    async fn cancel_payment(
        &self,
        transaction_id: &str,
        amount: i64,
        reason: &str,
    ) -> Result<(), GatewayError> {
        let token = self.access_token().await?;
        let url = format!("{}/payments/cancel", self.config.api_base_url);
        let request = CancelRequest {
            imp_uid: transaction_id,
            amount,
            reason,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let _: PaymentResponse = unwrap_envelope(response).await?;
        tracing::info!(imp_uid = %transaction_id, amount = amount, "PortOne payment cancelled");

        Ok(())
    }

    fn verify_webhook_signature(&self, body: &str, signature: &str) -> bool {
        self.verify_signature(body, signature)
    }
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout(err.to_string())
    } else {
        GatewayError::Network(err.to_string())
    }
}

/// Unwrap the `{code, message, response}` envelope, mapping non-zero
/// codes to a rejection.
async fn unwrap_envelope<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, GatewayError> {
    let status = response.status();
    let body = response.text().await.map_err(transport_error)?;

    tracing::debug!(status = %status, body = %body, "PortOne response");

    let envelope: ApiEnvelope<T> = serde_json::from_str(&body)
        .map_err(|e| GatewayError::InvalidResponse(format!("{}: {}", e, body)))?;

    if envelope.code != 0 {
        return Err(GatewayError::Rejected {
            code: envelope.code.to_string(),
            message: envelope
                .message
                .unwrap_or_else(|| "unknown gateway error".to_string()),
        });
    }

    envelope
        .response
        .ok_or_else(|| GatewayError::InvalidResponse("missing response body".to_string()))
}

fn credential_info(issued: BillingKeyResponse) -> CredentialInfo {
    let last4: String = issued
        .card_number
        .as_deref()
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();

    CredentialInfo {
        reference: issued.customer_uid,
        card_brand: issued.card_name.unwrap_or_else(|| "unknown".to_string()),
        card_last4: last4,
    }
}

/// Compute HMAC-SHA256 signature.
fn compute_signature(payload: &str, secret: &str) -> Result<String, GatewayError> {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| GatewayError::InvalidResponse("invalid key length".to_string()))?;
    mac.update(payload.as_bytes());
    let result = mac.finalize();
    Ok(hex::encode(result.into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;

    fn test_config() -> PortoneConfig {
        PortoneConfig {
            api_key: "imp_test_123".to_string(),
            api_secret: Secret::new("test_secret".to_string()),
            webhook_secret: Secret::new("webhook_secret".to_string()),
            api_base_url: "https://api.iamport.kr".to_string(),
            timeout_secs: 10,
        }
    }

    #[test]
    fn test_is_configured() {
        let client = PortoneClient::new(test_config());
        assert!(client.is_configured());

        let empty_config = PortoneConfig {
            api_key: "".to_string(),
            api_secret: Secret::new("".to_string()),
            webhook_secret: Secret::new("".to_string()),
            api_base_url: "".to_string(),
            timeout_secs: 10,
        };
        let client = PortoneClient::new(empty_config);
        assert!(!client.is_configured());
    }

    #[test]
    fn test_webhook_signature_verification() {
        let client = PortoneClient::new(test_config());

        let body = r#"{"imp_uid":"imp_1","merchant_uid":"ord_1","status":"paid"}"#;
        let expected = compute_signature(body, "webhook_secret").unwrap();

        assert!(client.verify_signature(body, &expected));
    }

    #[test]
    fn test_invalid_webhook_signature() {
        let client = PortoneClient::new(test_config());

        let body = r#"{"imp_uid":"imp_1","merchant_uid":"ord_1","status":"paid"}"#;
        assert!(!client.verify_signature(body, "invalid_signature"));
    }

    #[test]
    fn test_masked_card_number_last4() {
        let info = credential_info(BillingKeyResponse {
            customer_uid: "cred-1".to_string(),
            card_name: Some("VISA".to_string()),
            card_number: Some("1234-****-****-5678".to_string()),
        });
        assert_eq!(info.card_last4, "5678");
        assert_eq!(info.card_brand, "VISA");
    }
}
