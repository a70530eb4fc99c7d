//! Mock gateway implementation.
//!
//! Used by tests and by deployments running without gateway credentials.
//! Charge outcomes can be scripted ahead of time; every call is recorded
//! so tests can assert on gateway traffic.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::{
    CardDetails, ChargeOutcome, CredentialInfo, GatewayError, GatewayPaymentStatus,
    PaymentGateway, PaymentStatusInfo,
};

/// A charge request the mock has seen.
#[derive(Debug, Clone)]
pub struct RecordedCharge {
    pub credential_ref: String,
    pub idempotency_key: String,
    pub amount: i64,
    pub description: String,
}

#[derive(Default)]
struct MockState {
    issued: HashMap<String, CredentialInfo>,
    deleted: Vec<String>,
    charges: Vec<RecordedCharge>,
    charge_results: VecDeque<Result<ChargeOutcome, GatewayError>>,
    statuses: HashMap<String, PaymentStatusInfo>,
}

/// Scriptable in-memory gateway.
pub struct MockGateway {
    state: Mutex<MockState>,
    accept_signatures: AtomicBool,
    tx_counter: AtomicU64,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            accept_signatures: AtomicBool::new(true),
            tx_counter: AtomicU64::new(0),
        }
    }

    /// Queue the result of the next charge call. With nothing queued,
    /// charges succeed as paid.
    pub fn push_charge_result(&self, result: Result<ChargeOutcome, GatewayError>) {
        self.state
            .lock()
            .unwrap()
            .charge_results
            .push_back(result);
    }

    /// Set the authoritative status returned for a transaction id.
    pub fn set_payment_status(&self, transaction_id: &str, info: PaymentStatusInfo) {
        self.state
            .lock()
            .unwrap()
            .statuses
            .insert(transaction_id.to_string(), info);
    }

    /// Control whether webhook signatures verify.
    pub fn set_accept_signatures(&self, accept: bool) {
        self.accept_signatures.store(accept, Ordering::SeqCst);
    }

    pub fn charges(&self) -> Vec<RecordedCharge> {
        self.state.lock().unwrap().charges.clone()
    }

    pub fn charge_count(&self) -> usize {
        self.state.lock().unwrap().charges.len()
    }

    pub fn deleted_credentials(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    fn next_transaction_id(&self) -> String {
        let n = self.tx_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("tx-{}", n)
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn issue_credential(
        &self,
        tenant_ref: &str,
        _card: &CardDetails,
    ) -> Result<CredentialInfo, GatewayError> {
        let info = CredentialInfo {
            reference: tenant_ref.to_string(),
            card_brand: "VISA".to_string(),
            card_last4: "4242".to_string(),
        };
        self.state
            .lock()
            .unwrap()
            .issued
            .insert(tenant_ref.to_string(), info.clone());
        Ok(info)
    }

    async fn delete_credential(&self, reference: &str) -> Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.issued.remove(reference);
        state.deleted.push(reference.to_string());
        Ok(())
    }

    async fn get_credential_info(&self, reference: &str) -> Result<CredentialInfo, GatewayError> {
        self.state
            .lock()
            .unwrap()
            .issued
            .get(reference)
            .cloned()
            .ok_or_else(|| GatewayError::Rejected {
                code: "not_found".to_string(),
                message: format!("no billing key for {}", reference),
            })
    }

    async fn charge(
        &self,
        credential_ref: &str,
        idempotency_key: &str,
        amount: i64,
        description: &str,
    ) -> Result<ChargeOutcome, GatewayError> {
        let scripted = {
            let mut state = self.state.lock().unwrap();
            state.charges.push(RecordedCharge {
                credential_ref: credential_ref.to_string(),
                idempotency_key: idempotency_key.to_string(),
                amount,
                description: description.to_string(),
            });
            state.charge_results.pop_front()
        };

        let outcome = match scripted {
            Some(result) => result?,
            None => ChargeOutcome {
                transaction_id: self.next_transaction_id(),
                status: GatewayPaymentStatus::Paid,
            },
        };

        // Keep the authoritative status endpoint consistent with the
        // charge outcome unless a test overrides it.
        let mut state = self.state.lock().unwrap();
        state
            .statuses
            .entry(outcome.transaction_id.clone())
            .or_insert_with(|| PaymentStatusInfo {
                status: outcome.status,
                paid_at: match outcome.status {
                    GatewayPaymentStatus::Paid => Some(Utc::now()),
                    _ => None,
                },
                failure_reason: match outcome.status {
                    GatewayPaymentStatus::Failed => Some("card declined".to_string()),
                    _ => None,
                },
            });

        Ok(outcome)
    }

    async fn get_payment_status(
        &self,
        transaction_id: &str,
    ) -> Result<PaymentStatusInfo, GatewayError> {
        self.state
            .lock()
            .unwrap()
            .statuses
            .get(transaction_id)
            .cloned()
            .ok_or_else(|| GatewayError::Rejected {
                code: "not_found".to_string(),
                message: format!("no payment {}", transaction_id),
            })
    }

    async fn cancel_payment(
        &self,
        transaction_id: &str,
        _amount: i64,
        reason: &str,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        match state.statuses.get_mut(transaction_id) {
            Some(info) => {
                info.status = GatewayPaymentStatus::Cancelled;
                info.failure_reason = Some(reason.to_string());
                Ok(())
            }
            None => Err(GatewayError::Rejected {
                code: "not_found".to_string(),
                message: format!("no payment {}", transaction_id),
            }),
        }
    }

    fn verify_webhook_signature(&self, _body: &str, _signature: &str) -> bool {
        self.accept_signatures.load(Ordering::SeqCst)
    }
}
