//! Test helper module for billing-service integration tests.
//!
//! Builds the service stack over the in-memory store and the scripted
//! mock gateway, so tests run without PostgreSQL or gateway access.

#![allow(dead_code)]

use std::sync::Arc;

use billing_service::config::{
    BillingConfig, DatabaseConfig, PolicyConfig, PortoneConfig, ServerConfig,
};
use billing_service::services::gateway::{mock::MockGateway, CardDetails, PaymentGateway};
use billing_service::services::{
    BillingStore, ChargeScheduler, CredentialService, LifecycleService, MemoryStore,
    ReconcilePolicy, TenantLocks, WebhookReconciler,
};
use billing_service::Application;
use chrono::NaiveDate;
use secrecy::Secret;
use uuid::Uuid;

pub const GRACE_DAYS: u64 = 14;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn test_card() -> CardDetails {
    CardDetails {
        number: "4242424242424242".to_string(),
        expiry_month: "12".to_string(),
        expiry_year: "2030".to_string(),
        cvc: "123".to_string(),
    }
}

/// Service stack over in-memory store and mock gateway.
pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<MockGateway>,
    pub credentials: CredentialService,
    pub lifecycle: LifecycleService,
    pub scheduler: ChargeScheduler,
    pub reconciler: WebhookReconciler,
    pub tenant: Uuid,
}

impl TestHarness {
    pub fn new() -> Self {
        // Most tests drive the reconciler directly; signature checks are
        // covered by their own cases.
        Self::with_policy(ReconcilePolicy {
            verify_signatures: false,
            failure_threshold: 3,
            failure_window_days: 30,
        })
    }

    pub fn with_policy(policy: ReconcilePolicy) -> Self {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MockGateway::new());
        let locks = TenantLocks::new();

        let store_dyn: Arc<dyn BillingStore> = store.clone();
        let gateway_dyn: Arc<dyn PaymentGateway> = gateway.clone();

        let credentials =
            CredentialService::new(store_dyn.clone(), gateway_dyn.clone(), locks.clone());
        let lifecycle =
            LifecycleService::new(store_dyn.clone(), gateway_dyn.clone(), locks.clone());
        let scheduler = ChargeScheduler::new(store_dyn.clone(), gateway_dyn.clone(), GRACE_DAYS);
        let reconciler = WebhookReconciler::new(store_dyn, gateway_dyn, locks, policy);

        Self {
            store,
            gateway,
            credentials,
            lifecycle,
            scheduler,
            reconciler,
            tenant: Uuid::new_v4(),
        }
    }

    /// Register a card for the harness tenant.
    pub async fn issue_card(&self) -> billing_service::models::BillingCredential {
        self.credentials
            .issue(self.tenant, &test_card())
            .await
            .expect("Failed to issue test credential")
    }
}

pub fn test_config() -> BillingConfig {
    BillingConfig {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Random port
        },
        database: DatabaseConfig {
            url: None,
            max_connections: 5,
            min_connections: 1,
        },
        gateway: PortoneConfig {
            api_key: "".to_string(),
            api_secret: Secret::new("".to_string()),
            webhook_secret: Secret::new("test_webhook_secret".to_string()),
            api_base_url: "".to_string(),
            timeout_secs: 5,
        },
        policy: PolicyConfig {
            failure_threshold: 3,
            failure_window_days: 30,
            grace_days: GRACE_DAYS,
            sweep_interval_secs: 3600,
            verify_webhook_signatures: true,
        },
        service_name: "billing-service-test".to_string(),
        log_level: "warn".to_string(),
        otlp_endpoint: None,
    }
}

/// Spawned application for network-level tests.
pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<MockGateway>,
}

impl TestApp {
    /// Spawn the application on a random port over in-memory state.
    pub async fn spawn() -> Self {
        billing_service::services::init_metrics();

        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MockGateway::new());
        let store_dyn: Arc<dyn BillingStore> = store.clone();
        let gateway_dyn: Arc<dyn PaymentGateway> = gateway.clone();

        let app = Application::build_with(test_config(), store_dyn, None, gateway_dyn)
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server to accept requests.
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            store,
            gateway,
        }
    }
}
