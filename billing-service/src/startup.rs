//! Application startup and lifecycle management.
//!
//! Wires the store (PostgreSQL when a database URL is configured, the
//! in-memory store otherwise), the payment gateway (PortOne when
//! credentials are set, the mock otherwise), the billing services and
//! the HTTP router, and runs the periodic sweep loop alongside the
//! server.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post, put},
    Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::BillingConfig;
use crate::handlers;
use crate::services::gateway::{mock::MockGateway, portone::PortoneClient, PaymentGateway};
use crate::services::{
    BillingStore, ChargeScheduler, CredentialService, Database, LifecycleService, MemoryStore,
    ReconcilePolicy, TenantLocks, WebhookReconciler,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: BillingConfig,
    pub store: Arc<dyn BillingStore>,
    pub database: Option<Database>,
    pub credentials: CredentialService,
    pub lifecycle: LifecycleService,
    pub scheduler: Arc<ChargeScheduler>,
    pub reconciler: Arc<WebhookReconciler>,
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
}

impl Application {
    /// Build the application with the given configuration, choosing
    /// store and gateway implementations from it.
    pub async fn build(config: BillingConfig) -> Result<Self, AppError> {
        let (store, database): (Arc<dyn BillingStore>, Option<Database>) =
            match &config.database.url {
                Some(url) => {
                    let db = Database::new(
                        url.expose_secret(),
                        config.database.max_connections,
                        config.database.min_connections,
                    )
                    .await?;
                    db.run_migrations().await?;
                    (Arc::new(db.clone()), Some(db))
                }
                None => {
                    tracing::warn!(
                        "BILLING_DATABASE_URL not set - using in-memory store; state will not survive restarts"
                    );
                    (Arc::new(MemoryStore::new()), None)
                }
            };

        let portone = PortoneClient::new(config.gateway.clone());
        let gateway: Arc<dyn PaymentGateway> = if portone.is_configured() {
            tracing::info!("PortOne client initialized");
            Arc::new(portone)
        } else {
            tracing::warn!(
                "PortOne credentials not configured - using mock gateway; charges are simulated"
            );
            Arc::new(MockGateway::new())
        };

        Self::build_with(config, store, database, gateway).await
    }

    /// Build with explicit store and gateway implementations. The test
    /// harness uses this to inject the in-memory store and a scripted
    /// mock gateway.
    pub async fn build_with(
        config: BillingConfig,
        store: Arc<dyn BillingStore>,
        database: Option<Database>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Result<Self, AppError> {
        let locks = TenantLocks::new();

        let credentials = CredentialService::new(store.clone(), gateway.clone(), locks.clone());
        let lifecycle = LifecycleService::new(store.clone(), gateway.clone(), locks.clone());
        let scheduler = Arc::new(ChargeScheduler::new(
            store.clone(),
            gateway.clone(),
            config.policy.grace_days,
        ));
        let reconciler = Arc::new(WebhookReconciler::new(
            store.clone(),
            gateway.clone(),
            locks,
            ReconcilePolicy {
                verify_signatures: config.policy.verify_webhook_signatures,
                failure_threshold: config.policy.failure_threshold,
                failure_window_days: config.policy.failure_window_days,
            },
        ));

        let state = AppState {
            config: config.clone(),
            store,
            database,
            credentials,
            lifecycle,
            scheduler,
            reconciler,
        };

        // Port 0 binds a random port for testing.
        let addr = format!("{}:{}", config.server.host, config.server.port);
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            tracing::error!("Failed to bind listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Billing service listening on port {}", port);

        Ok(Self {
            port,
            listener,
            state,
            shutdown: CancellationToken::new(),
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get the application state for sharing with tests.
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    fn router(state: AppState) -> Router {
        Router::new()
            .route("/health", get(handlers::health_check))
            .route("/ready", get(handlers::readiness_check))
            .route("/metrics", get(handlers::metrics_endpoint))
            // Credential endpoints (tenant-scoped)
            .route(
                "/billing/credentials",
                post(handlers::credentials::issue_credential)
                    .get(handlers::credentials::get_credential)
                    .delete(handlers::credentials::delete_credential),
            )
            .route(
                "/billing/credentials/validate",
                post(handlers::credentials::validate_credential),
            )
            // Subscription endpoints (tenant-scoped)
            .route(
                "/billing/subscriptions",
                post(handlers::subscriptions::start_subscription)
                    .get(handlers::subscriptions::get_subscription)
                    .delete(handlers::subscriptions::cancel_subscription),
            )
            .route(
                "/billing/subscriptions/plan",
                put(handlers::subscriptions::change_plan),
            )
            .route(
                "/billing/subscriptions/reactivate",
                post(handlers::subscriptions::reactivate_subscription),
            )
            .route(
                "/billing/usage/comments",
                post(handlers::subscriptions::record_comment_usage),
            )
            // Payment endpoints (tenant-scoped)
            .route("/billing/payments", get(handlers::payments::list_payments))
            .route(
                "/billing/payments/:transaction_id/retry",
                post(handlers::payments::retry_payment),
            )
            // Sweep trigger and gateway webhook
            .route("/billing/runs", post(handlers::run_billing_sweep))
            .route("/webhooks/portone", post(handlers::webhook::portone_webhook))
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        tenant_id = tracing::field::Empty,
                    )
                }),
            )
            .with_state(state)
    }

    /// Run the application until stopped. Starts the sweep loop beside
    /// the HTTP server and stops it when the server exits.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let sweep_interval = Duration::from_secs(self.state.config.policy.sweep_interval_secs);
        let sweeper = tokio::spawn(
            self.state
                .scheduler
                .clone()
                .run_loop(sweep_interval, self.shutdown.clone()),
        );

        let router = Self::router(self.state);
        let result = axum::serve(self.listener, router).await;

        self.shutdown.cancel();
        sweeper.await.ok();

        result
    }
}
