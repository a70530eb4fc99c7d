//! Services module for billing-service.

pub mod credentials;
pub mod database;
pub mod gateway;
pub mod lifecycle;
pub mod memory;
pub mod metrics;
pub mod reconciler;
pub mod scheduler;
pub mod store;
pub mod tenant_lock;

pub use credentials::CredentialService;
pub use database::Database;
pub use lifecycle::{LifecycleService, PlanChange, StartedSubscription};
pub use memory::MemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use reconciler::{ReconcileOutcome, ReconcilePolicy, WebhookReconciler};
pub use scheduler::{ChargeScheduler, SweepReport};
pub use store::BillingStore;
pub use tenant_lock::TenantLocks;
