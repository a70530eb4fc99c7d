//! Per-tenant mutual exclusion.
//!
//! Lifecycle operations and webhook reconciliation can race on the same
//! tenant (a manual cancel racing a webhook for an in-flight charge).
//! Read-modify-write sequences take the tenant's guard so the
//! one-active-credential and one-active-subscription invariants hold;
//! the database's partial unique indexes are the backstop.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct TenantLocks {
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl TenantLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the tenant's guard, creating the entry on first use.
    /// Entries are never removed; the map grows with the tenant count,
    /// which is bounded.
    pub async fn acquire(&self, tenant_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(tenant_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}
