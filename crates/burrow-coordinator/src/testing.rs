//! Test doubles shared by the coordinator's unit tests

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use burrow_core::store::PurgeStats;
use burrow_core::{Identity, MemoryStore, RuntimeLease, ServiceEndpoint, Store, StoreError};

use crate::session::SessionContext;

/// Authenticated session for `login` under a fresh shutdown token
pub fn session(login: &str) -> SessionContext {
    let addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();
    let mut session = SessionContext::new(addr, &CancellationToken::new());
    session.bind_identity(Identity::new(login, format!("U_{}", login)));
    session
}

/// Poll `check` until it holds, panicking after five seconds
pub async fn eventually<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn injected() -> StoreError {
    StoreError::Task("injected failure".to_string())
}

/// Memory store with switchable write failures
#[derive(Default)]
pub struct FaultyStore {
    pub inner: MemoryStore,
    pub fail_insert: AtomicBool,
    pub fail_update: AtomicBool,
    pub fail_upsert: AtomicBool,
    /// Number of upcoming `delete_service`/`delete_runtime` calls that fail
    pub delete_failures: AtomicU32,
    pub delete_calls: AtomicU32,
    /// While set, `delete_service` stalls until `release_deletes` is cancelled
    pub hold_deletes: AtomicBool,
    pub release_deletes: CancellationToken,
}

impl FaultyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn take_delete_failure(&self) -> bool {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.delete_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Store for FaultyStore {
    async fn insert_runtime(&self, lease: &RuntimeLease) -> Result<(), StoreError> {
        if self.fail_insert.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.insert_runtime(lease).await
    }

    async fn update_runtime(&self, lease: &RuntimeLease) -> Result<(), StoreError> {
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.update_runtime(lease).await
    }

    async fn delete_runtime(&self, user_id: &str, name: &str) -> Result<(), StoreError> {
        if self.take_delete_failure() {
            return Err(injected());
        }
        self.inner.delete_runtime(user_id, name).await
    }

    async fn live_runtimes(
        &self,
        user_id: &str,
        now_millis: u64,
    ) -> Result<Vec<RuntimeLease>, StoreError> {
        self.inner.live_runtimes(user_id, now_millis).await
    }

    async fn upsert_service(&self, service: &ServiceEndpoint) -> Result<(), StoreError> {
        if self.fail_upsert.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.upsert_service(service).await
    }

    async fn delete_service(
        &self,
        user_id: &str,
        runtime_name: &str,
        service: &str,
    ) -> Result<(), StoreError> {
        if self.hold_deletes.load(Ordering::SeqCst) {
            self.release_deletes.cancelled().await;
        }
        if self.take_delete_failure() {
            return Err(injected());
        }
        self.inner.delete_service(user_id, runtime_name, service).await
    }

    async fn services_for(
        &self,
        user_id: &str,
        runtime_name: &str,
    ) -> Result<Vec<ServiceEndpoint>, StoreError> {
        self.inner.services_for(user_id, runtime_name).await
    }

    async fn purge(&self) -> Result<PurgeStats, StoreError> {
        self.inner.purge().await
    }
}
