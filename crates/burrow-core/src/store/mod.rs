//! Persistent state for runtime leases and service endpoints
//!
//! Both tables are the only state shared with other processes (the
//! execution dispatcher reads them to find live runtimes and their
//! forwarded services). Every write either succeeds or returns an error;
//! callers decide whether to retry or fail.
//!
//! Rows are meaningless across a coordinator restart: no SSH session or
//! listener survives one. [`Store::purge`] must run before the first
//! session is accepted.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// A registered worker runtime, valid until `expires_at`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeLease {
    /// Identity owning the runtime
    pub user_id: String,
    /// Session identifier of the connection that registered it
    pub name: String,
    /// Platform OS (e.g. `linux`)
    pub os: String,
    /// Platform architecture (e.g. `amd64`)
    pub arch: String,
    /// Scheduling priority; higher is preferred
    pub priority: i64,
    /// Expiry in unix milliseconds
    pub expires_at: u64,
}

impl RuntimeLease {
    /// Whether the lease is still valid at `now_millis`
    pub fn is_live(&self, now_millis: u64) -> bool {
        self.expires_at > now_millis
    }
}

/// A forwarded service reachable through a runtime's connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    /// Identity owning the service
    pub user_id: String,
    /// Session identifier of the forwarding connection
    pub runtime_name: String,
    /// Service name, the basename of the logical socket path
    pub service: String,
    /// Connection address, `unix://<real socket path>`
    pub addr: String,
}

/// Rows removed by [`Store::purge`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    pub runtimes: usize,
    pub services: usize,
}

/// Storage backend for the runtime and service tables
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Insert a new lease; fails if (user_id, name) already exists
    async fn insert_runtime(&self, lease: &RuntimeLease) -> Result<(), StoreError>;

    /// Rewrite an existing lease; fails if the row is gone
    async fn update_runtime(&self, lease: &RuntimeLease) -> Result<(), StoreError>;

    /// Delete a lease; deleting a missing row succeeds
    async fn delete_runtime(&self, user_id: &str, name: &str) -> Result<(), StoreError>;

    /// Leases of `user_id` still valid at `now_millis`, highest priority first
    async fn live_runtimes(
        &self,
        user_id: &str,
        now_millis: u64,
    ) -> Result<Vec<RuntimeLease>, StoreError>;

    /// Insert or replace a service endpoint
    async fn upsert_service(&self, service: &ServiceEndpoint) -> Result<(), StoreError>;

    /// Delete a service endpoint; deleting a missing row succeeds
    async fn delete_service(
        &self,
        user_id: &str,
        runtime_name: &str,
        service: &str,
    ) -> Result<(), StoreError>;

    /// Services forwarded by one runtime, ordered by name
    async fn services_for(
        &self,
        user_id: &str,
        runtime_name: &str,
    ) -> Result<Vec<ServiceEndpoint>, StoreError>;

    /// Delete every lease and service row
    async fn purge(&self) -> Result<PurgeStats, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_liveness_boundary() {
        let lease = RuntimeLease {
            user_id: "u".to_string(),
            name: "s".to_string(),
            os: "linux".to_string(),
            arch: "amd64".to_string(),
            priority: 0,
            expires_at: 1_000,
        };

        assert!(lease.is_live(999));
        assert!(!lease.is_live(1_000));
    }
}

/// Behaviour every [`Store`] backend must share
#[cfg(test)]
pub(crate) mod contract {
    use super::*;

    pub fn lease(user_id: &str, name: &str, priority: i64, expires_at: u64) -> RuntimeLease {
        RuntimeLease {
            user_id: user_id.to_string(),
            name: name.to_string(),
            os: "linux".to_string(),
            arch: "amd64".to_string(),
            priority,
            expires_at,
        }
    }

    pub fn service(user_id: &str, runtime_name: &str, name: &str) -> ServiceEndpoint {
        ServiceEndpoint {
            user_id: user_id.to_string(),
            runtime_name: runtime_name.to_string(),
            service: name.to_string(),
            addr: format!("unix:///run/burrow/{}/{}.sock", runtime_name, name),
        }
    }

    pub async fn exercise(store: &dyn Store) {
        // leases: insert, conflict, update, ordering, expiry filter
        store.insert_runtime(&lease("u1", "a", 0, 5_000)).await.unwrap();
        store.insert_runtime(&lease("u1", "b", 10, 5_000)).await.unwrap();
        store.insert_runtime(&lease("u2", "c", 0, 5_000)).await.unwrap();
        assert!(matches!(
            store.insert_runtime(&lease("u1", "a", 0, 9_000)).await,
            Err(StoreError::Conflict { .. })
        ));

        let live = store.live_runtimes("u1", 1_000).await.unwrap();
        let names: Vec<_> = live.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);

        store.update_runtime(&lease("u1", "a", 0, 8_000)).await.unwrap();
        let live = store.live_runtimes("u1", 6_000).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].name, "a");
        assert_eq!(live[0].expires_at, 8_000);

        assert!(matches!(
            store.update_runtime(&lease("u1", "missing", 0, 1)).await,
            Err(StoreError::NotFound { .. })
        ));

        store.delete_runtime("u1", "a").await.unwrap();
        store.delete_runtime("u1", "a").await.unwrap();
        assert!(store.live_runtimes("u1", 6_000).await.unwrap().is_empty());

        // services: upsert replaces, delete is idempotent, scoped by runtime
        store.upsert_service(&service("u1", "b", "docker")).await.unwrap();
        store.upsert_service(&service("u1", "b", "buildkit")).await.unwrap();
        store.upsert_service(&service("u1", "z", "docker")).await.unwrap();

        let mut moved = service("u1", "b", "docker");
        moved.addr = "unix:///elsewhere.sock".to_string();
        store.upsert_service(&moved).await.unwrap();

        let services = store.services_for("u1", "b").await.unwrap();
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].service, "buildkit");
        assert_eq!(services[1].addr, "unix:///elsewhere.sock");

        store.delete_service("u1", "b", "docker").await.unwrap();
        store.delete_service("u1", "b", "docker").await.unwrap();
        assert_eq!(store.services_for("u1", "b").await.unwrap().len(), 1);
        assert_eq!(store.services_for("u1", "z").await.unwrap().len(), 1);

        // purge empties everything
        let stats = store.purge().await.unwrap();
        assert_eq!(stats.runtimes, 2);
        assert_eq!(stats.services, 2);
        assert!(store.live_runtimes("u1", 0).await.unwrap().is_empty());
        assert!(store.live_runtimes("u2", 0).await.unwrap().is_empty());
        assert!(store.services_for("u1", "z").await.unwrap().is_empty());
        assert_eq!(store.purge().await.unwrap(), PurgeStats::default());
    }
}
