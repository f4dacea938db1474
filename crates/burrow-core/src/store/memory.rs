//! In-memory store for tests and ephemeral deployments

use async_trait::async_trait;
use dashmap::DashMap;

use super::{PurgeStats, RuntimeLease, ServiceEndpoint, Store};
use crate::error::StoreError;

type RuntimeKey = (String, String);
type ServiceKey = (String, String, String);

/// Store that keeps both tables in process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    runtimes: DashMap<RuntimeKey, RuntimeLease>,
    services: DashMap<ServiceKey, ServiceEndpoint>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of lease rows, expired or not
    pub fn runtime_count(&self) -> usize {
        self.runtimes.len()
    }

    /// Number of service rows
    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    /// Lease row by key, expired or not
    pub fn runtime(&self, user_id: &str, name: &str) -> Option<RuntimeLease> {
        self.runtimes
            .get(&(user_id.to_string(), name.to_string()))
            .map(|r| r.clone())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_runtime(&self, lease: &RuntimeLease) -> Result<(), StoreError> {
        let key = (lease.user_id.clone(), lease.name.clone());
        match self.runtimes.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StoreError::Conflict {
                table: "runtimes",
                key: format!("{}/{}", lease.user_id, lease.name),
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(lease.clone());
                Ok(())
            }
        }
    }

    async fn update_runtime(&self, lease: &RuntimeLease) -> Result<(), StoreError> {
        let key = (lease.user_id.clone(), lease.name.clone());
        match self.runtimes.get_mut(&key) {
            Some(mut row) => {
                *row = lease.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                table: "runtimes",
                key: format!("{}/{}", lease.user_id, lease.name),
            }),
        }
    }

    async fn delete_runtime(&self, user_id: &str, name: &str) -> Result<(), StoreError> {
        self.runtimes
            .remove(&(user_id.to_string(), name.to_string()));
        Ok(())
    }

    async fn live_runtimes(
        &self,
        user_id: &str,
        now_millis: u64,
    ) -> Result<Vec<RuntimeLease>, StoreError> {
        let mut leases: Vec<RuntimeLease> = self
            .runtimes
            .iter()
            .filter(|r| r.user_id == user_id && r.is_live(now_millis))
            .map(|r| r.clone())
            .collect();
        leases.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        Ok(leases)
    }

    async fn upsert_service(&self, service: &ServiceEndpoint) -> Result<(), StoreError> {
        let key = (
            service.user_id.clone(),
            service.runtime_name.clone(),
            service.service.clone(),
        );
        self.services.insert(key, service.clone());
        Ok(())
    }

    async fn delete_service(
        &self,
        user_id: &str,
        runtime_name: &str,
        service: &str,
    ) -> Result<(), StoreError> {
        self.services.remove(&(
            user_id.to_string(),
            runtime_name.to_string(),
            service.to_string(),
        ));
        Ok(())
    }

    async fn services_for(
        &self,
        user_id: &str,
        runtime_name: &str,
    ) -> Result<Vec<ServiceEndpoint>, StoreError> {
        let mut services: Vec<ServiceEndpoint> = self
            .services
            .iter()
            .filter(|r| r.user_id == user_id && r.runtime_name == runtime_name)
            .map(|r| r.clone())
            .collect();
        services.sort_by(|a, b| a.service.cmp(&b.service));
        Ok(services)
    }

    async fn purge(&self) -> Result<PurgeStats, StoreError> {
        let stats = PurgeStats {
            runtimes: self.runtimes.len(),
            services: self.services.len(),
        };
        self.runtimes.clear();
        self.services.clear();
        Ok(stats)
    }
}
