//! `SQLite`-backed store
//!
//! rusqlite is blocking, so every statement runs on tokio's blocking pool
//! behind a single connection mutex.

// SQLite stores integers as i64; expiry timestamps and row counts are
// always non-negative and fit.
#![allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode};

use super::{PurgeStats, RuntimeLease, ServiceEndpoint, Store};
use crate::error::StoreError;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS runtimes (
    user_id    TEXT    NOT NULL,
    name       TEXT    NOT NULL,
    os         TEXT    NOT NULL,
    arch       TEXT    NOT NULL,
    priority   INTEGER NOT NULL DEFAULT 0,
    expires_at INTEGER NOT NULL,
    PRIMARY KEY (user_id, name)
);

CREATE TABLE IF NOT EXISTS services (
    user_id      TEXT NOT NULL,
    runtime_name TEXT NOT NULL,
    service      TEXT NOT NULL,
    addr         TEXT NOT NULL,
    PRIMARY KEY (user_id, runtime_name, service)
);
";

/// How long a writer waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Store backed by a single SQLite database file
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply the schema
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // journal_mode answers with the resulting mode, so it needs a row read
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        Self::init(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn runtime_key(user_id: &str, name: &str) -> String {
    format!("{}/{}", user_id, name)
}

fn lease_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RuntimeLease> {
    Ok(RuntimeLease {
        user_id: row.get(0)?,
        name: row.get(1)?,
        os: row.get(2)?,
        arch: row.get(3)?,
        priority: row.get(4)?,
        expires_at: row.get::<_, i64>(5)? as u64,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_runtime(&self, lease: &RuntimeLease) -> Result<(), StoreError> {
        let lease = lease.clone();
        self.with_conn(move |conn| {
            let result = conn.execute(
                "INSERT INTO runtimes (user_id, name, os, arch, priority, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    lease.user_id,
                    lease.name,
                    lease.os,
                    lease.arch,
                    lease.priority,
                    lease.expires_at as i64
                ],
            );

            match result {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::Conflict {
                        table: "runtimes",
                        key: runtime_key(&lease.user_id, &lease.name),
                    })
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn update_runtime(&self, lease: &RuntimeLease) -> Result<(), StoreError> {
        let lease = lease.clone();
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE runtimes SET os = ?3, arch = ?4, priority = ?5, expires_at = ?6
                 WHERE user_id = ?1 AND name = ?2",
                params![
                    lease.user_id,
                    lease.name,
                    lease.os,
                    lease.arch,
                    lease.priority,
                    lease.expires_at as i64
                ],
            )?;

            if updated == 0 {
                return Err(StoreError::NotFound {
                    table: "runtimes",
                    key: runtime_key(&lease.user_id, &lease.name),
                });
            }
            Ok(())
        })
        .await
    }

    async fn delete_runtime(&self, user_id: &str, name: &str) -> Result<(), StoreError> {
        let (user_id, name) = (user_id.to_string(), name.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM runtimes WHERE user_id = ?1 AND name = ?2",
                params![user_id, name],
            )?;
            Ok(())
        })
        .await
    }

    async fn live_runtimes(
        &self,
        user_id: &str,
        now_millis: u64,
    ) -> Result<Vec<RuntimeLease>, StoreError> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, name, os, arch, priority, expires_at FROM runtimes
                 WHERE user_id = ?1 AND expires_at > ?2
                 ORDER BY priority DESC, name ASC",
            )?;
            let rows = stmt.query_map(params![user_id, now_millis as i64], lease_from_row)?;
            let leases = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(leases)
        })
        .await
    }

    async fn upsert_service(&self, service: &ServiceEndpoint) -> Result<(), StoreError> {
        let service = service.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO services (user_id, runtime_name, service, addr)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (user_id, runtime_name, service) DO UPDATE SET addr = excluded.addr",
                params![
                    service.user_id,
                    service.runtime_name,
                    service.service,
                    service.addr
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_service(
        &self,
        user_id: &str,
        runtime_name: &str,
        service: &str,
    ) -> Result<(), StoreError> {
        let key = (
            user_id.to_string(),
            runtime_name.to_string(),
            service.to_string(),
        );
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM services WHERE user_id = ?1 AND runtime_name = ?2 AND service = ?3",
                params![key.0, key.1, key.2],
            )?;
            Ok(())
        })
        .await
    }

    async fn services_for(
        &self,
        user_id: &str,
        runtime_name: &str,
    ) -> Result<Vec<ServiceEndpoint>, StoreError> {
        let (user_id, runtime_name) = (user_id.to_string(), runtime_name.to_string());
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, runtime_name, service, addr FROM services
                 WHERE user_id = ?1 AND runtime_name = ?2
                 ORDER BY service ASC",
            )?;
            let rows = stmt.query_map(params![user_id, runtime_name], |row| {
                Ok(ServiceEndpoint {
                    user_id: row.get(0)?,
                    runtime_name: row.get(1)?,
                    service: row.get(2)?,
                    addr: row.get(3)?,
                })
            })?;
            let services = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(services)
        })
        .await
    }

    async fn purge(&self) -> Result<PurgeStats, StoreError> {
        self.with_conn(|conn| {
            let runtimes = conn.execute("DELETE FROM runtimes", [])?;
            let services = conn.execute("DELETE FROM services", [])?;
            Ok(PurgeStats { runtimes, services })
        })
        .await
    }
}
