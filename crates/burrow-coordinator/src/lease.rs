//! Runtime lease registry
//!
//! A connection registers itself as a runtime by running the `forward`
//! command. The lease row lives as long as the command does: it is renewed
//! every heartbeat and deleted when the command's channel or the session
//! ends. Rows left behind by a crash expire after the lease TTL, and the
//! startup purge removes them anyway.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use burrow_core::config::CoordinatorConfig;
use burrow_core::time::{millis_after, AnchoredClock};
use burrow_core::{RuntimeLease, Store};

use crate::output::{emit, CommandOutput};
use crate::session::SessionContext;

/// Exit status of a command that completed normally
pub const EXIT_OK: u32 = 0;
/// Exit status of a command that failed
pub const EXIT_FAILURE: u32 = 1;

/// Flags of the `forward` command
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(
    name = "forward",
    about = "Register this connection as a runtime and keep its lease alive",
    disable_version_flag = true
)]
pub struct RegisterArgs {
    /// Scheduling priority; higher is preferred
    #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
    pub priority: i64,

    /// Operating system of the runtime
    #[arg(long, default_value = "linux")]
    pub os: String,

    /// CPU architecture of the runtime
    #[arg(long, default_value = "amd64")]
    pub arch: String,
}

impl Default for RegisterArgs {
    fn default() -> Self {
        Self {
            priority: 0,
            os: "linux".to_string(),
            arch: "amd64".to_string(),
        }
    }
}

/// Inserts, renews and deletes runtime leases
pub struct LeaseRegistry {
    store: Arc<dyn Store>,
    ttl: Duration,
    heartbeat: Duration,
}

impl LeaseRegistry {
    /// Create a registry granting `ttl` leases renewed every `heartbeat`
    pub fn new(store: Arc<dyn Store>, ttl: Duration, heartbeat: Duration) -> Self {
        Self {
            store,
            ttl,
            heartbeat,
        }
    }

    /// Create a registry from the coordinator configuration
    pub fn from_config(store: Arc<dyn Store>, config: &CoordinatorConfig) -> Self {
        Self::new(store, config.lease_ttl, config.heartbeat_interval)
    }

    /// Run the registration command until `cancel` fires
    ///
    /// Returns the command's exit status.
    pub async fn run<O>(
        &self,
        session: &SessionContext,
        args: &RegisterArgs,
        out: &mut O,
        cancel: &CancellationToken,
    ) -> u32
    where
        O: CommandOutput + ?Sized,
    {
        let Some(identity) = session.identity.as_ref() else {
            tracing::error!("Registration without an identity");
            emit(out, "no identity bound to session").await;
            return EXIT_FAILURE;
        };

        let clock = AnchoredClock::new();
        let mut lease = RuntimeLease {
            user_id: identity.id.clone(),
            name: session.id.as_str().to_string(),
            os: args.os.clone(),
            arch: args.arch.clone(),
            priority: args.priority,
            expires_at: millis_after(clock.now_millis(), self.ttl),
        };

        if let Err(e) = self.store.insert_runtime(&lease).await {
            tracing::error!("Failed to save runtime: {}", e);
            emit(out, &format!("failed to save runtime: {}", e)).await;
            return EXIT_FAILURE;
        }

        tracing::info!(
            os = %lease.os,
            arch = %lease.arch,
            priority = lease.priority,
            "Runtime registered"
        );
        emit(out, "registered").await;

        let mut heartbeat = tokio::time::interval_at(Instant::now() + self.heartbeat, self.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    return self.deregister(&lease, out).await;
                }

                _ = heartbeat.tick() => {
                    lease.expires_at = millis_after(clock.now_millis(), self.ttl);

                    if let Err(e) = self.store.update_runtime(&lease).await {
                        tracing::error!("Failed to heartbeat runtime: {}", e);
                        emit(out, &format!("failed to heartbeat runtime: {}", e)).await;
                        // the row may be stale now; do not leave it to the TTL
                        if let Err(e) = self.store.delete_runtime(&lease.user_id, &lease.name).await {
                            tracing::error!("Failed to delete runtime after heartbeat failure: {}", e);
                        }
                        return EXIT_FAILURE;
                    }

                    tracing::debug!(expires_at = lease.expires_at, "Runtime heartbeated");
                    emit(out, "heartbeated").await;
                }
            }
        }
    }

    async fn deregister<O>(&self, lease: &RuntimeLease, out: &mut O) -> u32
    where
        O: CommandOutput + ?Sized,
    {
        match self.store.delete_runtime(&lease.user_id, &lease.name).await {
            Ok(()) => {
                tracing::info!("Runtime deregistered");
                EXIT_OK
            }
            Err(e) => {
                tracing::error!("Failed to delete runtime: {}", e);
                emit(out, &format!("failed to delete runtime: {}", e)).await;
                EXIT_FAILURE
            }
        }
    }
}
