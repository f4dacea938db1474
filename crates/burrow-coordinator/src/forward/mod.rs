//! Streamlocal forwarding
//!
//! Per (session, logical path) a forward is either absent or listening.
//! A forward request binds a listener at a derived path, records a service
//! row for it and registers the listener; either all three happen or none
//! does. The forward ends on an explicit cancel, when its session ends, or
//! when its accept loop fails, and teardown then removes all three again.
//! Teardown runs in the background; a new forward of the same path waits
//! for it, up to [`TEARDOWN_WAIT`].

mod path;
mod registry;
mod relay;
mod tunnel;

pub use path::{
    derive_socket_path, service_name, sweep_socket_dir, MAX_SOCKET_PATH_LEN,
};
pub use registry::{ForwardRegistry, ListenerHandle};
use path::{remove_empty_parent, remove_socket_file};
pub use relay::{is_disconnect, relay, RelayStats};
pub use tunnel::{ForwardedChannel, SessionTunnel, Tunnel, TunnelError};

#[cfg(test)]
pub(crate) use tunnel::fake;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use burrow_core::config::CoordinatorConfig;
use burrow_core::{ForwardKey, Identity, ServiceEndpoint, SessionId, Store, StoreError};

use crate::session::SessionContext;

/// Reasons a forward request is refused
#[derive(Error, Debug)]
pub enum ForwardError {
    /// The session has not authenticated
    #[error("no identity bound to session")]
    NoIdentity,

    /// The session already forwards this logical path
    #[error("already forwarding {0}")]
    AlreadyForwarded(String),

    /// The logical path has no usable final component
    #[error("invalid socket path: {0:?}")]
    InvalidSocketPath(String),

    /// The derived path does not fit in `sun_path`
    #[error("socket path {path:?} is {len} bytes, limit is {max}")]
    PathTooLong { path: PathBuf, len: usize, max: usize },

    /// The listener could not be bound
    #[error("failed to listen on {path:?}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The service row could not be written
    #[error("failed to save service: {0}")]
    Store(#[from] StoreError),
}

impl ForwardError {
    /// Whether the error must end the requesting session
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

/// How long a forward waits for a cancelled forward of the same path to finish tearing down
pub const TEARDOWN_WAIT: Duration = Duration::from_secs(5);

/// Bounded exponential backoff for store deletes during teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

/// Handles streamlocal forward and cancel requests
pub struct ForwardHandler {
    store: Arc<dyn Store>,
    registry: Arc<ForwardRegistry>,
    socket_dir: PathBuf,
    retry: RetryPolicy,
}

/// Everything a forward's background tasks need, detached from the request
struct ForwardTask {
    key: ForwardKey,
    handle: ListenerHandle,
    real_path: PathBuf,
    endpoint: ServiceEndpoint,
    session_cancel: CancellationToken,
}

impl ForwardHandler {
    /// Create a handler binding sockets under `socket_dir`
    pub fn new(store: Arc<dyn Store>, socket_dir: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        Self {
            store,
            registry: Arc::new(ForwardRegistry::new()),
            socket_dir: socket_dir.into(),
            retry,
        }
    }

    /// Create a handler from the coordinator configuration
    pub fn from_config(store: Arc<dyn Store>, config: &CoordinatorConfig) -> Self {
        Self::new(
            store,
            config.socket_dir.clone(),
            RetryPolicy {
                attempts: config.store_retry_attempts,
                ..RetryPolicy::default()
            },
        )
    }

    /// The listener registry
    pub fn registry(&self) -> &Arc<ForwardRegistry> {
        &self.registry
    }

    /// Base directory of derived socket paths
    pub fn socket_dir(&self) -> &Path {
        &self.socket_dir
    }

    /// Start forwarding `socket_path` for `session`
    ///
    /// On success the listener is bound, its service row written and the
    /// forward registered; the real socket path is returned. On error none
    /// of these remain.
    pub async fn forward<T: Tunnel>(
        &self,
        session: &SessionContext,
        socket_path: &str,
        tunnel: T,
    ) -> Result<PathBuf, ForwardError> {
        let identity = session.identity.as_ref().ok_or(ForwardError::NoIdentity)?;
        let key = ForwardKey::new(session.id.clone(), socket_path);

        if self.registry.contains(&key) {
            return Err(ForwardError::AlreadyForwarded(socket_path.to_string()));
        }
        if let Some(previous) = self.registry.draining(&key) {
            tracing::debug!(socket = socket_path, "Waiting for previous forward to tear down");
            if tokio::time::timeout(TEARDOWN_WAIT, previous.finished()).await.is_err() {
                tracing::warn!(socket = socket_path, "Previous forward still tearing down");
                return Err(ForwardError::AlreadyForwarded(socket_path.to_string()));
            }
        }

        let service = service_name(socket_path)?;
        let real_path = derive_socket_path(&self.socket_dir, &identity.login, &session.id, &service)?;
        let listener = bind_listener(&real_path)?;

        let endpoint = service_endpoint(identity, &session.id, &service, &real_path);
        if let Err(e) = self.store.upsert_service(&endpoint).await {
            drop(listener);
            discard_socket(&real_path);
            return Err(e.into());
        }

        let handle = self.registry.new_handle();
        if !self.registry.insert(key.clone(), handle.clone()) {
            // Requests on one connection are handled in order, so this only
            // happens if a caller forwards concurrently on the same session.
            drop(listener);
            discard_socket(&real_path);
            self.delete_endpoint(&endpoint).await;
            return Err(ForwardError::AlreadyForwarded(socket_path.to_string()));
        }

        tracing::info!(
            socket = socket_path,
            path = %real_path.display(),
            service = %endpoint.service,
            "Forwarding"
        );

        self.spawn_forward(
            ForwardTask {
                key,
                handle,
                real_path: real_path.clone(),
                endpoint,
                session_cancel: session.cancel.clone(),
            },
            listener,
            tunnel,
        );

        Ok(real_path)
    }

    /// Stop forwarding `socket_path` for `session`
    ///
    /// Idempotent and non-blocking: the listener is closed and teardown
    /// continues in the background. The returned handle resolves once the
    /// socket and service row are gone.
    pub fn cancel(&self, session: &SessionId, socket_path: &str) -> Option<ListenerHandle> {
        let key = ForwardKey::new(session.clone(), socket_path);
        let handle = self.registry.cancel(&key);
        match &handle {
            Some(_) => tracing::info!(socket = socket_path, "Cancelled forward"),
            None => tracing::debug!(socket = socket_path, "Cancel for unknown forward"),
        }
        handle
    }

    fn spawn_forward<T: Tunnel>(&self, task: ForwardTask, listener: UnixListener, tunnel: T) {
        let span = tracing::Span::current();

        let watchdog = tokio::spawn(
            watchdog(
                Arc::clone(&self.registry),
                task.key.clone(),
                task.handle.clone(),
                task.session_cancel.clone(),
            )
            .instrument(span.clone()),
        );

        let accept = tokio::spawn(
            accept_loop(
                listener,
                Arc::clone(&self.registry),
                task.key.clone(),
                task.handle.clone(),
                task.real_path.clone(),
                task.session_cancel.clone(),
                tunnel,
            )
            .instrument(span.clone()),
        );

        let store = Arc::clone(&self.store);
        let registry = Arc::clone(&self.registry);
        let retry = self.retry;
        tokio::spawn(
            async move {
                let (accept_result, watchdog_result) = tokio::join!(accept, watchdog);

                match accept_result {
                    Ok(Ok(())) => tracing::debug!(socket = %task.key.socket_path, "Accept loop finished"),
                    Ok(Err(e)) => tracing::error!(socket = %task.key.socket_path, "Accept loop failed: {}", e),
                    Err(e) => tracing::error!(socket = %task.key.socket_path, "Accept loop panicked: {}", e),
                }
                if let Err(e) = watchdog_result {
                    tracing::error!(socket = %task.key.socket_path, "Watchdog panicked: {}", e);
                }

                remove_empty_parent(&task.real_path);
                delete_endpoint_with_retry(store.as_ref(), &task.endpoint, retry).await;
                registry.finish(&task.key, &task.handle);
                task.handle.finished_token().cancel();
                tracing::debug!(socket = %task.key.socket_path, "Forward torn down");
            }
            .instrument(span),
        );
    }

    async fn delete_endpoint(&self, endpoint: &ServiceEndpoint) {
        delete_endpoint_with_retry(self.store.as_ref(), endpoint, self.retry).await;
    }
}

fn service_endpoint(
    identity: &Identity,
    session: &SessionId,
    service: &str,
    real_path: &Path,
) -> ServiceEndpoint {
    ServiceEndpoint {
        user_id: identity.id.clone(),
        runtime_name: session.as_str().to_string(),
        service: service.to_string(),
        addr: format!("unix://{}", real_path.display()),
    }
}

/// Bind a listener at `path`, creating its directory
///
/// An existing socket file is not removed: it belongs to a live forward
/// of the same service on this session. Stale files from a previous
/// process are swept at startup.
fn bind_listener(path: &Path) -> Result<UnixListener, ForwardError> {
    let bind_err = |source| ForwardError::Bind {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(bind_err)?;
    }

    UnixListener::bind(path).map_err(|e| {
        remove_empty_parent(path);
        bind_err(e)
    })
}

/// Unlink a socket this process bound, logging instead of failing
fn discard_socket(path: &Path) {
    if let Err(e) = remove_socket_file(path) {
        tracing::warn!(path = %path.display(), "Failed to remove socket: {}", e);
    }
    remove_empty_parent(path);
}

async fn delete_endpoint_with_retry(store: &dyn Store, endpoint: &ServiceEndpoint, retry: RetryPolicy) {
    let mut backoff = retry.initial_backoff;

    for attempt in 1..=retry.attempts.max(1) {
        match store
            .delete_service(&endpoint.user_id, &endpoint.runtime_name, &endpoint.service)
            .await
        {
            Ok(()) => {
                tracing::debug!(service = %endpoint.service, "Deleted service");
                return;
            }
            Err(e) if attempt < retry.attempts => {
                tracing::warn!(
                    service = %endpoint.service,
                    attempt,
                    "Failed to delete service, retrying in {:?}: {}",
                    backoff,
                    e
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(e) => {
                tracing::error!(
                    service = %endpoint.service,
                    attempts = retry.attempts,
                    "Failed to delete service: {}",
                    e
                );
                return;
            }
        }
    }
}

/// Close the listener once its session ends
async fn watchdog(
    registry: Arc<ForwardRegistry>,
    key: ForwardKey,
    handle: ListenerHandle,
    session_cancel: CancellationToken,
) {
    let stop = handle.stop_token();
    tokio::select! {
        _ = session_cancel.cancelled() => {
            tracing::debug!(socket = %key.socket_path, "Session ended, closing listener");
        }
        _ = stop.cancelled() => {}
    }
    registry.release(&key, &handle);
}

/// Accept local connections and carry each one to the peer
async fn accept_loop<T: Tunnel>(
    listener: UnixListener,
    registry: Arc<ForwardRegistry>,
    key: ForwardKey,
    handle: ListenerHandle,
    real_path: PathBuf,
    session_cancel: CancellationToken,
    tunnel: T,
) -> io::Result<()> {
    let stop = handle.stop_token();

    let result = loop {
        tokio::select! {
            _ = stop.cancelled() => break Ok(()),
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let relay_cancel = session_cancel.child_token();
                    tokio::spawn(
                        carry(stream, tunnel.clone(), key.socket_path.clone(), relay_cancel)
                            .instrument(tracing::Span::current()),
                    );
                }
                Err(e) => break Err(e),
            },
        }
    };

    registry.release(&key, &handle);
    drop(listener);
    if let Err(e) = remove_socket_file(&real_path) {
        tracing::warn!(path = %real_path.display(), "Failed to remove socket: {}", e);
    }
    result
}

/// Open a forwarded channel for one local connection and relay it
async fn carry<T: Tunnel>(
    stream: UnixStream,
    tunnel: T,
    socket_path: String,
    cancel: CancellationToken,
) {
    let channel = match tunnel.open_forwarded_streamlocal(&socket_path).await {
        Ok(channel) => channel,
        Err(e) => {
            tracing::warn!(socket = %socket_path, "Dropping local connection: {}", e);
            return;
        }
    };

    match relay(stream, channel, cancel).await {
        Ok(stats) => tracing::debug!(
            socket = %socket_path,
            to_peer = stats.to_peer,
            to_local = stats.to_local,
            "Relay finished"
        ),
        Err(e) if is_disconnect(&e) => {
            tracing::debug!(socket = %socket_path, "Relay closed by peer: {}", e)
        }
        Err(e) => tracing::error!(socket = %socket_path, "Relay failed: {}", e),
    }
}
