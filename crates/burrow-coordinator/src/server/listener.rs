//! SSH server listener
//!
//! Accepts incoming connections and spawns a handler for each client.
//! Leftover lease rows, service rows and sockets from a previous process
//! are removed before the first connection is accepted.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use russh::Disconnect;
use russh::keys::ssh_key::LineEnding;
use russh::keys::{Algorithm, PrivateKey};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::forward::sweep_socket_dir;
use crate::server::handler::{ClientHandler, ServerConfig};
use crate::session::SessionContext;
use crate::state::CoordinatorState;

/// SSH server that listens for incoming connections
pub struct SshServer {
    /// Server configuration
    config: ServerConfig,
    /// Shared coordinator state
    state: Arc<CoordinatorState>,
    /// Cancellation token for graceful shutdown
    cancel: CancellationToken,
}

impl SshServer {
    /// Create a new SSH server
    pub fn new(host_key: PrivateKey, state: Arc<CoordinatorState>, cancel: CancellationToken) -> Self {
        Self {
            config: ServerConfig::new(host_key),
            state,
            cancel,
        }
    }

    /// Purge state left by a previous process, bind and serve
    pub async fn run(&self, bind_addr: &str) -> Result<()> {
        self.purge_stale_state().await?;

        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", bind_addr))?;

        self.serve(listener).await
    }

    /// Remove every lease row, service row and socket under the socket dir
    ///
    /// Nothing survives a restart: no session and no listener outlives the
    /// process that created it. This assumes a single coordinator owns the
    /// database and the socket directory.
    pub async fn purge_stale_state(&self) -> Result<()> {
        let stats = self
            .state
            .store
            .purge()
            .await
            .context("Failed to purge stale runtimes and services")?;

        let socket_dir = self.state.forwards().socket_dir().to_path_buf();
        let sockets = tokio::task::spawn_blocking(move || sweep_socket_dir(&socket_dir))
            .await
            .context("Socket sweep task failed")?
            .context("Failed to sweep stale sockets")?;

        tracing::info!(
            runtimes = stats.runtimes,
            services = stats.services,
            sockets,
            "Purged state from previous run"
        );
        Ok(())
    }

    /// Accept connections on `listener` until shutdown
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!("SSH server listening on {}", local_addr);

        loop {
            tokio::select! {
                // Check for shutdown
                _ = self.cancel.cancelled() => {
                    tracing::info!("SSH server shutting down");
                    break;
                }

                // Accept new connections
                result = listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => {
                            self.handle_connection(socket, peer_addr);
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Handle a new incoming connection
    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        let session = SessionContext::new(peer_addr, &self.cancel);
        let span = session.span.clone();
        let cancel = session.cancel.clone();

        let config = Arc::clone(&self.config.ssh_config);
        let handler = ClientHandler::new(Arc::clone(&self.state), session);

        tracing::info!(parent: &span, "New connection");

        tokio::spawn(
            async move {
                let running = match russh::server::run_stream(config, socket, handler).await {
                    Ok(running) => running,
                    Err(e) => {
                        tracing::warn!("Handshake with {} failed: {}", peer_addr, e);
                        cancel.cancel();
                        return;
                    }
                };
                let handle = running.handle();

                tokio::select! {
                    result = running => match result {
                        Ok(()) => tracing::info!("Connection closed normally"),
                        Err(e) => tracing::warn!("Connection closed with error: {}", e),
                    },
                    _ = cancel.cancelled() => {
                        tracing::info!("Closing connection");
                        let _ = handle
                            .disconnect(Disconnect::ByApplication, "session closed".into(), "en".into())
                            .await;
                    }
                }

                cancel.cancel();
            }
            .instrument(span),
        );
    }
}

/// Load or generate a host key
///
/// An inline OpenSSH key takes precedence over `path`. A missing key file
/// is created with a fresh Ed25519 key, readable only by its owner.
pub async fn load_or_generate_host_key(path: &Path, inline: Option<&str>) -> Result<PrivateKey> {
    if let Some(pem) = inline {
        tracing::info!("Using host key from environment");
        return russh::keys::decode_secret_key(pem, None).context("Failed to decode inline host key");
    }

    if !path.exists() {
        tracing::info!("Generating new host key at {:?}", path);

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let key = PrivateKey::random(&mut rand::rngs::OsRng, Algorithm::Ed25519)
            .context("Failed to generate Ed25519 key")?;
        key.write_openssh_file(path, LineEnding::LF)
            .with_context(|| format!("Failed to write host key to {:?}", path))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("Failed to restrict permissions of {:?}", path))?;
        }
    }

    tracing::info!("Loading host key from {:?}", path);
    russh::keys::load_secret_key(path, None)
        .with_context(|| format!("Failed to load host key from {:?}", path))
}
