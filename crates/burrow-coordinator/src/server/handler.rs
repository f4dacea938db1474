//! SSH client handler implementation
//!
//! One handler per connection. It authenticates the peer, runs exec
//! commands on their own tasks and hands streamlocal requests to the
//! router. Dropping the handler ends the session.

use std::collections::HashMap;
use std::sync::Arc;

use russh::keys::{HashAlg, PrivateKey, PublicKey};
use russh::server::{Auth, Handle, Handler, Msg, Session};
use russh::{Channel, ChannelId, MethodKind, MethodSet};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use burrow_protocol::GlobalRequest;

use crate::forward::SessionTunnel;
use crate::output::ChannelOutput;
use crate::session::SessionContext;
use crate::state::CoordinatorState;

/// Handler for a single SSH client connection
pub struct ClientHandler {
    /// Shared coordinator state
    state: Arc<CoordinatorState>,
    /// Identity, span and cancellation of this connection
    session: SessionContext,
    /// Running exec commands, cancelled when their channel closes
    commands: HashMap<ChannelId, CancellationToken>,
}

impl ClientHandler {
    /// Create a handler for an accepted connection
    pub fn new(state: Arc<CoordinatorState>, session: SessionContext) -> Self {
        Self {
            state,
            session,
            commands: HashMap::new(),
        }
    }

    /// The connection's session context
    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    async fn global_request(&self, request: GlobalRequest, handle: Handle) -> bool {
        let tunnel = SessionTunnel::new(handle);
        self.state
            .router
            .global_request(&self.session, request, tunnel)
            .instrument(self.session.span.clone())
            .await
    }

    fn spawn_command(&mut self, channel: ChannelId, command_line: String, session: &mut Session) {
        let handle = session.handle();
        let cancel = self.session.cancel.child_token();
        self.commands.insert(channel, cancel.clone());

        let state = Arc::clone(&self.state);
        let ctx = self.session.clone();

        tokio::spawn(
            async move {
                tracing::info!(command = %command_line, "Running command");

                let mut out = ChannelOutput::new(handle.clone(), channel);
                let code = state
                    .router
                    .run_command(&ctx, &command_line, &mut out, &cancel)
                    .await;

                tracing::debug!(command = %command_line, code, "Command finished");
                let _ = handle.exit_status_request(channel, code).await;
                let _ = handle.eof(channel).await;
                let _ = handle.close(channel).await;
            }
            .instrument(self.session.span.clone()),
        );
    }
}

impl Drop for ClientHandler {
    fn drop(&mut self) {
        // Ends every forward, relay and command of the connection
        self.session.cancel.cancel();
        tracing::debug!(parent: &self.session.span, "Connection handler dropped");
    }
}

impl Handler for ClientHandler {
    type Error = anyhow::Error;

    /// Handle public key authentication
    ///
    /// Called once the peer has proven possession of the key. The identity
    /// directory decides whether the key belongs to the claimed login.
    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        let fingerprint = public_key.fingerprint(HashAlg::Sha256);
        let span = self.session.span.clone();

        match self
            .state
            .authenticator
            .authenticate(user, public_key)
            .instrument(span.clone())
            .await
        {
            Ok(identity) => {
                self.session.bind_identity(identity);
                tracing::info!(parent: &span, %fingerprint, "Authenticated");
                Ok(Auth::Accept)
            }
            Err(e) => {
                tracing::warn!(parent: &span, user, %fingerprint, "Authentication rejected: {}", e);
                Ok(Auth::Reject {
                    proceed_with_methods: None,
                })
            }
        }
    }

    /// Handle channel open request
    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        tracing::debug!(parent: &self.session.span, "Channel opened: {:?}", channel.id());
        Ok(true)
    }

    /// Handle an exec request: run the command on its own task
    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let command_line = String::from_utf8_lossy(data).into_owned();
        let _ = session.channel_success(channel);
        self.spawn_command(channel, command_line, session);
        Ok(())
    }

    /// A shell request is an exec with an empty command line
    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let _ = session.channel_success(channel);
        self.spawn_command(channel, String::new(), session);
        Ok(())
    }

    /// Handle channel close
    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!(parent: &self.session.span, "Channel closed: {:?}", channel);
        if let Some(cancel) = self.commands.remove(&channel) {
            cancel.cancel();
        }
        Ok(())
    }

    /// Handle `streamlocal-forward@openssh.com`
    async fn streamlocal_forward(
        &mut self,
        socket_path: &str,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self
            .global_request(GlobalRequest::forward(socket_path), session.handle())
            .await)
    }

    /// Handle `cancel-streamlocal-forward@openssh.com`
    async fn cancel_streamlocal_forward(
        &mut self,
        socket_path: &str,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self
            .global_request(GlobalRequest::cancel(socket_path), session.handle())
            .await)
    }
}

/// Configuration for the SSH server
#[derive(Clone)]
pub struct ServerConfig {
    /// russh server configuration
    pub ssh_config: Arc<russh::server::Config>,
}

impl ServerConfig {
    /// Create a new server configuration with the given host key
    pub fn new(host_key: PrivateKey) -> Self {
        let mut config = russh::server::Config::default();
        config.keys.push(host_key);
        config.methods = MethodSet::from(&[MethodKind::PublicKey][..]);
        config.auth_rejection_time = std::time::Duration::from_secs(1);
        config.auth_rejection_time_initial = Some(std::time::Duration::from_secs(0));
        // Workers sit idle between forwarded connections; dead peers are
        // found by keepalive requests instead of an inactivity timer.
        config.inactivity_timeout = None;
        config.keepalive_interval = Some(std::time::Duration::from_secs(30));
        config.keepalive_max = 3;

        Self {
            ssh_config: Arc::new(config),
        }
    }
}
