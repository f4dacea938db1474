//! Per-connection session context

use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;

use burrow_core::{Identity, SessionId};

/// State one SSH connection carries through its handlers
///
/// The identity is `None` until authentication succeeds; every stage that
/// needs it receives the context explicitly. `cancel` fires when the
/// connection ends and is the parent of every token the session hands out.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub id: SessionId,
    pub remote_addr: SocketAddr,
    pub identity: Option<Identity>,
    pub cancel: CancellationToken,
    pub span: tracing::Span,
}

impl SessionContext {
    /// Context for a freshly accepted connection
    pub fn new(remote_addr: SocketAddr, shutdown: &CancellationToken) -> Self {
        let id = SessionId::generate();
        let span = tracing::info_span!(
            "session",
            session = %id.short(),
            remote = %remote_addr,
            user = tracing::field::Empty,
        );

        Self {
            id,
            remote_addr,
            identity: None,
            cancel: shutdown.child_token(),
            span,
        }
    }

    /// Bind the authenticated identity and tag the session span with it
    pub fn bind_identity(&mut self, identity: Identity) {
        self.span.record("user", identity.login.as_str());
        self.identity = Some(identity);
    }

    /// Whether the connection has ended
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
