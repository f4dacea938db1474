//! Core domain types

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of hex characters of a session ID used in derived socket paths
pub const SHORT_SESSION_ID_LEN: usize = 16;

/// Opaque identifier of one SSH connection
///
/// Generated from 32 random bytes when the connection is accepted and
/// rendered as 64 lowercase hex characters. Leases and service rows are
/// keyed by it, so it must never be reused across connections.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random session ID
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Wrap an existing identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading characters used to keep socket paths short
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(SHORT_SESSION_ID_LEN) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A peer identity resolved from the identity directory
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Login name the peer authenticated as
    pub login: String,
    /// Stable directory identifier; owns lease and service rows
    pub id: String,
}

impl Identity {
    /// Create a new identity
    pub fn new(login: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.login, self.id)
    }
}

/// Key of an active streamlocal forward: one per (session, logical path)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForwardKey {
    /// Session that requested the forward
    pub session: SessionId,
    /// Logical socket path as sent by the peer
    pub socket_path: String,
}

impl ForwardKey {
    /// Create a new forward key
    pub fn new(session: SessionId, socket_path: impl Into<String>) -> Self {
        Self {
            session,
            socket_path: socket_path.into(),
        }
    }
}

impl fmt::Display for ForwardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.session.short(), self.socket_path)
    }
}
