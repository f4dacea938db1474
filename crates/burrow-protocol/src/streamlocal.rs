//! Streamlocal extension messages
//!
//! Field layout, from OpenSSH's PROTOCOL file:
//!
//! ```text
//! streamlocal-forward@openssh.com / cancel-streamlocal-forward@openssh.com
//!     string  socket path
//!
//! forwarded-streamlocal@openssh.com (channel open)
//!     string  socket path
//!     string  reserved
//! ```
//!
//! The SSH transport encodes and decodes these fields; this module holds
//! them as typed values once they have been read.

/// Global request asking the server to listen on a socket on the peer's behalf
pub const STREAMLOCAL_FORWARD: &str = "streamlocal-forward@openssh.com";

/// Global request withdrawing an earlier `streamlocal-forward`
pub const CANCEL_STREAMLOCAL_FORWARD: &str = "cancel-streamlocal-forward@openssh.com";

/// Channel type the server opens for each connection accepted on a forward
pub const FORWARDED_STREAMLOCAL: &str = "forwarded-streamlocal@openssh.com";

/// Payload of `streamlocal-forward` and `cancel-streamlocal-forward`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamLocalForward {
    /// Logical socket path chosen by the peer
    pub socket_path: String,
}

impl StreamLocalForward {
    /// Create a new request payload
    pub fn new(socket_path: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }
}

/// Payload of a `forwarded-streamlocal` channel open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedStreamLocal {
    /// Logical socket path, echoed back so the peer can route the connection
    pub socket_path: String,
    /// Reserved, always empty when sent by this server
    pub reserved: String,
}

impl ForwardedStreamLocal {
    /// Create a channel open payload with an empty reserved field
    pub fn new(socket_path: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
            reserved: String::new(),
        }
    }
}
