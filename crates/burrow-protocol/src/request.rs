//! Global requests the coordinator answers

use crate::streamlocal::{StreamLocalForward, CANCEL_STREAMLOCAL_FORWARD, STREAMLOCAL_FORWARD};

/// A streamlocal global request, decoded from the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobalRequest {
    /// Start listening on a socket for the peer
    StreamLocalForward(StreamLocalForward),
    /// Stop listening on a previously forwarded socket
    CancelStreamLocalForward(StreamLocalForward),
}

impl GlobalRequest {
    /// Forward request for `socket_path`
    pub fn forward(socket_path: impl Into<String>) -> Self {
        Self::StreamLocalForward(StreamLocalForward::new(socket_path))
    }

    /// Cancel request for `socket_path`
    pub fn cancel(socket_path: impl Into<String>) -> Self {
        Self::CancelStreamLocalForward(StreamLocalForward::new(socket_path))
    }

    /// The request type name as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StreamLocalForward(_) => STREAMLOCAL_FORWARD,
            Self::CancelStreamLocalForward(_) => CANCEL_STREAMLOCAL_FORWARD,
        }
    }

    /// The logical socket path the request names
    pub fn socket_path(&self) -> &str {
        match self {
            Self::StreamLocalForward(req) | Self::CancelStreamLocalForward(req) => &req.socket_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_and_cancel_kinds() {
        let forward = GlobalRequest::forward("/tmp/x.sock");
        assert_eq!(forward.kind(), STREAMLOCAL_FORWARD);
        assert_eq!(forward.socket_path(), "/tmp/x.sock");

        let cancel = GlobalRequest::cancel("/tmp/x.sock");
        assert_eq!(cancel.kind(), CANCEL_STREAMLOCAL_FORWARD);
        assert_eq!(cancel.socket_path(), "/tmp/x.sock");
    }
}
