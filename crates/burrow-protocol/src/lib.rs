//! burrow-protocol: Message types for streamlocal forwarding
//!
//! The coordinator implements the OpenSSH `streamlocal` extension of the SSH
//! connection protocol, which forwards Unix-domain sockets instead of TCP
//! ports. This crate names the extension's requests and channel type and
//! holds their payloads as typed values, independent of any live SSH server.

pub mod request;
pub mod streamlocal;

pub use request::GlobalRequest;
pub use streamlocal::{
    ForwardedStreamLocal, StreamLocalForward, CANCEL_STREAMLOCAL_FORWARD,
    FORWARDED_STREAMLOCAL, STREAMLOCAL_FORWARD,
};
