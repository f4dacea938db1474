//! burrow-coordinator: SSH coordinator for reverse-connected workers
//!
//! Workers dial out to the coordinator over SSH, register themselves as
//! runtimes with the `forward` command and forward their local Unix sockets
//! back with `ssh -R`. The coordinator binds those sockets locally, records
//! them in the service table and relays every connection made to them
//! over the worker's own SSH connection.

pub mod auth;
pub mod forward;
pub mod lease;
pub mod output;
pub mod router;
pub mod server;
pub mod session;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use router::Router;
pub use session::SessionContext;
pub use state::CoordinatorState;
