//! burrow-core: Shared types, configuration and persistent state
//!
//! This crate provides the domain types, configuration structures and the
//! lease/service store used by the coordinator daemon.

pub mod config;
pub mod error;
pub mod store;
pub mod time;
pub mod types;

pub use error::{ConfigError, StoreError};
pub use store::{MemoryStore, RuntimeLease, ServiceEndpoint, SqliteStore, Store};
pub use types::{ForwardKey, Identity, SessionId};
