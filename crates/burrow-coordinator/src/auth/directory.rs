//! Identity directories
//!
//! A directory answers two questions for the authenticator: who does a
//! login name belong to, and which public keys may that identity use.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use burrow_core::config::IdentityConfig;
use burrow_core::Identity;

/// Errors raised while consulting an identity directory
#[derive(Error, Debug)]
pub enum DirectoryError {
    /// The directory has no such login
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// The directory could not be reached
    #[error("directory request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The directory answered with an unexpected status
    #[error("directory returned {status} for {url}")]
    Status { status: u16, url: String },

    /// The directory answered with a body we cannot read
    #[error("malformed directory response: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Source of identities and their registered public keys
#[async_trait]
pub trait IdentityDirectory: Send + Sync + 'static {
    /// Resolve a login name to an identity
    async fn resolve(&self, login: &str) -> Result<Identity, DirectoryError>;

    /// Registered public keys of `identity`, in OpenSSH text form
    async fn authorized_keys(&self, identity: &Identity) -> Result<Vec<String>, DirectoryError>;
}

/// Directory backed by identities declared in the configuration file
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    identities: BTreeMap<String, IdentityConfig>,
}

impl StaticDirectory {
    /// Create a directory from configured identities keyed by login
    pub fn new(identities: BTreeMap<String, IdentityConfig>) -> Self {
        Self { identities }
    }

    /// Add or replace one identity
    pub fn with_identity(
        mut self,
        login: impl Into<String>,
        id: impl Into<String>,
        keys: Vec<String>,
    ) -> Self {
        self.identities.insert(
            login.into(),
            IdentityConfig {
                id: id.into(),
                keys,
            },
        );
        self
    }

    /// Number of configured identities
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    /// Whether no identities are configured
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

#[async_trait]
impl IdentityDirectory for StaticDirectory {
    async fn resolve(&self, login: &str) -> Result<Identity, DirectoryError> {
        self.identities
            .get(login)
            .map(|entry| Identity::new(login, entry.id.clone()))
            .ok_or_else(|| DirectoryError::UnknownUser(login.to_string()))
    }

    async fn authorized_keys(&self, identity: &Identity) -> Result<Vec<String>, DirectoryError> {
        self.identities
            .get(&identity.login)
            .filter(|entry| entry.id == identity.id)
            .map(|entry| entry.keys.clone())
            .ok_or_else(|| DirectoryError::UnknownUser(identity.login.clone()))
    }
}
