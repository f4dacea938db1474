//! Public key authentication against an identity directory
//!
//! The authenticator fails closed: any directory error rejects the peer.
//! It never retries; the peer may reconnect.

mod directory;
mod github;
mod keys;

pub use directory::{DirectoryError, IdentityDirectory, StaticDirectory};
pub use github::GitHubDirectory;
pub use keys::{same_key, AuthorizedKey};

#[cfg(test)]
pub(crate) use keys::test_keys;

use std::sync::Arc;

use russh::keys::PublicKey;
use thiserror::Error;

use burrow_core::config::{CoordinatorConfig, DirectoryConfig};
use burrow_core::Identity;

/// Reasons a peer is refused
#[derive(Error, Debug)]
pub enum AuthError {
    /// The claimed login could not be resolved
    #[error("cannot resolve {login}: {source}")]
    Resolve {
        login: String,
        #[source]
        source: DirectoryError,
    },

    /// The identity's registered keys could not be fetched
    #[error("cannot fetch keys of {login}: {source}")]
    Keys {
        login: String,
        #[source]
        source: DirectoryError,
    },

    /// None of the registered keys matches the offered one
    #[error("no registered key of {login} matches ({checked} checked)")]
    NoMatchingKey { login: String, checked: usize },
}

/// Verifies offered public keys against an identity directory
#[derive(Clone)]
pub struct Authenticator {
    directory: Arc<dyn IdentityDirectory>,
}

impl Authenticator {
    /// Create an authenticator over `directory`
    pub fn new(directory: Arc<dyn IdentityDirectory>) -> Self {
        Self { directory }
    }

    /// Build the directory selected in the configuration
    pub fn from_config(config: &CoordinatorConfig) -> Result<Self, DirectoryError> {
        let directory: Arc<dyn IdentityDirectory> = match &config.directory {
            DirectoryConfig::GitHub { api_url, token } => {
                Arc::new(GitHubDirectory::new(api_url.clone(), token.clone())?)
            }
            DirectoryConfig::Static => Arc::new(StaticDirectory::new(config.identities.clone())),
        };
        Ok(Self::new(directory))
    }

    /// Authenticate `login` offering `offered`
    ///
    /// Returns the resolved identity on the first registered key equal to
    /// the offered one. Registered keys that do not parse are skipped.
    pub async fn authenticate(
        &self,
        login: &str,
        offered: &PublicKey,
    ) -> Result<Identity, AuthError> {
        let identity = self
            .directory
            .resolve(login)
            .await
            .map_err(|source| AuthError::Resolve {
                login: login.to_string(),
                source,
            })?;

        let registered = self
            .directory
            .authorized_keys(&identity)
            .await
            .map_err(|source| AuthError::Keys {
                login: login.to_string(),
                source,
            })?;

        for (index, line) in registered.iter().enumerate() {
            let Some(candidate) = AuthorizedKey::parse(line) else {
                tracing::warn!(login, index, "Skipping unparsable registered key");
                continue;
            };

            if candidate.matches(offered) {
                tracing::debug!(
                    login,
                    index,
                    comment = candidate.comment.as_deref().unwrap_or("none"),
                    "Offered key matches registered key"
                );
                return Ok(identity);
            }
        }

        Err(AuthError::NoMatchingKey {
            login: login.to_string(),
            checked: registered.len(),
        })
    }
}
