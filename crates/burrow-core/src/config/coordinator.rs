//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::error::ConfigError;

/// Default GitHub REST API endpoint
pub const DEFAULT_GITHUB_API: &str = "https://api.github.com";

/// Configuration for the coordinator daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Address to bind the SSH server to
    pub bind_address: String,

    /// Path to the host key file (generated on first start if missing)
    pub host_key_path: PathBuf,

    /// Inline host key in OpenSSH PEM format; takes precedence over the path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_key: Option<String>,

    /// SQLite database holding the runtime and service tables
    pub database_path: PathBuf,

    /// Base directory for forwarded Unix sockets
    ///
    /// Keep this short: derived socket paths must fit in `sun_path`.
    pub socket_dir: PathBuf,

    /// How long a runtime lease stays valid without a heartbeat
    #[serde(with = "duration_secs")]
    pub lease_ttl: Duration,

    /// How often a registered runtime's lease is renewed
    #[serde(with = "duration_secs")]
    pub heartbeat_interval: Duration,

    /// Attempts made to delete a service row when its forward ends
    pub store_retry_attempts: u32,

    /// Where identities and their public keys are looked up
    pub directory: DirectoryConfig,

    /// Identities served by the static directory, keyed by login
    pub identities: BTreeMap<String, IdentityConfig>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        let config_dir = super::default_config_dir();

        Self {
            bind_address: "0.0.0.0:6455".to_string(),
            host_key_path: config_dir.join("host_key"),
            host_key: None,
            database_path: super::default_data_dir().join("burrow.db"),
            socket_dir: super::default_state_dir().join("svc"),
            lease_ttl: Duration::from_secs(3600),
            heartbeat_interval: Duration::from_secs(60),
            store_retry_attempts: 3,
            directory: DirectoryConfig::default(),
            identities: BTreeMap::new(),
        }
    }
}

impl CoordinatorConfig {
    /// Check relationships between fields that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "heartbeat_interval must be greater than zero".to_string(),
            ));
        }

        if self.lease_ttl <= self.heartbeat_interval {
            return Err(ConfigError::Invalid(format!(
                "lease_ttl ({:?}) must exceed heartbeat_interval ({:?})",
                self.lease_ttl, self.heartbeat_interval
            )));
        }

        if self.store_retry_attempts == 0 {
            return Err(ConfigError::Invalid(
                "store_retry_attempts must be at least 1".to_string(),
            ));
        }

        if matches!(self.directory, DirectoryConfig::Static) && self.identities.is_empty() {
            tracing::warn!("Static directory has no identities - all connections will be rejected");
        }

        Ok(())
    }
}

/// Identity directory backing public key authentication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DirectoryConfig {
    /// Resolve logins and keys through the GitHub users API
    GitHub {
        /// API base URL
        #[serde(default = "default_github_api")]
        api_url: String,
        /// Optional token to raise API rate limits
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    /// Resolve logins and keys from `identities` in this file
    Static,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self::GitHub {
            api_url: default_github_api(),
            token: None,
        }
    }
}

fn default_github_api() -> String {
    DEFAULT_GITHUB_API.to_string()
}

/// An identity declared in the configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Stable identifier owning this identity's rows
    pub id: String,
    /// Authorized keys in OpenSSH `type base64 [comment]` form
    #[serde(default)]
    pub keys: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_timings() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.lease_ttl, Duration::from_secs(3600));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_static_directory() {
        let config: CoordinatorConfig = toml::from_str(
            r#"
bind_address = "127.0.0.1:2022"
heartbeat_interval = "30s"

[directory]
kind = "static"

[identities.alice]
id = "U_alice"
keys = ["ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIG alice@laptop"]
"#,
        )
        .unwrap();

        assert_eq!(config.bind_address, "127.0.0.1:2022");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert!(matches!(config.directory, DirectoryConfig::Static));
        assert_eq!(config.identities["alice"].id, "U_alice");
        assert_eq!(config.identities["alice"].keys.len(), 1);
        // untouched fields keep their defaults
        assert_eq!(config.lease_ttl, Duration::from_secs(3600));
    }

    #[test]
    fn test_parse_github_directory_defaults_api() {
        let config: CoordinatorConfig = toml::from_str(
            r#"
[directory]
kind = "github"
token = "ghp_example"
"#,
        )
        .unwrap();

        match config.directory {
            DirectoryConfig::GitHub { api_url, token } => {
                assert_eq!(api_url, DEFAULT_GITHUB_API);
                assert_eq!(token.as_deref(), Some("ghp_example"));
            }
            other => panic!("unexpected directory: {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_ttl_below_heartbeat() {
        let config = CoordinatorConfig {
            lease_ttl: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(60),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_zero_retries() {
        let config = CoordinatorConfig {
            store_retry_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
