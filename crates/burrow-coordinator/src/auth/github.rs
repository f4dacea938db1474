//! GitHub-backed identity directory
//!
//! A login resolves to the account's GraphQL `node_id`, which stays stable
//! across renames, and its keys are the account's public SSH keys.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use burrow_core::Identity;

use super::directory::{DirectoryError, IdentityDirectory};

/// HTTP timeout for directory lookups
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

const USER_AGENT: &str = concat!("burrow-coordinator/", env!("CARGO_PKG_VERSION"));

#[derive(Deserialize)]
struct GitHubUser {
    node_id: String,
}

#[derive(Deserialize)]
struct GitHubKey {
    key: String,
}

/// Directory resolving identities through the GitHub users API
pub struct GitHubDirectory {
    http: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

impl GitHubDirectory {
    /// Create a directory talking to `api_url`, optionally authenticated
    pub fn new(api_url: impl Into<String>, token: Option<String>) -> Result<Self, DirectoryError> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    /// URL of `login`'s user resource
    ///
    /// Logins are alphanumeric with hyphens; anything else would change the
    /// request path and is refused before a request is made.
    fn user_url(&self, login: &str) -> Result<String, DirectoryError> {
        if !is_valid_login(login) {
            return Err(DirectoryError::UnknownUser(login.to_string()));
        }
        Ok(format!("{}/users/{}", self.api_url, login))
    }

    async fn get(&self, url: &str) -> Result<bytes::Bytes, DirectoryError> {
        let mut request = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response.bytes().await?)
    }
}

fn is_valid_login(login: &str) -> bool {
    !login.is_empty() && login.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

#[async_trait]
impl IdentityDirectory for GitHubDirectory {
    async fn resolve(&self, login: &str) -> Result<Identity, DirectoryError> {
        let url = self.user_url(login)?;
        let body = match self.get(&url).await {
            Err(DirectoryError::Status { status: 404, .. }) => {
                return Err(DirectoryError::UnknownUser(login.to_string()))
            }
            other => other?,
        };

        let user: GitHubUser = serde_json::from_slice(&body)?;
        tracing::debug!(login, node_id = %user.node_id, "Resolved GitHub identity");
        Ok(Identity::new(login, user.node_id))
    }

    async fn authorized_keys(&self, identity: &Identity) -> Result<Vec<String>, DirectoryError> {
        let url = format!("{}/keys", self.user_url(&identity.login)?);
        let body = self.get(&url).await?;

        let keys: Vec<GitHubKey> = serde_json::from_slice(&body)?;
        tracing::debug!(login = %identity.login, count = keys.len(), "Fetched GitHub keys");
        Ok(keys.into_iter().map(|k| k.key).collect())
    }
}
