//! burrow coordinator daemon
//!
//! Accepts worker SSH connections, keeps their runtime leases alive and
//! forwards their Unix sockets.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use russh::keys::HashAlg;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use burrow_core::config::{self, CoordinatorConfig, DirectoryConfig};
use burrow_core::{SqliteStore, Store};
use burrow_coordinator::auth::Authenticator;
use burrow_coordinator::server::{load_or_generate_host_key, SshServer};
use burrow_coordinator::CoordinatorState;

#[derive(Parser)]
#[command(name = "burrow-coordinator")]
#[command(about = "burrow coordinator daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "BURROW_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address (overrides config)
    #[arg(short, long, env = "BURROW_SSH_ADDR")]
    bind: Option<String>,

    /// Host key file (overrides config)
    #[arg(long, env = "BURROW_SSH_HOST_KEY_PATH")]
    host_key: Option<PathBuf>,

    /// Host key in OpenSSH format, instead of a file
    #[arg(long, env = "BURROW_SSH_HOST_KEY", hide_env_values = true)]
    host_key_pem: Option<String>,

    /// SQLite database path (overrides config)
    #[arg(long, env = "BURROW_SQLITE_PATH")]
    database: Option<PathBuf>,

    /// Base directory for forwarded sockets (overrides config)
    #[arg(long, env = "BURROW_SOCKET_DIR")]
    socket_dir: Option<PathBuf>,

    /// GitHub API token for the GitHub directory
    #[arg(long, env = "BURROW_GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    /// Apply command line and environment overrides to `config`
    fn apply(&self, config: &mut CoordinatorConfig) {
        if let Some(bind) = &self.bind {
            config.bind_address = bind.clone();
        }
        if let Some(path) = &self.host_key {
            config.host_key_path = path.clone();
        }
        if let Some(pem) = &self.host_key_pem {
            config.host_key = Some(pem.clone());
        }
        if let Some(path) = &self.database {
            config.database_path = path.clone();
        }
        if let Some(dir) = &self.socket_dir {
            config.socket_dir = dir.clone();
        }
        if let Some(github_token) = &self.github_token {
            match &mut config.directory {
                DirectoryConfig::GitHub { token, .. } => *token = Some(github_token.clone()),
                DirectoryConfig::Static => {
                    tracing::warn!("Ignoring GitHub token: the static directory is configured")
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("burrow coordinator starting...");

    // Load configuration
    let mut config: CoordinatorConfig = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path();
        if default_path.exists() {
            config::load_config(&default_path)
                .with_context(|| format!("Failed to load config from {:?}", default_path))?
        } else {
            tracing::info!("Using default configuration");
            CoordinatorConfig::default()
        }
    };
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    // Load or generate host key
    let host_key = load_or_generate_host_key(&config.host_key_path, config.host_key.as_deref()).await?;
    tracing::info!(
        "Host key fingerprint: {}",
        host_key.public_key().fingerprint(HashAlg::Sha256)
    );

    // Open the lease and service tables
    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::open(&config.database_path)
            .with_context(|| format!("Failed to open database {:?}", config.database_path))?,
    );
    tracing::info!("Using database {:?}", config.database_path);

    let authenticator =
        Authenticator::from_config(&config).context("Failed to set up identity directory")?;

    let bind_addr = config.bind_address.clone();
    let state = Arc::new(CoordinatorState::new(config, store, authenticator));

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Setup signal handlers
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel_clone.cancel();
    });

    let server = SshServer::new(host_key, Arc::clone(&state), cancel.clone());

    tracing::info!("Starting SSH server on {}", bind_addr);
    server.run(&bind_addr).await?;

    tracing::info!("Coordinator shutdown complete");
    Ok(())
}
