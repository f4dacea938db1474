//! Shared coordinator state

use std::sync::Arc;

use burrow_core::config::CoordinatorConfig;
use burrow_core::Store;

use crate::auth::Authenticator;
use crate::forward::ForwardHandler;
use crate::lease::LeaseRegistry;
use crate::router::Router;

/// State shared by every connection handler
pub struct CoordinatorState {
    /// Configuration
    pub config: CoordinatorConfig,
    /// Lease and service tables
    pub store: Arc<dyn Store>,
    /// Public key authenticator
    pub authenticator: Authenticator,
    /// Command and global request dispatch
    pub router: Router,
}

impl CoordinatorState {
    /// Wire the handlers for `config` around `store` and `authenticator`
    pub fn new(config: CoordinatorConfig, store: Arc<dyn Store>, authenticator: Authenticator) -> Self {
        let forwards = ForwardHandler::from_config(Arc::clone(&store), &config);
        let leases = LeaseRegistry::from_config(Arc::clone(&store), &config);

        Self {
            router: Router::new(Arc::new(forwards), Arc::new(leases)),
            config,
            store,
            authenticator,
        }
    }

    /// The forward handler
    pub fn forwards(&self) -> &Arc<ForwardHandler> {
        self.router.forwards()
    }
}
