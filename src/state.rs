//! Mount session state for stratafs.
//!
//! A [`Session`] owns the configuration, the repository registry and the
//! tree for one mount. It is built once at startup and torn down on exit.

use std::sync::{Arc, Mutex, RwLock};

use thiserror::Error;

use crate::api::auth::Credentials;
use crate::api::client::{ApiError, HttpClient, RequestExecutor};
use crate::config::Config;
use crate::fuse::inode::{SharedTree, Tree};
use crate::ingest::{self, PipelineStats};
use crate::registry::RepositoryRegistry;

/// FUSE mount status.
#[derive(Debug, Clone, PartialEq)]
pub enum MountStatus {
    Unmounted,
    Building,
    Mounted,
    Error(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] ApiError),

    #[error("Invalid repository setup: {0}")]
    Registry(String),

    #[error("{0}")]
    Connection(String),

    #[error("{0}")]
    Login(String),
}

pub struct Session {
    pub config: Config,
    /// Repositories, shared with the mounted filesystem.
    pub registry: Arc<RepositoryRegistry>,
    /// Tree, shared with the ingestion workers and the filesystem.
    pub tree: SharedTree,
    status: RwLock<MountStatus>,
}

impl Session {
    /// Session over an already built registry.
    pub fn new(config: Config, registry: RepositoryRegistry) -> Self {
        Self {
            config,
            registry: Arc::new(registry),
            tree: Arc::new(Mutex::new(Tree::new())),
            status: RwLock::new(MountStatus::Unmounted),
        }
    }

    /// Create the HTTP client and repositories, probe every endpoint and log in.
    pub async fn connect(config: Config, credentials: &Credentials) -> Result<Self, SessionError> {
        let cert_paths = RepositoryRegistry::certificate_paths(&config.repositories);
        let client = HttpClient::new(&cert_paths, config.request_timeout)?;
        let executor = Arc::new(RequestExecutor::new(Arc::new(client), config.http_retry));

        let registry = RepositoryRegistry::from_configs(&config.repositories, executor)
            .map_err(SessionError::Registry)?;
        log::info!("Repositories: {}", registry.names().join(", "));

        registry
            .check_connections()
            .await
            .map_err(SessionError::Connection)?;
        registry
            .login_all(credentials)
            .await
            .map_err(SessionError::Login)?;
        log::info!("Logged in as {}", credentials.username());

        Ok(Self::new(config, registry))
    }

    /// Populate the tree from every visible repository.
    pub async fn build_tree(&self) -> PipelineStats {
        self.set_status(MountStatus::Building);
        ingest::build_tree(&self.registry, &self.tree, self.config.workers).await
    }

    pub fn status(&self) -> MountStatus {
        self.status
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_status(&self, status: MountStatus) {
        log::debug!("Mount status: {:?}", status);
        *self.status.write().unwrap_or_else(|e| e.into_inner()) = status;
    }

    /// Forget every token. Called after unmount.
    pub fn shutdown(&self) {
        self.registry.teardown();
        self.set_status(MountStatus::Unmounted);
        log::info!("Session closed");
    }
}
