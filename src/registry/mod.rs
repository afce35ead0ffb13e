//! Registry of the repositories backing one mount session.
//!
//! Built explicitly from configuration and passed to the tree builder and the
//! filesystem; torn down when the session ends. Repositories are keyed by
//! their [`Repository::name`], which is also what every file node records.

pub mod types;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::api::archive::ArchiveRepository;
use crate::api::auth::Credentials;
use crate::api::client::RequestExecutor;
use crate::api::repository::Repository;
use crate::api::swift::SwiftRepository;
use crate::config::RepositoryConfig;
use types::RepositoryKind;

#[derive(Default)]
pub struct RepositoryRegistry {
    repositories: BTreeMap<String, Arc<dyn Repository>>,
}

impl RepositoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate one repository per configuration entry.
    pub fn from_configs(configs: &[RepositoryConfig], executor: Arc<RequestExecutor>) -> Result<Self, String> {
        let mut registry = Self::new();
        for config in configs {
            let repository: Arc<dyn Repository> = match config.kind {
                RepositoryKind::Swift => Arc::new(SwiftRepository::new(config, executor.clone())),
                RepositoryKind::Archive => Arc::new(ArchiveRepository::new(config, executor.clone())),
            };
            registry.register(repository)?;
        }
        Ok(registry)
    }

    /// Add a repository; names must be unique.
    pub fn register(&mut self, repository: Arc<dyn Repository>) -> Result<(), String> {
        let name = repository.name().to_string();
        if self.repositories.contains_key(&name) {
            return Err(format!("Repository {} registered twice", name));
        }
        log::debug!("Registered repository {}", name);
        self.repositories.insert(name, repository);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Repository>> {
        self.repositories.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.repositories.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.repositories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }

    /// Repositories listed under the filesystem root, in name order.
    pub fn visible(&self) -> Vec<Arc<dyn Repository>> {
        self.repositories
            .values()
            .filter(|r| !r.is_hidden())
            .cloned()
            .collect()
    }

    /// CA bundles requested by any repository.
    pub fn certificate_paths(configs: &[RepositoryConfig]) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = configs.iter().filter_map(|c| c.cert_path.clone()).collect();
        paths.sort();
        paths.dedup();
        paths
    }

    /// Probe every repository's endpoints.
    pub async fn check_connections(&self) -> Result<(), String> {
        for (name, repository) in &self.repositories {
            repository
                .check_connection()
                .await
                .map_err(|e| format!("Cannot reach {}: {}", name, e))?;
        }
        Ok(())
    }

    /// Log in to every repository; any failure aborts.
    pub async fn login_all(&self, credentials: &Credentials) -> Result<(), String> {
        for (name, repository) in &self.repositories {
            repository
                .authenticate(credentials)
                .await
                .map_err(|e| format!("Login to {} failed: {}", name, e))?;
        }
        Ok(())
    }

    /// Drop every repository's tokens.
    pub fn teardown(&self) {
        for (name, repository) in &self.repositories {
            repository.teardown();
            log::debug!("Tore down repository {}", name);
        }
    }
}
