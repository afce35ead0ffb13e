//! Credential handling and the per-repository token lifecycle.
//!
//! Every repository owns one [`TokenManager`]. Login fetches an unscoped
//! token, seeds the scoped-token map from the project list, then fetches each
//! project's scoped token best-effort. A request that fails with 401 while
//! logged in triggers one full refresh sweep and is retried exactly once.
//!
//! Token material lives behind `std::sync` locks that are never held across
//! an `.await`; sweeps are serialized by an async mutex.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use zeroize::Zeroizing;

use super::client::{ApiError, Authorization};
use super::types::ScopedToken;

/// Username/password pair supplied at login.
pub struct Credentials {
    username: String,
    password: Zeroizing<String>,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: Zeroizing::new(password.to_string()),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// `base64(username:password)` for HTTP Basic auth.
    pub fn basic_token(&self) -> Zeroizing<String> {
        let raw = Zeroizing::new(format!("{}:{}", self.username, self.password.as_str()));
        Zeroizing::new(STANDARD.encode(raw.as_bytes()))
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Login state of one repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginPhase {
    LoggedOut,
    LoggingIn,
    LoggedIn,
}

/// Tokens held for one repository. Empty strings mean "unavailable".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenState {
    pub unscoped: String,
    pub scoped: HashMap<String, ScopedToken>,
}

/// Raw token endpoints of a repository, called without expiry handling.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_unscoped(&self) -> Result<String, ApiError>;

    /// Names of the projects that need scoped tokens.
    async fn fetch_projects(&self) -> Result<Vec<String>, ApiError>;

    async fn fetch_scoped(&self, project: &str) -> Result<ScopedToken, ApiError>;
}

/// Owns the token state of one repository.
pub struct TokenManager {
    repository: String,
    phase: Mutex<LoginPhase>,
    state: RwLock<TokenState>,
    basic: RwLock<Option<Zeroizing<String>>>,
    /// Bumped after every completed sweep.
    generation: AtomicU64,
    sweep: tokio::sync::Mutex<()>,
}

impl TokenManager {
    pub fn new(repository: &str) -> Self {
        Self {
            repository: repository.to_string(),
            phase: Mutex::new(LoginPhase::LoggedOut),
            state: RwLock::new(TokenState::default()),
            basic: RwLock::new(None),
            generation: AtomicU64::new(0),
            sweep: tokio::sync::Mutex::new(()),
        }
    }

    pub fn phase(&self) -> LoginPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, phase: LoginPhase) {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
    }

    /// Snapshot of the current tokens.
    pub fn state(&self) -> TokenState {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn unscoped(&self) -> String {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .unscoped
            .clone()
    }

    /// Scoped token for `project`; empty when none is known.
    pub fn scoped(&self, project: &str) -> ScopedToken {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .scoped
            .get(project)
            .cloned()
            .unwrap_or_default()
    }

    /// Authorization for a request: bearer `token` if present, else Basic credentials.
    pub fn authorization(&self, token: &str) -> Authorization {
        if !token.is_empty() {
            return Authorization::Bearer(token.to_string());
        }
        match self.basic.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            Some(basic) => Authorization::Basic(basic.to_string()),
            None => Authorization::None,
        }
    }

    /// Basic credentials only, for the token endpoints themselves.
    pub fn basic_authorization(&self) -> Authorization {
        self.authorization("")
    }

    /// Log in with `credentials`.
    ///
    /// Fails if the unscoped token or the project list cannot be fetched.
    /// Scoped tokens are fetched best-effort afterwards.
    pub async fn login(
        &self,
        source: &dyn TokenSource,
        credentials: &Credentials,
    ) -> Result<(), ApiError> {
        let _guard = self.sweep.lock().await;
        self.set_phase(LoginPhase::LoggingIn);
        *self.basic.write().unwrap_or_else(|e| e.into_inner()) = Some(credentials.basic_token());

        let unscoped = match source.fetch_unscoped().await {
            Ok(token) => token,
            Err(e) => {
                self.set_phase(LoginPhase::LoggedOut);
                return Err(e);
            }
        };
        self.state.write().unwrap_or_else(|e| e.into_inner()).unscoped = unscoped;

        let projects = match source.fetch_projects().await {
            Ok(projects) => projects,
            Err(e) => {
                self.set_phase(LoginPhase::LoggedOut);
                return Err(e);
            }
        };
        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            state.scoped = projects
                .into_iter()
                .map(|p| (p, ScopedToken::default()))
                .collect();
        }

        self.set_phase(LoginPhase::LoggedIn);
        self.fetch_scoped_tokens(source).await;
        self.generation.fetch_add(1, Ordering::SeqCst);

        log::info!(
            "Logged in to {} as {}",
            self.repository,
            credentials.username()
        );
        Ok(())
    }

    /// Run a full refresh sweep, serialized with any other sweep.
    pub async fn refresh(&self, source: &dyn TokenSource) {
        let _guard = self.sweep.lock().await;
        self.sweep_locked(source).await;
    }

    /// Refresh unless another caller already completed a sweep since `generation`.
    async fn refresh_after(&self, source: &dyn TokenSource, generation: u64) {
        let _guard = self.sweep.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            log::debug!("{} tokens already refreshed", self.repository);
            return;
        }
        self.sweep_locked(source).await;
    }

    async fn sweep_locked(&self, source: &dyn TokenSource) {
        self.set_phase(LoginPhase::LoggedOut);

        let unscoped = match source.fetch_unscoped().await {
            Ok(token) => token,
            Err(e) => {
                log::warn!(
                    "Failed to refresh unscoped token for {}, requests may be slower: {}",
                    self.repository,
                    e
                );
                String::new()
            }
        };
        self.state.write().unwrap_or_else(|e| e.into_inner()).unscoped = unscoped;

        self.fetch_scoped_tokens(source).await;
        self.set_phase(LoginPhase::LoggedIn);
        self.generation.fetch_add(1, Ordering::SeqCst);
        log::info!("Fetched tokens for {}", self.repository);
    }

    async fn fetch_scoped_tokens(&self, source: &dyn TokenSource) {
        let projects: Vec<String> = self
            .state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .scoped
            .keys()
            .cloned()
            .collect();

        for project in projects {
            let token = match source.fetch_scoped(&project).await {
                Ok(token) => token,
                Err(e) => {
                    log::warn!(
                        "Failed to get scoped token for {} project {:?}, requests may be slower: {}",
                        self.repository,
                        project,
                        e
                    );
                    ScopedToken::default()
                }
            };
            self.state
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .scoped
                .insert(project, token);
        }
    }

    /// A 401 received while logged in means the tokens expired.
    pub fn is_expiry(&self, err: &ApiError) -> bool {
        err.status() == Some(401) && self.phase() == LoginPhase::LoggedIn
    }

    /// Run `op`; on token expiry refresh once and run it exactly once more.
    pub async fn authorized<T, F, Fut>(&self, source: &dyn TokenSource, op: F) -> Result<T, ApiError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let generation = self.generation.load(Ordering::SeqCst);
        match op().await {
            Err(e) if self.is_expiry(&e) => {
                log::info!(
                    "{} tokens no longer valid, fetching them again",
                    self.repository
                );
                self.refresh_after(source, generation).await;
                op().await
            }
            other => other,
        }
    }

    /// Forget every token and credential.
    pub fn clear(&self) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = TokenState::default();
        *self.basic.write().unwrap_or_else(|e| e.into_inner()) = None;
        self.set_phase(LoginPhase::LoggedOut);
    }
}
