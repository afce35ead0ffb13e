//! Object store with per-project scoped tokens.
//!
//! Metadata lives under `/projects`, `/project/{p}/containers` and
//! `/project/{p}/container/{c}/objects`; data is served from
//! `/data?project=&container=&object=`. Project-level requests carry the
//! project's scoped token and its `X-Project-ID`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use urlencoding::encode;

use super::auth::{Credentials, LoginPhase, TokenManager, TokenSource};
use super::client::{ApiError, ApiRequest, ApiResponse, RequestExecutor};
use super::repository::{special_headers, Repository};
use super::types::{Metadata, ObjectMetadata, ObjectRef, ScopedToken, SpecialHeaders, UnscopedToken};
use crate::config::RepositoryConfig;

/// Registry key of this repository kind.
pub const NAME: &str = "swift";

/// Header naming the project a scoped request acts on.
const PROJECT_ID_HEADER: &str = "X-Project-ID";

pub struct SwiftRepository {
    metadata_url: String,
    data_url: String,
    executor: Arc<RequestExecutor>,
    tokens: TokenManager,
    hidden: bool,
    cert_path: Option<PathBuf>,
}

impl SwiftRepository {
    pub fn new(config: &RepositoryConfig, executor: Arc<RequestExecutor>) -> Self {
        Self {
            metadata_url: config.metadata_url.trim_end_matches('/').to_string(),
            data_url: config.data_url.trim_end_matches('/').to_string(),
            executor,
            tokens: TokenManager::new(NAME),
            hidden: config.hidden,
            cert_path: config.cert_path.clone(),
        }
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// Request authorized with `project`'s scoped token.
    fn scoped_request(&self, url: String, project: &str) -> ApiRequest {
        let scoped = self.tokens.scoped(project);
        let request = ApiRequest::get(url).auth(self.tokens.authorization(&scoped.token));
        if scoped.project_id.is_empty() {
            request
        } else {
            request.header(PROJECT_ID_HEADER, &scoped.project_id)
        }
    }

    async fn request_projects(&self) -> Result<Vec<Metadata>, ApiError> {
        let request = ApiRequest::get(format!("{}/projects", self.metadata_url))
            .auth(self.tokens.authorization(&self.tokens.unscoped()));
        self.executor.get_json(&request).await
    }

    async fn request_containers(&self, project: &str) -> Result<Vec<Metadata>, ApiError> {
        let url = format!("{}/project/{}/containers", self.metadata_url, encode(project));
        self.executor
            .get_json(&self.scoped_request(url, project))
            .await
    }

    async fn request_objects(
        &self,
        project: &str,
        container: &str,
    ) -> Result<Vec<ObjectMetadata>, ApiError> {
        let url = format!(
            "{}/project/{}/container/{}/objects",
            self.metadata_url,
            encode(project),
            encode(container)
        );
        self.executor
            .get_json(&self.scoped_request(url, project))
            .await
    }

    async fn request_data(
        &self,
        object: &ObjectRef,
        start: u64,
        end: u64,
    ) -> Result<ApiResponse, ApiError> {
        let request = self
            .scoped_request(format!("{}/data", self.data_url), &object.project)
            .query("project", &object.project)
            .query("container", &object.container)
            .query("object", &object.key)
            .range(start, end);
        self.executor.execute(&request).await
    }
}

#[async_trait]
impl TokenSource for SwiftRepository {
    async fn fetch_unscoped(&self) -> Result<String, ApiError> {
        let request = ApiRequest::get(format!("{}/token", self.metadata_url))
            .auth(self.tokens.basic_authorization());
        let token: UnscopedToken = self.executor.get_json(&request).await?;
        Ok(token.token)
    }

    async fn fetch_projects(&self) -> Result<Vec<String>, ApiError> {
        Ok(self
            .request_projects()
            .await?
            .into_iter()
            .map(|p| p.name)
            .collect())
    }

    async fn fetch_scoped(&self, project: &str) -> Result<ScopedToken, ApiError> {
        let request = ApiRequest::get(format!("{}/token", self.metadata_url))
            .auth(self.tokens.basic_authorization())
            .query("project", project);
        self.executor.get_json(&request).await
    }
}

#[async_trait]
impl Repository for SwiftRepository {
    fn name(&self) -> &str {
        NAME
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<(), ApiError> {
        self.tokens.login(self, credentials).await
    }

    async fn refresh_tokens(&self) {
        self.tokens.refresh(self).await
    }

    fn login_phase(&self) -> LoginPhase {
        self.tokens.phase()
    }

    async fn check_connection(&self) -> Result<(), ApiError> {
        self.executor.probe(&self.metadata_url).await?;
        self.executor.probe(&self.data_url).await
    }

    async fn list_top_level(&self) -> Result<Vec<Metadata>, ApiError> {
        self.tokens
            .authorized(self, move || self.request_projects())
            .await
    }

    async fn list_second_level(&self, project: &str) -> Result<Vec<Metadata>, ApiError> {
        self.tokens
            .authorized(self, move || self.request_containers(project))
            .await
    }

    async fn list_third_level(
        &self,
        project: &str,
        container: &str,
    ) -> Result<Vec<ObjectMetadata>, ApiError> {
        self.tokens
            .authorized(self, move || self.request_objects(project, container))
            .await
    }

    async fn fetch_range(
        &self,
        object: &ObjectRef,
        start: u64,
        end: u64,
    ) -> Result<Vec<u8>, ApiError> {
        let resp = self
            .tokens
            .authorized(self, move || self.request_data(object, start, end))
            .await?;
        Ok(resp.body)
    }

    async fn fetch_special_headers(&self, object: &ObjectRef) -> Result<SpecialHeaders, ApiError> {
        let resp = self
            .tokens
            .authorized(self, move || self.request_data(object, 0, 2))
            .await?;
        special_headers(&resp, &self.data_url)
    }

    fn is_expiry_error(&self, err: &ApiError) -> bool {
        self.tokens.is_expiry(err)
    }

    fn is_hidden(&self) -> bool {
        self.hidden
    }

    fn certificate_path(&self) -> Option<&Path> {
        self.cert_path.as_deref()
    }

    fn teardown(&self) {
        self.tokens.clear();
    }
}
