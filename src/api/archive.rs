//! Archive store authorized by a single unscoped token.
//!
//! Datasets play the role of projects and buckets the role of containers.
//! No scoped tokens exist, so every request uses the unscoped token (or Basic
//! credentials when it could not be fetched).

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
pub const NAME: &str = "archive";

pub struct ArchiveRepository {
    metadata_url: String,
    data_url: String,
    executor: Arc<RequestExecutor>,
    tokens: TokenManager,
    hidden: bool,
    cert_path: Option<PathBuf>,
}

impl ArchiveRepository {
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

    fn request(&self, url: String) -> ApiRequest {
        ApiRequest::get(url).auth(self.tokens.authorization(&self.tokens.unscoped()))
    }

    async fn request_datasets(&self) -> Result<Vec<Metadata>, ApiError> {
        let url = format!("{}/datasets", self.metadata_url);
        self.executor.get_json(&self.request(url)).await
    }

    async fn request_buckets(&self, dataset: &str) -> Result<Vec<Metadata>, ApiError> {
        let url = format!("{}/dataset/{}/buckets", self.metadata_url, encode(dataset));
        self.executor.get_json(&self.request(url)).await
    }

    async fn request_objects(
        &self,
        dataset: &str,
        bucket: &str,
    ) -> Result<Vec<ObjectMetadata>, ApiError> {
        let url = format!(
            "{}/dataset/{}/bucket/{}/objects",
            self.metadata_url,
            encode(dataset),
            encode(bucket)
        );
        self.executor.get_json(&self.request(url)).await
    }

    async fn request_data(
        &self,
        object: &ObjectRef,
        start: u64,
        end: u64,
    ) -> Result<ApiResponse, ApiError> {
        let key = object
            .key
            .split('/')
            .map(|segment| encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let url = format!(
            "{}/object/{}/{}/{}",
            self.data_url,
            encode(&object.project),
            encode(&object.container),
            key
        );
        self.executor
            .execute(&self.request(url).range(start, end))
            .await
    }
}

#[async_trait]
impl TokenSource for ArchiveRepository {
    async fn fetch_unscoped(&self) -> Result<String, ApiError> {
        let request = ApiRequest::get(format!("{}/token", self.metadata_url))
            .auth(self.tokens.basic_authorization());
        let token: UnscopedToken = self.executor.get_json(&request).await?;
        Ok(token.token)
    }

    /// Datasets share the unscoped token, nothing to seed.
    async fn fetch_projects(&self) -> Result<Vec<String>, ApiError> {
        Ok(Vec::new())
    }

    async fn fetch_scoped(&self, project: &str) -> Result<ScopedToken, ApiError> {
        Err(ApiError::Config(format!(
            "{} does not issue scoped tokens (requested for {:?})",
            NAME, project
        )))
    }
}

#[async_trait]
impl Repository for ArchiveRepository {
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
            .authorized(self, move || self.request_datasets())
            .await
    }

    async fn list_second_level(&self, project: &str) -> Result<Vec<Metadata>, ApiError> {
        self.tokens
            .authorized(self, move || self.request_buckets(project))
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
