//! In-memory fakes for the transport and repository seams (test builds only).

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::auth::{Credentials, LoginPhase};
use super::client::{ApiError, ApiRequest, ApiResponse, Transport};
use super::repository::Repository;
use super::types::{Metadata, ObjectMetadata, ObjectRef, SpecialHeaders};

type Handler = Box<dyn Fn(&ApiRequest) -> Result<ApiResponse, ApiError> + Send + Sync>;

/// Transport that replays queued responses or answers through a handler,
/// recording every request it sees.
pub struct ScriptedTransport {
    queue: Mutex<VecDeque<Result<ApiResponse, ApiError>>>,
    handler: Option<Handler>,
    sent: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<Result<ApiResponse, ApiError>>) -> Self {
        Self {
            queue: Mutex::new(responses.into()),
            handler: None,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn with_handler(
        handler: impl Fn(&ApiRequest) -> Result<ApiResponse, ApiError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            handler: Some(Box::new(handler)),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<ApiRequest> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        self.sent.lock().unwrap().push(request.clone());
        if let Some(handler) = &self.handler {
            return handler(request);
        }
        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(ApiResponse {
                    status: 404,
                    ..Default::default()
                })
            })
    }

    async fn probe(&self, _url: &str) -> Result<(), ApiError> {
        Ok(())
    }
}

/// JSON response helper.
pub fn json_response(body: &str) -> Result<ApiResponse, ApiError> {
    Ok(ApiResponse {
        status: 200,
        headers: HashMap::new(),
        body: body.as_bytes().to_vec(),
    })
}

/// Status-only response helper.
pub fn status_response(status: u16) -> Result<ApiResponse, ApiError> {
    Ok(ApiResponse {
        status,
        ..Default::default()
    })
}

fn listing_error(what: &str) -> ApiError {
    ApiError::Status {
        url: format!("https://mock.invalid/{}", what),
        status: 500,
    }
}

/// Repository serving a fixed hierarchy from memory.
pub struct MockRepository {
    name: String,
    hidden: bool,
    projects: Vec<Metadata>,
    containers: HashMap<String, Vec<Metadata>>,
    objects: HashMap<(String, String), Vec<ObjectMetadata>>,
    data: HashMap<String, Vec<u8>>,
    headers: SpecialHeaders,
    fail_top_level: bool,
    fail_probe: bool,
    probe_status: Option<u16>,
    failing_projects: HashSet<String>,
    failing_containers: HashSet<(String, String)>,
    header_probes: AtomicUsize,
    teardowns: AtomicUsize,
    ranges: Mutex<Vec<(u64, u64)>>,
}

impl MockRepository {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            hidden: false,
            projects: Vec::new(),
            containers: HashMap::new(),
            objects: HashMap::new(),
            data: HashMap::new(),
            headers: SpecialHeaders::default(),
            fail_top_level: false,
            fail_probe: false,
            probe_status: None,
            failing_projects: HashSet::new(),
            failing_containers: HashSet::new(),
            header_probes: AtomicUsize::new(0),
            teardowns: AtomicUsize::new(0),
            ranges: Mutex::new(Vec::new()),
        }
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn with_project(mut self, name: &str, bytes: i64) -> Self {
        self.projects.push(Metadata {
            name: name.to_string(),
            bytes,
            count: None,
        });
        self
    }

    pub fn with_container(mut self, project: &str, name: &str, bytes: i64) -> Self {
        self.containers
            .entry(project.to_string())
            .or_default()
            .push(Metadata {
                name: name.to_string(),
                bytes,
                count: None,
            });
        self
    }

    pub fn with_objects(mut self, project: &str, container: &str, keys: &[(&str, i64)]) -> Self {
        let list = self
            .objects
            .entry((project.to_string(), container.to_string()))
            .or_default();
        list.extend(keys.iter().map(|(key, bytes)| ObjectMetadata {
            name: key.to_string(),
            bytes: *bytes,
            content_type: None,
            hash: None,
            last_modified: None,
        }));
        self
    }

    pub fn with_data(mut self, key: &str, bytes: &[u8]) -> Self {
        self.data.insert(key.to_string(), bytes.to_vec());
        self
    }

    pub fn with_headers(mut self, headers: SpecialHeaders) -> Self {
        self.headers = headers;
        self
    }

    pub fn failing_top_level(mut self) -> Self {
        self.fail_top_level = true;
        self
    }

    pub fn failing_containers(mut self, project: &str) -> Self {
        self.failing_projects.insert(project.to_string());
        self
    }

    pub fn failing_objects(mut self, project: &str, container: &str) -> Self {
        self.failing_containers
            .insert((project.to_string(), container.to_string()));
        self
    }

    pub fn failing_probe(mut self) -> Self {
        self.fail_probe = true;
        self
    }

    /// Answer header probes with an HTTP error status.
    pub fn probe_status(mut self, status: u16) -> Self {
        self.probe_status = Some(status);
        self
    }

    pub fn header_probes(&self) -> usize {
        self.header_probes.load(Ordering::SeqCst)
    }

    pub fn teardowns(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }

    /// Ranges requested through `fetch_range`, end-exclusive.
    pub fn ranges(&self) -> Vec<(u64, u64)> {
        self.ranges.lock().unwrap().clone()
    }
}

#[async_trait]
impl Repository for MockRepository {
    fn name(&self) -> &str {
        &self.name
    }

    async fn authenticate(&self, _credentials: &Credentials) -> Result<(), ApiError> {
        Ok(())
    }

    async fn refresh_tokens(&self) {}

    fn login_phase(&self) -> LoginPhase {
        LoginPhase::LoggedIn
    }

    async fn check_connection(&self) -> Result<(), ApiError> {
        Ok(())
    }

    async fn list_top_level(&self) -> Result<Vec<Metadata>, ApiError> {
        if self.fail_top_level {
            return Err(listing_error("projects"));
        }
        Ok(self.projects.clone())
    }

    async fn list_second_level(&self, project: &str) -> Result<Vec<Metadata>, ApiError> {
        if self.failing_projects.contains(project) {
            return Err(listing_error(project));
        }
        Ok(self.containers.get(project).cloned().unwrap_or_default())
    }

    async fn list_third_level(
        &self,
        project: &str,
        container: &str,
    ) -> Result<Vec<ObjectMetadata>, ApiError> {
        let key = (project.to_string(), container.to_string());
        if self.failing_containers.contains(&key) {
            return Err(listing_error(container));
        }
        Ok(self.objects.get(&key).cloned().unwrap_or_default())
    }

    async fn fetch_range(
        &self,
        object: &ObjectRef,
        start: u64,
        end: u64,
    ) -> Result<Vec<u8>, ApiError> {
        self.ranges.lock().unwrap().push((start, end));
        let data = self.data.get(&object.key).ok_or(ApiError::Status {
            url: format!("https://mock.invalid/{}", object.key),
            status: 404,
        })?;
        let start = (start as usize).min(data.len());
        let end = (end as usize).min(data.len());
        Ok(data[start..end].to_vec())
    }

    async fn fetch_special_headers(&self, object: &ObjectRef) -> Result<SpecialHeaders, ApiError> {
        self.header_probes.fetch_add(1, Ordering::SeqCst);
        if self.fail_probe {
            return Err(ApiError::Transport {
                url: format!("https://mock.invalid/{}", object.key),
                message: "connection reset".to_string(),
            });
        }
        if let Some(status) = self.probe_status {
            return Err(ApiError::Status {
                url: format!("https://mock.invalid/{}", object.key),
                status,
            });
        }
        Ok(self.headers)
    }

    fn is_expiry_error(&self, err: &ApiError) -> bool {
        err.status() == Some(401)
    }

    fn is_hidden(&self) -> bool {
        self.hidden
    }

    fn certificate_path(&self) -> Option<&Path> {
        None
    }

    fn teardown(&self) {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
    }
}
