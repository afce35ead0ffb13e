//! The capability set every storage backend implements.
//!
//! A repository exposes a three-level hierarchy (project, container, object
//! key) plus ranged data access. Concrete repositories differ only in endpoint
//! shape and token scoping; each owns its [`TokenManager`](super::auth::TokenManager).

use std::path::Path;

use async_trait::async_trait;

use super::auth::{Credentials, LoginPhase};
use super::client::{ApiError, ApiResponse};
use super::types::{Metadata, ObjectMetadata, ObjectRef, SpecialHeaders};
use crate::crypto::sizing::decrypted_size;

#[async_trait]
pub trait Repository: Send + Sync {
    /// Registry key, also stored in every [`ObjectRef`] this repository serves.
    fn name(&self) -> &str;

    /// Log in and fetch all tokens.
    async fn authenticate(&self, credentials: &Credentials) -> Result<(), ApiError>;

    /// Re-fetch every token.
    async fn refresh_tokens(&self);

    /// Current login state.
    fn login_phase(&self) -> LoginPhase;

    /// Check that the configured endpoints are reachable.
    async fn check_connection(&self) -> Result<(), ApiError>;

    /// Projects, each with its byte total.
    async fn list_top_level(&self) -> Result<Vec<Metadata>, ApiError>;

    /// Containers of `project`, each with its byte total.
    async fn list_second_level(&self, project: &str) -> Result<Vec<Metadata>, ApiError>;

    /// Every object in `container`.
    async fn list_third_level(
        &self,
        project: &str,
        container: &str,
    ) -> Result<Vec<ObjectMetadata>, ApiError>;

    /// Bytes `[start, end)` of `object`.
    async fn fetch_range(&self, object: &ObjectRef, start: u64, end: u64)
        -> Result<Vec<u8>, ApiError>;

    /// Probe `object` with a two-byte range request and parse its special headers.
    async fn fetch_special_headers(&self, object: &ObjectRef) -> Result<SpecialHeaders, ApiError>;

    /// Whether `err` means the tokens of this repository expired.
    fn is_expiry_error(&self, err: &ApiError) -> bool;

    /// Hidden repositories are logged in but not listed under the root.
    fn is_hidden(&self) -> bool;

    /// Extra CA bundle to trust for this repository's endpoints.
    fn certificate_path(&self) -> Option<&Path>;

    /// Drop tokens and credentials.
    fn teardown(&self);
}

const RANGE_NOT_SATISFIABLE: u16 = 416;

/// Parse the special headers of a probe response.
pub(crate) fn special_headers(resp: &ApiResponse, url: &str) -> Result<SpecialHeaders, ApiError> {
    SpecialHeaders::from_headers(&resp.headers).map_err(|message| ApiError::Decode {
        url: url.to_string(),
        message,
    })
}

/// Size to report for `object`, refining the metadata size with its special headers.
///
/// A segmented object's real size replaces `reported`. A transparently
/// decrypted object is reported at its plaintext size; if the stored size is
/// too small to be a valid encrypted object the undecrypted size is kept.
/// An empty object answers the 2-byte probe with 416 and keeps `reported`.
pub async fn logical_size(
    repository: &dyn Repository,
    object: &ObjectRef,
    reported: u64,
) -> Result<u64, ApiError> {
    let headers = match repository.fetch_special_headers(object).await {
        Ok(headers) => headers,
        Err(e) if e.status() == Some(RANGE_NOT_SATISFIABLE) => {
            log::debug!("{} has no bytes to probe, keeping size {}", object, reported);
            return Ok(reported);
        }
        Err(e) => return Err(e),
    };
    let mut size = reported as i64;

    if let Some(segmented) = headers.segmented_size.filter(|s| *s >= 0) {
        log::debug!("{} is segmented, real size {}", object, segmented);
        size = segmented;
    }

    if headers.decrypted {
        match decrypted_size(size, headers.header_size) {
            Some(plain) => size = plain,
            None => log::warn!(
                "{} is served decrypted but its size {} is too small for header size {}; reporting encrypted size",
                object,
                size,
                headers.header_size
            ),
        }
    }

    Ok(size.max(0) as u64)
}
