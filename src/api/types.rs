//! Request and response types for the object-store metadata and data APIs.
//!
//! Listing endpoints return JSON arrays; token endpoints return small objects.
//! Field names follow the backend's JSON (snake_case, except `projectID`).

use std::collections::HashMap;

use serde::Deserialize;

/// Response header flagging that the backend decrypts the object on the fly.
pub const HEADER_DECRYPTED: &str = "x-decrypted";

/// Response header carrying the real size of a segment-uploaded object.
pub const HEADER_SEGMENTED_SIZE: &str = "x-segmented-object-size";

/// Response header carrying the encryption header length in bytes.
pub const HEADER_HEADER_SIZE: &str = "x-header-size";

/// One entry of a top- or second-level listing (project or container).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Metadata {
    pub name: String,
    #[serde(default)]
    pub bytes: i64,
    /// Number of objects, reported for containers only.
    #[serde(default)]
    pub count: Option<u64>,
}

/// One entry of an object listing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ObjectMetadata {
    /// Full object key; may contain `/` separators.
    pub name: String,
    #[serde(default)]
    pub bytes: i64,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub last_modified: Option<String>,
}

impl ObjectMetadata {
    /// Keys ending with `/` are explicitly created empty directories.
    pub fn is_directory_marker(&self) -> bool {
        self.name.ends_with('/')
    }
}

/// Response from `GET /token`.
#[derive(Debug, Deserialize)]
pub struct UnscopedToken {
    pub token: String,
}

/// Project-scoped token plus the project identifier some endpoints require.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ScopedToken {
    pub token: String,
    #[serde(rename = "projectID", default)]
    pub project_id: String,
}

/// Per-object headers that determine the size reported to the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpecialHeaders {
    /// Backend serves plaintext of an encrypted object.
    pub decrypted: bool,
    /// Size of the merged object when it was uploaded in segments.
    /// Backends send `-1` for objects that are not segmented.
    pub segmented_size: Option<i64>,
    /// Length of the encryption header.
    pub header_size: i64,
}

impl SpecialHeaders {
    /// Parse the special headers out of a response header map (lowercase keys).
    pub fn from_headers(headers: &HashMap<String, String>) -> Result<Self, String> {
        let decrypted = headers
            .get(HEADER_DECRYPTED)
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let segmented_size = headers
            .get(HEADER_SEGMENTED_SIZE)
            .map(|v| parse_size(HEADER_SEGMENTED_SIZE, v))
            .transpose()?
            .filter(|size| *size >= 0);

        let header_size = match headers.get(HEADER_HEADER_SIZE) {
            Some(v) => parse_size(HEADER_HEADER_SIZE, v)?,
            None => 0,
        };

        Ok(Self {
            decrypted,
            segmented_size,
            header_size,
        })
    }
}

fn parse_size(name: &str, value: &str) -> Result<i64, String> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|e| format!("Invalid {} header {:?}: {}", name, value, e))
}

/// Remote coordinates of a file node, kept unsanitized.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    /// Registry name of the repository that serves the object.
    pub repository: String,
    pub project: String,
    pub container: String,
    pub key: String,
}

impl ObjectRef {
    pub fn new(repository: &str, project: &str, container: &str, key: &str) -> Self {
        Self {
            repository: repository.to_string(),
            project: project.to_string(),
            container: container.to_string(),
            key: key.to_string(),
        }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}/{}/{}",
            self.repository, self.project, self.container, self.key
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_special_headers_absent() {
        let parsed = SpecialHeaders::from_headers(&HashMap::new()).unwrap();
        assert_eq!(parsed, SpecialHeaders::default());
        assert!(parsed.segmented_size.is_none());
    }

    #[test]
    fn test_special_headers_decrypted_segmented() {
        let parsed = SpecialHeaders::from_headers(&headers(&[
            (HEADER_DECRYPTED, "True"),
            (HEADER_SEGMENTED_SIZE, "131228"),
            (HEADER_HEADER_SIZE, "124"),
        ]))
        .unwrap();
        assert!(parsed.decrypted);
        assert_eq!(parsed.segmented_size, Some(131228));
        assert_eq!(parsed.header_size, 124);
    }

    #[test]
    fn test_special_headers_negative_segmented_size_means_unsegmented() {
        let parsed =
            SpecialHeaders::from_headers(&headers(&[(HEADER_SEGMENTED_SIZE, "-1")])).unwrap();
        assert_eq!(parsed.segmented_size, None);
    }

    #[test]
    fn test_special_headers_rejects_garbage() {
        let err = SpecialHeaders::from_headers(&headers(&[(HEADER_HEADER_SIZE, "lots")]))
            .unwrap_err();
        assert!(err.contains("x-header-size"));
    }

    #[test]
    fn test_scoped_token_json() {
        let token: ScopedToken =
            serde_json::from_str(r#"{"token": "abc", "projectID": "p-1"}"#).unwrap();
        assert_eq!(token.token, "abc");
        assert_eq!(token.project_id, "p-1");
    }

    #[test]
    fn test_object_listing_json() {
        let objects: Vec<ObjectMetadata> = serde_json::from_str(
            r#"[{"name": "dir/", "bytes": 0},
                {"name": "dir/file.c4gh", "bytes": 130, "content_type": "application/octet-stream", "hash": "d41d8cd9"}]"#,
        )
        .unwrap();
        assert!(objects[0].is_directory_marker());
        assert!(!objects[1].is_directory_marker());
        assert_eq!(objects[1].hash.as_deref(), Some("d41d8cd9"));
    }
}
