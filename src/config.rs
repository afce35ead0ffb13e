//! Environment-based configuration.
//!
//! Read once at startup (after `.env` is loaded). Errors here are the only
//! ones that terminate the process before login.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;
use thiserror::Error;

use crate::api::client::{HTTP_RETRY, REQUEST_TIMEOUT};
use crate::ingest::DEFAULT_WORKERS;
use crate::registry::types::RepositoryKind;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} is not set")]
    Missing { var: String },

    #[error("{var}={value:?} is not a valid URL: {reason}")]
    InvalidUrl {
        var: String,
        value: String,
        reason: String,
    },

    #[error("{var}={value:?} must use the https scheme")]
    InsecureUrl { var: String, value: String },

    #[error("{var}={value:?} is not a valid {expected}")]
    InvalidValue {
        var: String,
        value: String,
        expected: &'static str,
    },

    #[error("No repository is enabled; set STRATAFS_SWIFT_METADATA_API or STRATAFS_ARCHIVE_METADATA_API")]
    NoRepositories,
}

/// Endpoints and flags of one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryConfig {
    pub kind: RepositoryKind,
    pub metadata_url: String,
    pub data_url: String,
    /// Extra PEM bundle to trust.
    pub cert_path: Option<PathBuf>,
    /// Log in but keep out of the filesystem root.
    pub hidden: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub repositories: Vec<RepositoryConfig>,
    pub request_timeout: Duration,
    pub http_retry: u32,
    pub workers: usize,
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read configuration through `lookup`, which returns a variable's value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let mut repositories = Vec::new();
        for kind in RepositoryKind::ALL {
            let prefix = kind.env_prefix();
            let metadata_var = format!("{}METADATA_API", prefix);
            let data_var = format!("{}DATA_API", prefix);
            let enabled_var = format!("{}ENABLED", prefix);
            let hidden_var = format!("{}HIDDEN", prefix);

            let metadata_url = get(&metadata_var);
            let enabled = match get(&enabled_var) {
                Some(value) => parse_bool(&enabled_var, &value)?,
                None => metadata_url.is_some(),
            };
            if !enabled {
                log::debug!("Repository {} disabled", kind);
                continue;
            }

            let metadata_url = metadata_url.ok_or(ConfigError::Missing { var: metadata_var.clone() })?;
            let data_url = get(&data_var).ok_or(ConfigError::Missing { var: data_var.clone() })?;
            verify_url(&metadata_var, &metadata_url)?;
            verify_url(&data_var, &data_url)?;

            let hidden = match get(&hidden_var) {
                Some(value) => parse_bool(&hidden_var, &value)?,
                None => false,
            };

            repositories.push(RepositoryConfig {
                kind,
                metadata_url,
                data_url,
                cert_path: get(&format!("{}CERTS", prefix)).map(PathBuf::from),
                hidden,
            });
        }

        if repositories.is_empty() {
            return Err(ConfigError::NoRepositories);
        }

        let request_timeout = match get("STRATAFS_HTTP_TIMEOUT") {
            Some(value) => Duration::from_secs(parse_number("STRATAFS_HTTP_TIMEOUT", &value)?),
            None => REQUEST_TIMEOUT,
        };
        let http_retry = match get("STRATAFS_HTTP_RETRY") {
            Some(value) => parse_number("STRATAFS_HTTP_RETRY", &value)?,
            None => HTTP_RETRY,
        };
        let workers = match get("STRATAFS_WORKERS") {
            Some(value) => parse_number("STRATAFS_WORKERS", &value)?,
            None => DEFAULT_WORKERS,
        };

        Ok(Self {
            repositories,
            request_timeout,
            http_retry,
            workers,
        })
    }
}

/// Endpoint URLs must parse and use https.
pub fn verify_url(var: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        var: var.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })?;
    if url.scheme() != "https" {
        return Err(ConfigError::InsecureUrl {
            var: var.to_string(),
            value: value.to_string(),
        });
    }
    Ok(())
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var: var.to_string(),
            value: value.to_string(),
            expected: "boolean",
        }),
    }
}

/// Positive integer that fits in `T`.
fn parse_number<T: TryFrom<u64>>(var: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|n| *n > 0)
        .and_then(|n| T::try_from(n).ok())
        .ok_or_else(|| ConfigError::InvalidValue {
            var: var.to_string(),
            value: value.to_string(),
            expected: "positive integer",
        })
}
