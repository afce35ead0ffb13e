//! Repository kinds known to the registry.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::api::{archive, swift};

/// Concrete repository implementation selected by configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryKind {
    /// Project-scoped object store.
    Swift,
    /// Archive with a single unscoped token.
    Archive,
}

impl RepositoryKind {
    pub const ALL: [RepositoryKind; 2] = [RepositoryKind::Swift, RepositoryKind::Archive];

    /// Registry key, also used as the environment variable infix.
    pub fn name(self) -> &'static str {
        match self {
            RepositoryKind::Swift => swift::NAME,
            RepositoryKind::Archive => archive::NAME,
        }
    }

    /// Prefix of this kind's environment variables, e.g. `STRATAFS_SWIFT_`.
    pub fn env_prefix(self) -> String {
        format!("STRATAFS_{}_", self.name().to_ascii_uppercase())
    }
}

impl fmt::Display for RepositoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RepositoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RepositoryKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown repository kind {:?}", s))
    }
}
