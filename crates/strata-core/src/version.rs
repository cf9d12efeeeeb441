//! Version references
//!
//! A version reference is an opaque identifier (commit id or tag) naming one
//! installed revision of the toolkit. Two references are the same version
//! exactly when their strings are equal.

use serde::{Deserialize, Serialize};
use std::fmt;

const UNKNOWN: &str = "unknown";

/// Opaque identifier of an installed revision
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionRef(String);

impl VersionRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The placeholder used when no local version can be determined
    pub fn unknown() -> Self {
        Self(UNKNOWN.to_string())
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == UNKNOWN
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for display: full commit ids are cut to 12 characters,
    /// anything else (tags, placeholders) is returned unchanged.
    pub fn short(&self) -> &str {
        if self.0.len() == 40 && self.0.bytes().all(|b| b.is_ascii_hexdigit()) {
            &self.0[..12]
        } else {
            &self.0
        }
    }
}

impl fmt::Display for VersionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VersionRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for VersionRef {
    fn from(value: String) -> Self {
        Self(value)
    }
}
