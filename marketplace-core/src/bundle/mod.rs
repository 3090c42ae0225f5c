//! Bundles: named, versioned collections of rule types and profiles
//!
//! A bundle is identified by a [`BundleId`] (`namespace/name`) and read
//! through the [`BundleReader`] trait. The tarball format shipped by
//! marketplace sources lives in [`tarball`].

mod content;
pub mod manifest;
#[cfg(feature = "tarball")]
pub mod tarball;

pub use content::{Profile, ProfileRule, RuleType, Severity};
pub use manifest::{BundleManifest, ManifestFile, ManifestFiles};
#[cfg(feature = "tarball")]
pub use tarball::{TarballBuilder, TarballBundle};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Canonical identity of a bundle
///
/// Equality is componentwise. The text form `namespace/name` is only used
/// for messages and logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BundleId {
    namespace: String,
    name: String,
}

impl BundleId {
    /// Create an id, rejecting empty components and components containing `/`
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Result<Self, BundleError> {
        let namespace = namespace.into();
        let name = name.into();
        validate_component("namespace", &namespace)?;
        validate_component("name", &name)?;
        Ok(Self { namespace, name })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

fn validate_component(field: &str, value: &str) -> Result<(), BundleError> {
    if value.trim().is_empty() {
        return Err(BundleError::InvalidId {
            reason: format!("{field} must not be empty"),
        });
    }
    if value.contains('/') {
        return Err(BundleError::InvalidId {
            reason: format!("{field} '{value}' must not contain '/'"),
        });
    }
    Ok(())
}

/// Metadata carried by every bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleMetadata {
    pub namespace: String,
    pub name: String,

    /// Semantic version of the bundle contents
    pub version: String,

    /// When the bundle was built
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
}

impl BundleMetadata {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            version: version.into(),
            date: None,
        }
    }

    pub fn id(&self) -> BundleId {
        BundleId {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }
}

/// Lazy sequence of the rule types in a bundle
pub type RuleTypeIter<'a> = Box<dyn Iterator<Item = Result<RuleType, BundleError>> + Send + 'a>;

/// Read-only view of a loaded bundle
pub trait BundleReader: Send + Sync {
    fn metadata(&self) -> &BundleMetadata;

    /// Fetch one profile by name
    fn get_profile(&self, name: &str) -> Result<Profile, BundleError>;

    /// Every rule type in the bundle, decoded as the iterator advances.
    ///
    /// Consumers stop at the first `Err`, so a broken rule type halts the
    /// traversal instead of being skipped.
    fn rule_types(&self) -> RuleTypeIter<'_>;
}

/// Errors reading bundle contents
#[derive(Error, Debug)]
pub enum BundleError {
    #[error("invalid bundle id: {reason}")]
    InvalidId { reason: String },

    #[error("profile '{name}' not found in bundle")]
    ProfileNotFound { name: String },

    #[error("file '{path}' listed in manifest is missing from bundle")]
    MissingFile { path: String },

    #[error("digest mismatch for '{path}': expected {expected}, got {actual}")]
    DigestMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("invalid bundle manifest: {reason}")]
    Manifest { reason: String },

    #[error("failed to parse bundle manifest: {0}")]
    ManifestParse(#[from] serde_json::Error),

    #[error("failed to parse '{path}': {source}")]
    Content {
        path: String,
        #[source]
        source: serde_yaml_ng::Error,
    },

    #[error("failed to read bundle archive: {0}")]
    Archive(#[from] std::io::Error),
}
