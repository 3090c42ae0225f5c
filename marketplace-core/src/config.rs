//! Marketplace configuration
//!
//! ```yaml
//! marketplace:
//!   enabled: true
//!   sources:
//!     - type: tarball
//!       location: ./bundles/healthcheck.tar.gz
//! ```
//!
//! The `marketplace:` wrapper is optional. A missing file or an empty
//! document yields a disabled marketplace.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

use crate::error::ConfigError;

/// Source type for a local gzip-compressed bundle archive
pub const TARBALL_SOURCE_TYPE: &str = "tarball";

const SECTION_KEY: &str = "marketplace";

/// Top-level marketplace configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketplaceConfig {
    /// Whether the marketplace is active; a disabled marketplace accepts
    /// every call and does nothing
    #[serde(default)]
    pub enabled: bool,

    /// Bundle sources in load order. Later sources win when two sources
    /// provide the same bundle.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

/// One configured bundle source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(rename = "type")]
    pub source_type: String,

    pub location: String,
}

impl SourceConfig {
    pub fn tarball(location: impl Into<String>) -> Self {
        Self {
            source_type: TARBALL_SOURCE_TYPE.to_string(),
            location: location.into(),
        }
    }

    /// The location with `.` dropped and `..` folded, without touching the
    /// filesystem
    pub fn normalized_location(&self) -> PathBuf {
        normalize(Path::new(&self.location))
    }
}

impl MarketplaceConfig {
    /// Parse a YAML document, either the bare configuration or one nested
    /// under a top-level `marketplace:` key
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let mut value: serde_yaml_ng::Value =
            serde_yaml_ng::from_str(content).map_err(|source| ConfigError::Parse { source })?;

        if let Some(section) = value.get(SECTION_KEY) {
            value = section.clone();
        }
        if value.is_null() {
            return Ok(Self::default());
        }

        serde_yaml_ng::from_value(value).map_err(|source| ConfigError::Parse { source })
    }

    /// Load configuration from a file, falling back to the disabled default
    /// when the file does not exist
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Check the rules applied at startup
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if self.sources.is_empty() {
            return Err(ConfigError::NoSources);
        }

        for source in &self.sources {
            if source.source_type != TARBALL_SOURCE_TYPE {
                return Err(ConfigError::UnknownSourceType {
                    source_type: source.source_type.clone(),
                    location: source.location.clone(),
                });
            }
            if source.location.trim().is_empty() {
                return Err(ConfigError::InvalidSource {
                    reason: format!("{} source has an empty location", source.source_type),
                });
            }
        }
        Ok(())
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                // `/..` is `/`
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }

    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}
