//! Bundle manifest parsing (manifest.json)
//!
//! The manifest names the bundle, pins its version and lists every profile
//! and rule type file together with its SHA-256 digest.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};

use super::{BundleError, BundleId, BundleMetadata};

/// Manifest file name at the root of a bundle
pub const MANIFEST_FILE: &str = "manifest.json";

/// Directory holding profile documents
pub const PROFILES_DIR: &str = "profiles";

/// Directory holding rule type documents
pub const RULE_TYPES_DIR: &str = "rule_types";

/// Hash algorithm key used in `hashes`
pub const SHA256_KEY: &str = "sha-256";

/// A bundle manifest (manifest.json)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleManifest {
    pub metadata: BundleMetadata,

    #[serde(default)]
    pub files: ManifestFiles,
}

/// Files shipped in the bundle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestFiles {
    #[serde(default)]
    pub profiles: Vec<ManifestFile>,

    #[serde(default)]
    pub rule_types: Vec<ManifestFile>,
}

/// One file entry with its digests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestFile {
    /// Plain file name inside its directory (e.g. `hc.yaml`)
    pub name: String,

    #[serde(default)]
    pub hashes: BTreeMap<String, String>,
}

impl ManifestFile {
    pub fn new(name: impl Into<String>, contents: &[u8]) -> Self {
        let mut hashes = BTreeMap::new();
        hashes.insert(SHA256_KEY.to_string(), sha256_hex(contents));
        Self {
            name: name.into(),
            hashes,
        }
    }

    pub fn sha256(&self) -> Option<&str> {
        self.hashes.get(SHA256_KEY).map(String::as_str)
    }
}

/// Hex-encoded SHA-256 of `bytes`
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

impl BundleManifest {
    /// Parse manifest from a JSON string
    pub fn from_json(content: &str) -> Result<Self, BundleError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn to_json(&self) -> Result<String, BundleError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate the manifest contents
    pub fn validate(&self) -> Result<(), BundleError> {
        BundleId::new(&self.metadata.namespace, &self.metadata.name)?;

        semver::Version::parse(&self.metadata.version).map_err(|e| BundleError::Manifest {
            reason: format!("version '{}' is not valid semver: {e}", self.metadata.version),
        })?;

        for (dir, files) in [
            (PROFILES_DIR, &self.files.profiles),
            (RULE_TYPES_DIR, &self.files.rule_types),
        ] {
            let mut seen = HashSet::new();
            for file in files {
                if file.name.is_empty()
                    || file.name.contains('/')
                    || file.name.contains('\\')
                    || file.name == "."
                    || file.name == ".."
                {
                    return Err(BundleError::Manifest {
                        reason: format!("invalid file name '{}' in {dir}", file.name),
                    });
                }
                if !seen.insert(file.name.as_str()) {
                    return Err(BundleError::Manifest {
                        reason: format!("duplicate file '{}' in {dir}", file.name),
                    });
                }
                if file.sha256().is_none() {
                    return Err(BundleError::Manifest {
                        reason: format!("file '{dir}/{}' has no {SHA256_KEY} hash", file.name),
                    });
                }
            }
        }

        Ok(())
    }

    /// Find a profile entry by file name, with or without its extension
    pub fn profile(&self, name: &str) -> Option<&ManifestFile> {
        self.files.profiles.iter().find(|f| {
            f.name == name
                || f.name
                    .strip_suffix(".yaml")
                    .or_else(|| f.name.strip_suffix(".yml"))
                    .is_some_and(|stem| stem == name)
        })
    }
}
