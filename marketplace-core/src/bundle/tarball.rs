//! Tarball bundles (.tar.gz)
//!
//! Layout inside the archive, optionally under one top-level directory:
//!
//! ```text
//! manifest.json
//! profiles/<name>.yaml
//! rule_types/<name>.yaml
//! ```
//!
//! The whole archive is read into memory at load time and every file listed
//! in the manifest is checked against its SHA-256 digest. Documents are only
//! decoded when asked for.

use anyhow::Context;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::{Component, Path};
use tracing::debug;

use super::manifest::{sha256_hex, MANIFEST_FILE, PROFILES_DIR, RULE_TYPES_DIR};
use super::{
    BundleError, BundleManifest, BundleMetadata, BundleReader, ManifestFile, ManifestFiles,
    Profile, RuleType, RuleTypeIter,
};

/// A bundle loaded from a tarball
#[derive(Debug, Clone)]
pub struct TarballBundle {
    manifest: BundleManifest,
    files: HashMap<String, Vec<u8>>,
}

impl TarballBundle {
    /// Load a bundle from gzip-compressed tar bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BundleError> {
        let mut archive = tar::Archive::new(GzDecoder::new(Cursor::new(bytes)));
        let mut raw = HashMap::new();

        for entry in archive.entries()? {
            let mut entry = entry?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let Some(path) = archive_path(&entry.path()?) else {
                continue;
            };
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents)?;
            raw.insert(path, contents);
        }

        let prefix = find_root_prefix(&raw)?;
        let files: HashMap<String, Vec<u8>> = raw
            .into_iter()
            .filter_map(|(path, contents)| {
                path.strip_prefix(prefix.as_str())
                    .map(|p| (p.to_string(), contents))
            })
            .collect();

        let manifest_bytes = files.get(MANIFEST_FILE).ok_or_else(|| BundleError::MissingFile {
            path: MANIFEST_FILE.to_string(),
        })?;
        let manifest: BundleManifest = serde_json::from_slice(manifest_bytes)?;
        manifest.validate()?;

        let bundle = Self { manifest, files };
        bundle.verify_digests()?;

        debug!(
            "Loaded bundle {} v{} ({} profiles, {} rule types)",
            bundle.manifest.metadata.id(),
            bundle.manifest.metadata.version,
            bundle.manifest.files.profiles.len(),
            bundle.manifest.files.rule_types.len()
        );
        Ok(bundle)
    }

    /// Load a bundle from a tarball on disk
    pub fn from_path(path: &Path) -> Result<Self, BundleError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn manifest(&self) -> &BundleManifest {
        &self.manifest
    }

    fn verify_digests(&self) -> Result<(), BundleError> {
        for (dir, file) in self.listed_files() {
            let path = format!("{dir}/{}", file.name);
            let contents = self
                .files
                .get(&path)
                .ok_or_else(|| BundleError::MissingFile { path: path.clone() })?;
            let expected = file.sha256().unwrap_or_default();
            let actual = sha256_hex(contents);
            if !expected.eq_ignore_ascii_case(&actual) {
                return Err(BundleError::DigestMismatch {
                    path,
                    expected: expected.to_string(),
                    actual,
                });
            }
        }
        Ok(())
    }

    fn listed_files(&self) -> impl Iterator<Item = (&'static str, &ManifestFile)> {
        let profiles = self.manifest.files.profiles.iter().map(|f| (PROFILES_DIR, f));
        let rule_types = self
            .manifest
            .files
            .rule_types
            .iter()
            .map(|f| (RULE_TYPES_DIR, f));
        profiles.chain(rule_types)
    }

    fn decode<T: DeserializeOwned>(&self, dir: &str, name: &str) -> Result<T, BundleError> {
        let path = format!("{dir}/{name}");
        let contents = self
            .files
            .get(&path)
            .ok_or_else(|| BundleError::MissingFile { path: path.clone() })?;
        serde_yaml_ng::from_slice(contents).map_err(|source| BundleError::Content { path, source })
    }
}

impl BundleReader for TarballBundle {
    fn metadata(&self) -> &BundleMetadata {
        &self.manifest.metadata
    }

    fn get_profile(&self, name: &str) -> Result<Profile, BundleError> {
        let file = self
            .manifest
            .profile(name)
            .ok_or_else(|| BundleError::ProfileNotFound {
                name: name.to_string(),
            })?;
        self.decode(PROFILES_DIR, &file.name)
    }

    fn rule_types(&self) -> RuleTypeIter<'_> {
        Box::new(
            self.manifest
                .files
                .rule_types
                .iter()
                .map(move |file| self.decode::<RuleType>(RULE_TYPES_DIR, &file.name)),
        )
    }
}

/// Normalize an archive entry path to `a/b/c`, dropping `.` components.
/// Entries escaping the archive root are ignored.
fn archive_path(path: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// The manifest may sit at the archive root or inside one top-level directory
fn find_root_prefix(files: &HashMap<String, Vec<u8>>) -> Result<String, BundleError> {
    if files.contains_key(MANIFEST_FILE) {
        return Ok(String::new());
    }

    let mut candidates: Vec<&str> = files
        .keys()
        .filter_map(|path| path.strip_suffix(MANIFEST_FILE))
        .filter(|prefix| {
            prefix
                .strip_suffix('/')
                .is_some_and(|dir| !dir.is_empty() && !dir.contains('/'))
        })
        .collect();

    match candidates.len() {
        0 => Err(BundleError::MissingFile {
            path: MANIFEST_FILE.to_string(),
        }),
        1 => Ok(candidates.remove(0).to_string()),
        _ => Err(BundleError::Manifest {
            reason: "archive contains more than one manifest".to_string(),
        }),
    }
}

/// Packs profiles and rule types into a tarball bundle, writing the manifest
/// and digests
#[derive(Debug, Clone)]
pub struct TarballBuilder {
    metadata: BundleMetadata,
    profiles: Vec<(String, Vec<u8>)>,
    rule_types: Vec<(String, Vec<u8>)>,
}

impl TarballBuilder {
    pub fn new(metadata: BundleMetadata) -> Self {
        Self {
            metadata,
            profiles: Vec::new(),
            rule_types: Vec::new(),
        }
    }

    pub fn profile(mut self, file_name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.profiles.push((file_name.into(), contents.into()));
        self
    }

    pub fn rule_type(mut self, file_name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.rule_types.push((file_name.into(), contents.into()));
        self
    }

    /// Collect a bundle directory laid out like the archive
    ///
    /// Metadata comes from `manifest.json` in the directory; its file list is
    /// ignored and rebuilt from the `profiles/` and `rule_types/` contents in
    /// name order.
    pub fn from_dir(dir: &Path) -> anyhow::Result<Self> {
        let manifest_path = dir.join(MANIFEST_FILE);
        let content = std::fs::read_to_string(&manifest_path)
            .with_context(|| format!("Failed to read manifest: {}", manifest_path.display()))?;
        let manifest = BundleManifest::from_json(&content)
            .with_context(|| format!("Failed to parse manifest: {}", manifest_path.display()))?;

        let mut builder = Self::new(manifest.metadata);
        builder.profiles = read_documents(&dir.join(PROFILES_DIR))?;
        builder.rule_types = read_documents(&dir.join(RULE_TYPES_DIR))?;
        Ok(builder)
    }

    pub fn manifest(&self) -> BundleManifest {
        BundleManifest {
            metadata: self.metadata.clone(),
            files: ManifestFiles {
                profiles: self
                    .profiles
                    .iter()
                    .map(|(name, contents)| ManifestFile::new(name, contents))
                    .collect(),
                rule_types: self
                    .rule_types
                    .iter()
                    .map(|(name, contents)| ManifestFile::new(name, contents))
                    .collect(),
            },
        }
    }

    /// Build the gzip-compressed tarball
    pub fn build(&self) -> anyhow::Result<Vec<u8>> {
        let manifest = self.manifest();
        manifest.validate().context("Invalid bundle manifest")?;
        let manifest_json = manifest.to_json()?;

        let mut bytes = Vec::new();
        {
            let encoder = GzEncoder::new(&mut bytes, Compression::default());
            let mut builder = tar::Builder::new(encoder);

            append_file(&mut builder, MANIFEST_FILE, manifest_json.as_bytes())?;
            for (name, contents) in &self.profiles {
                append_file(&mut builder, &format!("{PROFILES_DIR}/{name}"), contents)?;
            }
            for (name, contents) in &self.rule_types {
                append_file(&mut builder, &format!("{RULE_TYPES_DIR}/{name}"), contents)?;
            }

            builder
                .into_inner()
                .context("Failed to finish tar archive")?
                .finish()
                .context("Failed to finish gzip stream")?;
        }

        Ok(bytes)
    }

    /// Build and write the tarball to `path`
    pub fn write_to(&self, path: &Path) -> anyhow::Result<()> {
        let bytes = self.build()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, bytes)
            .with_context(|| format!("Failed to write bundle: {}", path.display()))
    }
}

fn append_file<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    path: &str,
    contents: &[u8],
) -> anyhow::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, path, contents)
        .with_context(|| format!("Failed to add {path} to archive"))
}

fn read_documents(dir: &Path) -> anyhow::Result<Vec<(String, Vec<u8>)>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut documents = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.path().is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            let contents = std::fs::read(entry.path())
                .with_context(|| format!("Failed to read {}", entry.path().display()))?;
            documents.push((name.to_string(), contents));
        }
    }

    documents.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(documents)
}
