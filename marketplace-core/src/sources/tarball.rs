//! A source backed by a single tarball bundle on disk

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use super::{BundleSource, SourceError};
use crate::bundle::{BundleId, BundleReader, TarballBundle};

/// Serves the one bundle contained in a tarball
///
/// The tarball is read and verified when the source is opened; requests for
/// any other bundle id get [`SourceError::BundleNotFound`].
pub struct TarballSource {
    location: PathBuf,
    bundle: Arc<TarballBundle>,
}

impl TarballSource {
    /// Open and verify the tarball at `location`
    pub async fn open(location: impl AsRef<Path>) -> Result<Self, SourceError> {
        let location = location.as_ref().to_path_buf();
        let bytes = tokio::fs::read(&location).await?;
        let bundle = TarballBundle::from_bytes(&bytes)?;

        info!(
            "Opened tarball source {} with bundle {} v{}",
            location.display(),
            bundle.manifest().metadata.id(),
            bundle.manifest().metadata.version
        );

        Ok(Self {
            location,
            bundle: Arc::new(bundle),
        })
    }

    /// Serve an already loaded bundle
    pub fn from_bundle(location: impl Into<PathBuf>, bundle: TarballBundle) -> Self {
        Self {
            location: location.into(),
            bundle: Arc::new(bundle),
        }
    }

    pub fn location(&self) -> &Path {
        &self.location
    }
}

#[async_trait]
impl BundleSource for TarballSource {
    async fn list_bundles(&self) -> Result<Vec<BundleId>, SourceError> {
        Ok(vec![self.bundle.metadata().id()])
    }

    async fn get_bundle(&self, id: &BundleId) -> Result<Arc<dyn BundleReader>, SourceError> {
        if self.bundle.metadata().id() != *id {
            return Err(SourceError::BundleNotFound { id: id.clone() });
        }
        Ok(self.bundle.clone())
    }

    fn describe(&self) -> String {
        format!("tarball:{}", self.location.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{BundleMetadata, TarballBuilder};
    use tempfile::TempDir;

    fn write_bundle(dir: &Path) -> PathBuf {
        let path = dir.join("healthcheck.tar.gz");
        TarballBuilder::new(BundleMetadata::new("stacklok", "healthcheck", "1.0.0"))
            .rule_type("r1.yaml", "name: r1\n")
            .write_to(&path)
            .unwrap();
        path
    }

    #[tokio::test]
    async fn test_lists_single_bundle() {
        let temp_dir = TempDir::new().unwrap();
        let source = TarballSource::open(write_bundle(temp_dir.path())).await.unwrap();

        let ids = source.list_bundles().await.unwrap();
        assert_eq!(ids, vec![BundleId::new("stacklok", "healthcheck").unwrap()]);
        assert!(source.describe().starts_with("tarball:"));
    }

    #[tokio::test]
    async fn test_get_bundle_matches_namespace_and_name() {
        let temp_dir = TempDir::new().unwrap();
        let source = TarballSource::open(write_bundle(temp_dir.path())).await.unwrap();

        let reader = source
            .get_bundle(&BundleId::new("stacklok", "healthcheck").unwrap())
            .await
            .unwrap();
        assert_eq!(reader.metadata().version, "1.0.0");

        let err = source
            .get_bundle(&BundleId::new("other", "healthcheck").unwrap())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SourceError::BundleNotFound { .. }));
    }

    #[tokio::test]
    async fn test_from_loaded_bundle() {
        let bytes = TarballBuilder::new(BundleMetadata::new("stacklok", "healthcheck", "2.0.0"))
            .rule_type("r1.yaml", "name: r1\n")
            .build()
            .unwrap();
        let bundle = TarballBundle::from_bytes(&bytes).unwrap();
        let source = TarballSource::from_bundle("/srv/bundles/healthcheck.tar.gz", bundle);

        assert_eq!(source.location(), Path::new("/srv/bundles/healthcheck.tar.gz"));
        assert_eq!(source.describe(), "tarball:/srv/bundles/healthcheck.tar.gz");

        let reader = source
            .get_bundle(&BundleId::new("stacklok", "healthcheck").unwrap())
            .await
            .unwrap();
        assert_eq!(reader.metadata().version, "2.0.0");
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let result = TarballSource::open(temp_dir.path().join("absent.tar.gz")).await;
        assert!(matches!(result, Err(SourceError::Io(_))));
    }
}
