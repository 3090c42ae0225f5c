//! Bundle sources
//!
//! A source knows which bundles it serves and hands out readers for them.
//! Sources are listed once when the marketplace is built.

#[cfg(feature = "tarball")]
mod tarball;

#[cfg(feature = "tarball")]
pub use tarball::TarballSource;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::bundle::{BundleError, BundleId, BundleReader};

/// Errors from bundle sources
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("bundle {id} not found in source")]
    BundleNotFound { id: BundleId },

    #[error("failed to read bundle source: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid bundle: {0}")]
    Bundle(#[from] BundleError),
}

/// Something that serves bundles to the marketplace
#[async_trait]
pub trait BundleSource: Send + Sync {
    /// Ids of every bundle this source serves
    async fn list_bundles(&self) -> Result<Vec<BundleId>, SourceError>;

    /// Reader for one bundle; [`SourceError::BundleNotFound`] when the id is
    /// not served here
    async fn get_bundle(&self, id: &BundleId) -> Result<Arc<dyn BundleReader>, SourceError>;

    /// Short description for logs
    fn describe(&self) -> String;
}
