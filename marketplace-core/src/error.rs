//! Surface error types for marketplace operations
//!
//! Every layer converts the errors of the layer below into one of the kinds
//! listed in [`ErrorKind`], keeping the original error as its `source()`.
//! Rendered messages read `"<surface message>: <cause>"`, so the surface
//! message is always a prefix callers can match on.

use std::path::PathBuf;
use thiserror::Error;

use crate::bundle::{BundleError, BundleId};
use crate::services::ServiceError;
use crate::sources::SourceError;
use crate::store::StoreError;

/// Boxed cause of a rule type fan-out failure: either the bundle iterator or
/// the rule type service failed.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The kinds of failure a caller of the marketplace can observe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnknownBundle,
    BundleFetch,
    Query,
    BundleUpsert,
    SubscriptionCreate,
    RulesCreate,
    NotSubscribed,
    BundleProfile,
    ProfileCreate,
    ConfigInvalid,
}

/// Errors raised by [`crate::SubscriptionService`]
#[derive(Error, Debug)]
pub enum SubscriptionError {
    #[error("error while querying subscriptions: {source}")]
    Query {
        #[source]
        source: StoreError,
    },

    #[error("error while ensuring bundle exists: {source}")]
    BundleUpsert {
        #[source]
        source: StoreError,
    },

    #[error("error while creating subscription: {source}")]
    SubscriptionCreate {
        #[source]
        source: StoreError,
    },

    #[error("error while creating rules in project: {source}")]
    RulesCreate {
        #[source]
        source: BoxError,
    },

    #[error("project is not subscribed to bundle {bundle}")]
    NotSubscribed { bundle: BundleId },

    #[error("error while retrieving profile from bundle: {source}")]
    BundleProfile {
        #[source]
        source: BundleError,
    },

    #[error("error while creating profile in project: {source}")]
    ProfileCreate {
        #[source]
        source: ServiceError,
    },
}

impl SubscriptionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SubscriptionError::Query { .. } => ErrorKind::Query,
            SubscriptionError::BundleUpsert { .. } => ErrorKind::BundleUpsert,
            SubscriptionError::SubscriptionCreate { .. } => ErrorKind::SubscriptionCreate,
            SubscriptionError::RulesCreate { .. } => ErrorKind::RulesCreate,
            SubscriptionError::NotSubscribed { .. } => ErrorKind::NotSubscribed,
            SubscriptionError::BundleProfile { .. } => ErrorKind::BundleProfile,
            SubscriptionError::ProfileCreate { .. } => ErrorKind::ProfileCreate,
        }
    }
}

/// Errors returned by a [`crate::Marketplace`]
#[derive(Error, Debug)]
pub enum MarketplaceError {
    #[error("unknown bundle: {id}")]
    UnknownBundle { id: BundleId },

    #[error("error while retrieving bundle {id}: {source}")]
    BundleFetch {
        id: BundleId,
        #[source]
        source: SourceError,
    },

    #[error("error while subscribing to bundle {id}: {source}")]
    Subscribe {
        id: BundleId,
        #[source]
        source: SubscriptionError,
    },

    #[error("error while adding profile {profile} from bundle {id}: {source}")]
    AddProfile {
        id: BundleId,
        profile: String,
        #[source]
        source: SubscriptionError,
    },
}

impl MarketplaceError {
    /// Surface kind, looking through the operation wrapper
    pub fn kind(&self) -> ErrorKind {
        match self {
            MarketplaceError::UnknownBundle { .. } => ErrorKind::UnknownBundle,
            MarketplaceError::BundleFetch { .. } => ErrorKind::BundleFetch,
            MarketplaceError::Subscribe { source, .. }
            | MarketplaceError::AddProfile { source, .. } => source.kind(),
        }
    }
}

/// Startup errors from configuration and source loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("marketplace is enabled but no sources are configured")]
    NoSources,

    #[error("unknown marketplace source type '{source_type}' for {location}")]
    UnknownSourceType {
        source_type: String,
        location: String,
    },

    #[error("invalid marketplace source: {reason}")]
    InvalidSource { reason: String },

    #[error("error while loading marketplace source {source_name}: {source}")]
    SourceLoad {
        source_name: String,
        #[source]
        source: SourceError,
    },

    #[error("failed to read marketplace config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse marketplace config: {source}")]
    Parse {
        #[source]
        source: serde_yaml_ng::Error,
    },
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ConfigInvalid
    }
}
