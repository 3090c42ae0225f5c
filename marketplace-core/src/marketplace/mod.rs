//! The marketplace entry point
//!
//! [`RoutedMarketplace`] maps each bundle id to the source that serves it and
//! hands the bundle to the [`SubscriptionService`]. [`NoopMarketplace`] is
//! used when the marketplace is disabled.

mod factory;

pub use factory::from_config;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::bundle::{BundleId, BundleReader};
use crate::error::{ConfigError, MarketplaceError};
use crate::project::ProjectContext;
use crate::sources::BundleSource;
use crate::store::Querier;
use crate::subscriptions::SubscriptionService;

/// Marketplace operations exposed to callers
///
/// The caller owns the transaction behind `qtx` and decides whether to
/// commit once the call returns.
#[async_trait]
pub trait Marketplace: Send + Sync {
    /// Subscribe the project to a bundle and install its rule types
    async fn subscribe(
        &self,
        project: &ProjectContext,
        bundle: &BundleId,
        qtx: &dyn Querier,
    ) -> Result<(), MarketplaceError>;

    /// Create a profile from a bundle the project is subscribed to
    async fn add_profile(
        &self,
        project: &ProjectContext,
        bundle: &BundleId,
        profile_name: &str,
        qtx: &dyn Querier,
    ) -> Result<(), MarketplaceError>;
}

/// Routes each bundle id to the source that provides it
pub struct RoutedMarketplace {
    sources: HashMap<BundleId, Arc<dyn BundleSource>>,
    subscriptions: SubscriptionService,
}

impl RoutedMarketplace {
    /// Build the routing table by listing every source once, in order.
    /// A bundle offered by several sources is served by the last one.
    pub async fn new(
        sources: Vec<Arc<dyn BundleSource>>,
        subscriptions: SubscriptionService,
    ) -> Result<Self, ConfigError> {
        let mut routes: HashMap<BundleId, Arc<dyn BundleSource>> = HashMap::new();

        for source in sources {
            let ids = source
                .list_bundles()
                .await
                .map_err(|e| ConfigError::SourceLoad {
                    source_name: source.describe(),
                    source: e,
                })?;

            for id in ids {
                if let Some(previous) = routes.insert(id.clone(), source.clone()) {
                    warn!(
                        "Bundle {} from {} overrides {}",
                        id,
                        source.describe(),
                        previous.describe()
                    );
                } else {
                    debug!("Routing bundle {} to {}", id, source.describe());
                }
            }
        }

        Ok(Self {
            sources: routes,
            subscriptions,
        })
    }

    /// Every bundle id the marketplace can serve
    pub fn bundles(&self) -> Vec<&BundleId> {
        let mut ids: Vec<_> = self.sources.keys().collect();
        ids.sort_by(|a, b| (a.namespace(), a.name()).cmp(&(b.namespace(), b.name())));
        ids
    }

    async fn resolve(&self, id: &BundleId) -> Result<Arc<dyn BundleReader>, MarketplaceError> {
        let source = self
            .sources
            .get(id)
            .ok_or_else(|| MarketplaceError::UnknownBundle { id: id.clone() })?;

        source
            .get_bundle(id)
            .await
            .map_err(|source| MarketplaceError::BundleFetch {
                id: id.clone(),
                source,
            })
    }
}

#[async_trait]
impl Marketplace for RoutedMarketplace {
    async fn subscribe(
        &self,
        project: &ProjectContext,
        bundle: &BundleId,
        qtx: &dyn Querier,
    ) -> Result<(), MarketplaceError> {
        let reader = self.resolve(bundle).await?;
        self.subscriptions
            .subscribe(project, reader.as_ref(), qtx)
            .await
            .map_err(|source| MarketplaceError::Subscribe {
                id: bundle.clone(),
                source,
            })
    }

    async fn add_profile(
        &self,
        project: &ProjectContext,
        bundle: &BundleId,
        profile_name: &str,
        qtx: &dyn Querier,
    ) -> Result<(), MarketplaceError> {
        let reader = self.resolve(bundle).await?;
        self.subscriptions
            .create_profile(project, reader.as_ref(), profile_name, qtx)
            .await
            .map_err(|source| MarketplaceError::AddProfile {
                id: bundle.clone(),
                profile: profile_name.to_string(),
                source,
            })
    }
}

/// Marketplace used when the feature is disabled: accepts every call and
/// touches nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMarketplace;

#[async_trait]
impl Marketplace for NoopMarketplace {
    async fn subscribe(
        &self,
        project: &ProjectContext,
        bundle: &BundleId,
        _qtx: &dyn Querier,
    ) -> Result<(), MarketplaceError> {
        debug!("Marketplace disabled, ignoring subscribe of {} to {}", project.id, bundle);
        Ok(())
    }

    async fn add_profile(
        &self,
        project: &ProjectContext,
        bundle: &BundleId,
        profile_name: &str,
        _qtx: &dyn Querier,
    ) -> Result<(), MarketplaceError> {
        debug!(
            "Marketplace disabled, ignoring profile {} from {} for {}",
            profile_name, bundle, project.id
        );
        Ok(())
    }
}
