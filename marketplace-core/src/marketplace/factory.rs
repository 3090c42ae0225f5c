use std::sync::Arc;
use tracing::info;

use super::{Marketplace, NoopMarketplace, RoutedMarketplace};
use crate::config::{MarketplaceConfig, SourceConfig};
use crate::error::ConfigError;
use crate::services::{ProfileService, RuleTypeService};
use crate::sources::BundleSource;
use crate::subscriptions::SubscriptionService;

/// Build the marketplace described by `config`
///
/// A disabled configuration yields a [`NoopMarketplace`]. Otherwise every
/// source is opened and listed now, so a missing or corrupt bundle fails
/// startup rather than the first request.
pub async fn from_config(
    config: &MarketplaceConfig,
    profiles: Arc<dyn ProfileService>,
    rule_types: Arc<dyn RuleTypeService>,
) -> Result<Arc<dyn Marketplace>, ConfigError> {
    if !config.enabled {
        info!("Marketplace disabled");
        return Ok(Arc::new(NoopMarketplace));
    }
    config.validate()?;

    let mut sources = Vec::with_capacity(config.sources.len());
    for source in &config.sources {
        sources.push(open_source(source).await?);
    }

    let marketplace =
        RoutedMarketplace::new(sources, SubscriptionService::new(profiles, rule_types)).await?;
    info!(
        "Marketplace enabled with {} bundles from {} sources",
        marketplace.bundles().len(),
        config.sources.len()
    );
    Ok(Arc::new(marketplace))
}

async fn open_source(config: &SourceConfig) -> Result<Arc<dyn BundleSource>, ConfigError> {
    match config.source_type.as_str() {
        #[cfg(feature = "tarball")]
        crate::config::TARBALL_SOURCE_TYPE => {
            let location = config.normalized_location();
            let source = crate::sources::TarballSource::open(&location)
                .await
                .map_err(|source| ConfigError::SourceLoad {
                    source_name: format!("tarball:{}", location.display()),
                    source,
                })?;
            Ok(Arc::new(source))
        }
        other => Err(ConfigError::UnknownSourceType {
            source_type: other.to_string(),
            location: config.location.clone(),
        }),
    }
}
