//! Subscribing projects to bundles
//!
//! [`SubscriptionService`] records the link between a project and a bundle,
//! installs the bundle's rule types and, for subscribed projects, creates
//! profiles from the bundle. All writes go through the caller's [`Querier`],
//! so the caller decides whether they land atomically.

use std::sync::Arc;
use tracing::{debug, info};

use crate::bundle::BundleReader;
use crate::error::{BoxError, SubscriptionError};
use crate::project::ProjectContext;
use crate::services::{ProfileService, RuleTypeService};
use crate::store::{NewSubscription, Querier, StoreError, Subscription, SubscriptionLookup};

/// Coordinates subscriptions, rule type installation and profile creation
#[derive(Clone)]
pub struct SubscriptionService {
    profiles: Arc<dyn ProfileService>,
    rule_types: Arc<dyn RuleTypeService>,
}

impl SubscriptionService {
    pub fn new(profiles: Arc<dyn ProfileService>, rule_types: Arc<dyn RuleTypeService>) -> Self {
        Self {
            profiles,
            rule_types,
        }
    }

    /// Subscribe the project to `bundle` and install every rule type it ships.
    ///
    /// Subscribing again to a bundle the project already follows does
    /// nothing, even when the bundle version has changed.
    pub async fn subscribe(
        &self,
        project: &ProjectContext,
        bundle: &dyn BundleReader,
        qtx: &dyn Querier,
    ) -> Result<(), SubscriptionError> {
        let metadata = bundle.metadata();

        if let Some(existing) = find_subscription(project, bundle, qtx).await? {
            debug!(
                "Project {} already subscribed to {} (subscription {})",
                project.id,
                metadata.id(),
                existing.id
            );
            return Ok(());
        }

        let bundle_row = qtx
            .upsert_bundle(&metadata.namespace, &metadata.name)
            .await
            .map_err(|source| SubscriptionError::BundleUpsert { source })?;

        let subscription = qtx
            .create_subscription(&NewSubscription {
                project_id: project.id,
                bundle_id: bundle_row.id,
                current_version: metadata.version.clone(),
            })
            .await
            .map_err(|source| SubscriptionError::SubscriptionCreate { source })?;

        let mut installed = 0usize;
        for rule_type in bundle.rule_types() {
            let rule_type = rule_type.map_err(|e| SubscriptionError::RulesCreate {
                source: BoxError::from(e),
            })?;
            self.rule_types
                .upsert(
                    project.id,
                    &project.provider,
                    subscription.id,
                    &rule_type,
                    qtx,
                )
                .await
                .map_err(|e| SubscriptionError::RulesCreate {
                    source: BoxError::from(e),
                })?;
            installed += 1;
        }

        info!(
            "Subscribed project {} to {} v{} ({} rule types)",
            project.id,
            metadata.id(),
            metadata.version,
            installed
        );
        Ok(())
    }

    /// Create the profile `profile_name` from `bundle` in the project.
    ///
    /// The project must already be subscribed to the bundle.
    pub async fn create_profile(
        &self,
        project: &ProjectContext,
        bundle: &dyn BundleReader,
        profile_name: &str,
        qtx: &dyn Querier,
    ) -> Result<(), SubscriptionError> {
        let subscription = find_subscription(project, bundle, qtx)
            .await?
            .ok_or_else(|| SubscriptionError::NotSubscribed {
                bundle: bundle.metadata().id(),
            })?;

        let profile = bundle
            .get_profile(profile_name)
            .map_err(|source| SubscriptionError::BundleProfile { source })?;

        self.profiles
            .create(
                project.id,
                &project.provider,
                subscription.id,
                &profile,
                qtx,
            )
            .await
            .map_err(|source| SubscriptionError::ProfileCreate { source })?;

        info!(
            "Created profile {} from {} in project {}",
            profile.name,
            bundle.metadata().id(),
            project.id
        );
        Ok(())
    }
}

async fn find_subscription(
    project: &ProjectContext,
    bundle: &dyn BundleReader,
    qtx: &dyn Querier,
) -> Result<Option<Subscription>, SubscriptionError> {
    let metadata = bundle.metadata();
    let lookup = SubscriptionLookup::new(&metadata.namespace, &metadata.name, project.id);
    match qtx.get_subscription_by_project_bundle(&lookup).await {
        Ok(subscription) => Ok(Some(subscription)),
        Err(StoreError::NotFound) => Ok(None),
        Err(source) => Err(SubscriptionError::Query { source }),
    }
}
