use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use super::{ProfileService, ServiceError};
use crate::bundle::Profile;
use crate::project::Provider;
use crate::store::{NewProfile, Querier, StoreError};

/// Profile service writing through the caller's [`Querier`]
///
/// Every rule type a profile references must already exist in the project.
#[derive(Debug, Clone, Default)]
pub struct StoreProfileService;

impl StoreProfileService {
    pub fn new() -> Self {
        Self
    }

    async fn validate(
        project_id: Uuid,
        profile: &Profile,
        qtx: &dyn Querier,
    ) -> Result<(), ServiceError> {
        if profile.name.trim().is_empty() {
            return Err(ServiceError::Validation("profile name is empty".to_string()));
        }
        if profile.rules.is_empty() {
            return Err(ServiceError::Validation(format!(
                "profile '{}' has no rules",
                profile.name
            )));
        }

        for name in profile.rule_type_names() {
            match qtx.get_rule_type_by_name(project_id, name).await {
                Ok(_) => {}
                Err(StoreError::NotFound) => {
                    return Err(ServiceError::Validation(format!(
                        "profile '{}' references unknown rule type '{name}'",
                        profile.name
                    )));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileService for StoreProfileService {
    async fn create(
        &self,
        project_id: Uuid,
        provider: &Provider,
        subscription_id: Uuid,
        profile: &Profile,
        qtx: &dyn Querier,
    ) -> Result<(), ServiceError> {
        Self::validate(project_id, profile, qtx).await?;

        let record = qtx
            .create_profile(&NewProfile {
                project_id,
                provider_id: provider.id,
                subscription_id: Some(subscription_id),
                definition: profile.clone(),
            })
            .await
            .map_err(|e| match e {
                StoreError::UniqueViolation { .. } => ServiceError::Conflict(format!(
                    "profile '{}' already exists in project",
                    profile.name
                )),
                other => other.into(),
            })?;

        debug!("Created profile {} ({}) in project {}", record.name, record.id, project_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, NewSubscription, UpsertRuleType};

    const PROFILE: &str = "name: hc\nrules:\n  - type: r1\n";

    async fn setup(store: &MemoryStore, project_id: Uuid, provider: &Provider) -> Uuid {
        let bundle = store.upsert_bundle("stacklok", "healthcheck").await.unwrap();
        let subscription = store
            .create_subscription(&NewSubscription {
                project_id,
                bundle_id: bundle.id,
                current_version: "1.0.0".to_string(),
            })
            .await
            .unwrap();
        store
            .upsert_rule_type(&UpsertRuleType {
                project_id,
                provider_id: provider.id,
                subscription_id: Some(subscription.id),
                definition: serde_yaml_ng::from_str("name: r1\ndef: {}\n").unwrap(),
            })
            .await
            .unwrap();
        subscription.id
    }

    #[tokio::test]
    async fn test_create_profile() {
        let store = MemoryStore::new();
        let project_id = Uuid::new_v4();
        let provider = Provider::new(Uuid::new_v4(), "github");
        let subscription_id = setup(&store, project_id, &provider).await;
        let profile: Profile = serde_yaml_ng::from_str(PROFILE).unwrap();

        StoreProfileService::new()
            .create(project_id, &provider, subscription_id, &profile, &store)
            .await
            .unwrap();

        let stored = store.get_profile_by_name(project_id, "hc").await.unwrap();
        assert_eq!(stored.subscription_id, Some(subscription_id));
        assert_eq!(stored.definition, profile);
    }

    #[tokio::test]
    async fn test_duplicate_profile_is_conflict() {
        let store = MemoryStore::new();
        let project_id = Uuid::new_v4();
        let provider = Provider::new(Uuid::new_v4(), "github");
        let subscription_id = setup(&store, project_id, &provider).await;
        let profile: Profile = serde_yaml_ng::from_str(PROFILE).unwrap();
        let service = StoreProfileService::new();

        service
            .create(project_id, &provider, subscription_id, &profile, &store)
            .await
            .unwrap();
        let err = service
            .create(project_id, &provider, subscription_id, &profile, &store)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_unknown_rule_type_is_rejected() {
        let store = MemoryStore::new();
        let project_id = Uuid::new_v4();
        let provider = Provider::new(Uuid::new_v4(), "github");
        let subscription_id = setup(&store, project_id, &provider).await;
        let profile: Profile =
            serde_yaml_ng::from_str("name: hc\nrules:\n  - type: missing\n").unwrap();

        let err = StoreProfileService::new()
            .create(project_id, &provider, subscription_id, &profile, &store)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown rule type 'missing'"));
        assert!(store.profiles().unwrap().is_empty());
    }
}
