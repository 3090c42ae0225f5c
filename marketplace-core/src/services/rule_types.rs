use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;
use uuid::Uuid;

use super::{RuleTypeService, ServiceError};
use crate::bundle::RuleType;
use crate::project::Provider;
use crate::store::{Querier, StoreError, UpsertRuleType};

static RULE_TYPE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("rule type name pattern is valid"));

/// Rule type service writing through the caller's [`Querier`]
///
/// A bundle may only replace rule types that belong to the same
/// subscription; rule types created by hand or by another bundle are left
/// alone and reported as a conflict.
#[derive(Debug, Clone, Default)]
pub struct StoreRuleTypeService;

impl StoreRuleTypeService {
    pub fn new() -> Self {
        Self
    }

    fn validate(rule_type: &RuleType) -> Result<(), ServiceError> {
        if !RULE_TYPE_NAME.is_match(&rule_type.name) {
            return Err(ServiceError::Validation(format!(
                "invalid rule type name '{}'",
                rule_type.name
            )));
        }
        if rule_type.def.is_null() {
            return Err(ServiceError::Validation(format!(
                "rule type '{}' has no definition",
                rule_type.name
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RuleTypeService for StoreRuleTypeService {
    async fn upsert(
        &self,
        project_id: Uuid,
        provider: &Provider,
        subscription_id: Uuid,
        rule_type: &RuleType,
        qtx: &dyn Querier,
    ) -> Result<(), ServiceError> {
        Self::validate(rule_type)?;

        match qtx.get_rule_type_by_name(project_id, &rule_type.name).await {
            Ok(existing) if existing.subscription_id != Some(subscription_id) => {
                return Err(ServiceError::Conflict(format!(
                    "rule type '{}' exists in project outside this subscription",
                    rule_type.name
                )));
            }
            Ok(existing)
                if existing.definition == *rule_type && existing.provider_id == provider.id =>
            {
                debug!("Rule type {} unchanged in project {}", rule_type.name, project_id);
                return Ok(());
            }
            Ok(_) | Err(StoreError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        qtx.upsert_rule_type(&UpsertRuleType {
            project_id,
            provider_id: provider.id,
            subscription_id: Some(subscription_id),
            definition: rule_type.clone(),
        })
        .await?;

        debug!(
            "Upserted rule type {} in project {} (subscription {})",
            rule_type.name, project_id, subscription_id
        );
        Ok(())
    }
}
