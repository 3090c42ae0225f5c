//! Domain services that persist rule types and profiles inside a project
//!
//! The subscription service only depends on the [`RuleTypeService`] and
//! [`ProfileService`] traits. [`StoreRuleTypeService`] and
//! [`StoreProfileService`] are implementations that validate content and
//! write it through the caller's [`Querier`].

mod profiles;
mod rule_types;

pub use profiles::StoreProfileService;
pub use rule_types::StoreRuleTypeService;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::bundle::{Profile, RuleType};
use crate::project::Provider;
use crate::store::{Querier, StoreError};

/// Errors from the rule type and profile services
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Creates or updates rule types in a project
#[async_trait]
pub trait RuleTypeService: Send + Sync {
    /// Insert or update `rule_type` in the project, linked to the
    /// subscription it came from. Upserting the same content twice is a no-op.
    async fn upsert(
        &self,
        project_id: Uuid,
        provider: &Provider,
        subscription_id: Uuid,
        rule_type: &RuleType,
        qtx: &dyn Querier,
    ) -> Result<(), ServiceError>;
}

/// Creates profiles in a project
#[async_trait]
pub trait ProfileService: Send + Sync {
    /// Create `profile` in the project, linked to the subscription it came from
    async fn create(
        &self,
        project_id: Uuid,
        provider: &Provider,
        subscription_id: Uuid,
        profile: &Profile,
        qtx: &dyn Querier,
    ) -> Result<(), ServiceError>;
}
