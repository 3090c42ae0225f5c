//! Persistence for bundles, subscriptions and the content they install
//!
//! The marketplace only ever talks to a [`Querier`] handed in by the caller,
//! usually a transaction. Two implementations ship with the crate: an
//! in-process [`MemoryStore`] and, with the `sqlite` feature, a
//! [`SqliteStore`].

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::{MemoryStore, MemoryTx};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteStore, SqliteTx};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::bundle::{Profile, RuleType};

/// Store errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The query matched no rows
    #[error("no rows in result set")]
    NotFound,

    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("foreign key constraint violated: {constraint}")]
    ForeignKey { constraint: String },

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}

/// A persisted bundle, unique on `(namespace, name)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleRecord {
    pub id: Uuid,
    pub namespace: String,
    pub name: String,
}

/// Link between a project and a bundle, unique on `(project_id, bundle_id)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub project_id: Uuid,
    pub bundle_id: Uuid,
    pub current_version: String,
}

/// Parameters for [`Querier::create_subscription`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSubscription {
    pub project_id: Uuid,
    pub bundle_id: Uuid,
    pub current_version: String,
}

/// Parameters for [`Querier::get_subscription_by_project_bundle`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionLookup {
    pub namespace: String,
    pub name: String,
    pub project_id: Uuid,
}

impl SubscriptionLookup {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, project_id: Uuid) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            project_id,
        }
    }
}

/// A rule type installed in a project, unique on `(project_id, name)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTypeRecord {
    pub id: Uuid,
    pub project_id: Uuid,
    pub provider_id: Uuid,
    pub name: String,

    /// Set when the rule type came from a bundle subscription
    pub subscription_id: Option<Uuid>,

    pub definition: RuleType,
}

/// Parameters for [`Querier::upsert_rule_type`]
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertRuleType {
    pub project_id: Uuid,
    pub provider_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub definition: RuleType,
}

/// A profile installed in a project, unique on `(project_id, name)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: Uuid,
    pub project_id: Uuid,
    pub provider_id: Uuid,
    pub name: String,
    pub subscription_id: Option<Uuid>,
    pub definition: Profile,
}

/// Parameters for [`Querier::create_profile`]
#[derive(Debug, Clone, PartialEq)]
pub struct NewProfile {
    pub project_id: Uuid,
    pub provider_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub definition: Profile,
}

/// Typed data store operations
///
/// Implementations are expected to be transaction scoped: every write made
/// through one handle is visible to later reads through the same handle.
#[async_trait]
pub trait Querier: Send + Sync {
    /// Subscription of `project_id` to the bundle `(namespace, name)`, or
    /// [`StoreError::NotFound`]
    async fn get_subscription_by_project_bundle(
        &self,
        lookup: &SubscriptionLookup,
    ) -> Result<Subscription, StoreError>;

    /// Insert the bundle row if missing and return it
    async fn upsert_bundle(&self, namespace: &str, name: &str) -> Result<BundleRecord, StoreError>;

    async fn create_subscription(
        &self,
        params: &NewSubscription,
    ) -> Result<Subscription, StoreError>;

    /// Insert or replace the rule type named `params.definition.name` in the
    /// project
    async fn upsert_rule_type(&self, params: &UpsertRuleType)
        -> Result<RuleTypeRecord, StoreError>;

    async fn get_rule_type_by_name(
        &self,
        project_id: Uuid,
        name: &str,
    ) -> Result<RuleTypeRecord, StoreError>;

    async fn create_profile(&self, params: &NewProfile) -> Result<ProfileRecord, StoreError>;

    async fn get_profile_by_name(
        &self,
        project_id: Uuid,
        name: &str,
    ) -> Result<ProfileRecord, StoreError>;
}
