//! Shared fixtures for the marketplace integration tests
//!
//! Each test binary only uses part of this module.
#![allow(dead_code)]

use async_trait::async_trait;
use marketplace_core::bundle::{BundleMetadata, TarballBuilder};
use marketplace_core::services::{ServiceError, StoreProfileService, StoreRuleTypeService};
use marketplace_core::sources::{SourceError, TarballSource};
use marketplace_core::store::{
    BundleRecord, NewProfile, NewSubscription, ProfileRecord, Querier, RuleTypeRecord,
    StoreError, Subscription, SubscriptionLookup, UpsertRuleType,
};
use marketplace_core::{
    BundleId, BundleReader, BundleSource, Profile, ProfileService, ProjectContext, Provider,
    RuleType, RuleTypeService,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize logging for tests (only once per test run)
pub fn init_test_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_level(true),
            )
            .with(tracing_subscriber::filter::EnvFilter::from_default_env())
            .try_init();
    });
}

pub const R1: &str = r#"
name: r1
description: First healthcheck rule
severity: medium
def:
  in_entity: repository
"#;

pub const R2: &str = r#"
name: r2
description: Second healthcheck rule
severity: low
def:
  in_entity: repository
"#;

pub const HC_PROFILE: &str = r#"
name: hc
display_name: Healthcheck
rules:
  - type: r1
  - type: r2
    def:
      branch: main
"#;

pub fn healthcheck_id() -> BundleId {
    BundleId::new("stacklok", "healthcheck").unwrap()
}

pub fn unknown_id() -> BundleId {
    BundleId::new("stacklok", "unknown").unwrap()
}

/// `stacklok/healthcheck` v1.0.0 with rule types r1 and r2 and profile hc.yaml
pub fn healthcheck_builder() -> TarballBuilder {
    TarballBuilder::new(BundleMetadata::new("stacklok", "healthcheck", "1.0.0"))
        .rule_type("r1.yaml", R1)
        .rule_type("r2.yaml", R2)
        .profile("hc.yaml", HC_PROFILE)
}

/// Write the healthcheck bundle into `dir` and return its path
pub fn write_healthcheck(dir: &Path) -> PathBuf {
    let path = dir.join("healthcheck.tar.gz");
    healthcheck_builder().write_to(&path).unwrap();
    path
}

pub async fn healthcheck_source(dir: &Path) -> Arc<dyn BundleSource> {
    Arc::new(TarballSource::open(write_healthcheck(dir)).await.unwrap())
}

pub fn test_project() -> ProjectContext {
    ProjectContext::new(Uuid::new_v4(), Provider::new(Uuid::new_v4(), "github"))
}

/// Source wrapper that counts every call
pub struct CountingSource {
    inner: Arc<dyn BundleSource>,
    pub lists: AtomicUsize,
    pub fetches: AtomicUsize,
}

impl CountingSource {
    pub fn new(inner: Arc<dyn BundleSource>) -> Self {
        Self {
            inner,
            lists: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BundleSource for CountingSource {
    async fn list_bundles(&self) -> Result<Vec<BundleId>, SourceError> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        self.inner.list_bundles().await
    }

    async fn get_bundle(&self, id: &BundleId) -> Result<Arc<dyn BundleReader>, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.get_bundle(id).await
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }
}

/// Querier wrapper that records the name of every call before delegating
pub struct RecordingQuerier<Q> {
    inner: Q,
    calls: Mutex<Vec<&'static str>>,
}

impl<Q: Querier> RecordingQuerier<Q> {
    pub fn new(inner: Q) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == name).count()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn into_inner(self) -> Q {
        self.inner
    }

    fn record(&self, name: &'static str) {
        self.calls.lock().unwrap().push(name);
    }
}

#[async_trait]
impl<Q: Querier> Querier for RecordingQuerier<Q> {
    async fn get_subscription_by_project_bundle(
        &self,
        lookup: &SubscriptionLookup,
    ) -> Result<Subscription, StoreError> {
        self.record("get_subscription_by_project_bundle");
        self.inner.get_subscription_by_project_bundle(lookup).await
    }

    async fn upsert_bundle(&self, namespace: &str, name: &str) -> Result<BundleRecord, StoreError> {
        self.record("upsert_bundle");
        self.inner.upsert_bundle(namespace, name).await
    }

    async fn create_subscription(
        &self,
        params: &NewSubscription,
    ) -> Result<Subscription, StoreError> {
        self.record("create_subscription");
        self.inner.create_subscription(params).await
    }

    async fn upsert_rule_type(
        &self,
        params: &UpsertRuleType,
    ) -> Result<RuleTypeRecord, StoreError> {
        self.record("upsert_rule_type");
        self.inner.upsert_rule_type(params).await
    }

    async fn get_rule_type_by_name(
        &self,
        project_id: Uuid,
        name: &str,
    ) -> Result<RuleTypeRecord, StoreError> {
        self.record("get_rule_type_by_name");
        self.inner.get_rule_type_by_name(project_id, name).await
    }

    async fn create_profile(&self, params: &NewProfile) -> Result<ProfileRecord, StoreError> {
        self.record("create_profile");
        self.inner.create_profile(params).await
    }

    async fn get_profile_by_name(
        &self,
        project_id: Uuid,
        name: &str,
    ) -> Result<ProfileRecord, StoreError> {
        self.record("get_profile_by_name");
        self.inner.get_profile_by_name(project_id, name).await
    }
}

/// One service call as seen by the recording services
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCall {
    pub project_id: Uuid,
    pub provider: Provider,
    pub subscription_id: Uuid,
    pub name: String,
}

/// Rule type service that records each call, optionally fails on one rule
/// type, and otherwise writes through [`StoreRuleTypeService`]
#[derive(Default)]
pub struct RecordingRuleTypes {
    calls: Mutex<Vec<ServiceCall>>,
    fail_on: Option<String>,
}

impl RecordingRuleTypes {
    pub fn failing_on(name: &str) -> Self {
        Self {
            fail_on: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RuleTypeService for RecordingRuleTypes {
    async fn upsert(
        &self,
        project_id: Uuid,
        provider: &Provider,
        subscription_id: Uuid,
        rule_type: &RuleType,
        qtx: &dyn Querier,
    ) -> Result<(), ServiceError> {
        self.calls.lock().unwrap().push(ServiceCall {
            project_id,
            provider: provider.clone(),
            subscription_id,
            name: rule_type.name.clone(),
        });
        if self.fail_on.as_deref() == Some(rule_type.name.as_str()) {
            return Err(ServiceError::Validation(format!(
                "rule type {} rejected",
                rule_type.name
            )));
        }
        StoreRuleTypeService::new()
            .upsert(project_id, provider, subscription_id, rule_type, qtx)
            .await
    }
}

/// Profile service that records each call and writes through
/// [`StoreProfileService`]
#[derive(Default)]
pub struct RecordingProfiles {
    calls: Mutex<Vec<ServiceCall>>,
}

impl RecordingProfiles {
    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProfileService for RecordingProfiles {
    async fn create(
        &self,
        project_id: Uuid,
        provider: &Provider,
        subscription_id: Uuid,
        profile: &Profile,
        qtx: &dyn Querier,
    ) -> Result<(), ServiceError> {
        self.calls.lock().unwrap().push(ServiceCall {
            project_id,
            provider: provider.clone(),
            subscription_id,
            name: profile.name.clone(),
        });
        StoreProfileService::new()
            .create(project_id, provider, subscription_id, profile, qtx)
            .await
    }
}
