//! Subscriptions against real transactions: commit, rollback and races

mod common;

use common::*;
use marketplace_core::services::{StoreProfileService, StoreRuleTypeService};
use marketplace_core::store::{MemoryStore, Querier, SqliteStore, StoreError, SubscriptionLookup};
use marketplace_core::{
    BundleSource, ErrorKind, Marketplace, ProjectContext, RoutedMarketplace, SubscriptionService,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tempfile::TempDir;

async fn marketplace(dir: &TempDir, rule_types: Arc<RecordingRuleTypes>) -> RoutedMarketplace {
    init_test_logging();
    let source: Arc<dyn BundleSource> = healthcheck_source(dir.path()).await;
    RoutedMarketplace::new(
        vec![source],
        SubscriptionService::new(Arc::new(StoreProfileService::new()), rule_types),
    )
    .await
    .unwrap()
}

fn lookup(project: &ProjectContext) -> SubscriptionLookup {
    SubscriptionLookup::new("stacklok", "healthcheck", project.id)
}

#[tokio::test]
async fn test_sqlite_subscribe_and_add_profile() {
    let dir = TempDir::new().unwrap();
    let marketplace = marketplace(&dir, Arc::new(RecordingRuleTypes::default())).await;
    let store = SqliteStore::open(dir.path().join("marketplace.db")).unwrap();
    let project = test_project();

    let tx = store.begin().unwrap();
    marketplace
        .subscribe(&project, &healthcheck_id(), &tx)
        .await
        .unwrap();
    tx.commit().unwrap();

    let tx = store.begin().unwrap();
    marketplace
        .add_profile(&project, &healthcheck_id(), "hc.yaml", &tx)
        .await
        .unwrap();
    tx.commit().unwrap();

    let tx = store.begin().unwrap();
    let subscription = tx.get_subscription_by_project_bundle(&lookup(&project)).await.unwrap();
    assert_eq!(subscription.current_version, "1.0.0");

    for name in ["r1", "r2"] {
        let rule_type = tx.get_rule_type_by_name(project.id, name).await.unwrap();
        assert_eq!(rule_type.subscription_id, Some(subscription.id));
        assert_eq!(rule_type.provider_id, project.provider.id);
    }
    let profile = tx.get_profile_by_name(project.id, "hc").await.unwrap();
    assert_eq!(profile.subscription_id, Some(subscription.id));
    tx.rollback().unwrap();
}

#[tokio::test]
async fn test_sqlite_rollback_leaves_no_subscription() {
    let dir = TempDir::new().unwrap();
    let marketplace = marketplace(&dir, Arc::new(RecordingRuleTypes::failing_on("r2"))).await;
    let store = SqliteStore::open(dir.path().join("marketplace.db")).unwrap();
    let project = test_project();

    let tx = store.begin().unwrap();
    let err = marketplace
        .subscribe(&project, &healthcheck_id(), &tx)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RulesCreate);
    tx.rollback().unwrap();

    let tx = store.begin().unwrap();
    let err = tx
        .get_subscription_by_project_bundle(&lookup(&project))
        .await
        .unwrap_err();
    assert_eq!(err, StoreError::NotFound);
    assert!(tx
        .get_rule_type_by_name(project.id, "r1")
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_sqlite_dropped_transaction_rolls_back() {
    let dir = TempDir::new().unwrap();
    let marketplace = marketplace(&dir, Arc::new(RecordingRuleTypes::default())).await;
    let store = SqliteStore::open(dir.path().join("marketplace.db")).unwrap();
    let project = test_project();

    {
        let tx = store.begin().unwrap();
        marketplace
            .subscribe(&project, &healthcheck_id(), &tx)
            .await
            .unwrap();
    }

    let tx = store.begin().unwrap();
    assert!(tx
        .get_subscription_by_project_bundle(&lookup(&project))
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_subscribe_is_idempotent_across_transactions() {
    let dir = TempDir::new().unwrap();
    let rule_types = Arc::new(RecordingRuleTypes::default());
    let marketplace = marketplace(&dir, rule_types.clone()).await;
    let store = MemoryStore::new();
    let project = test_project();

    for _ in 0..3 {
        let tx = store.begin().unwrap();
        marketplace
            .subscribe(&project, &healthcheck_id(), &tx)
            .await
            .unwrap();
        tx.commit().unwrap();
    }

    assert_eq!(store.bundles().unwrap().len(), 1);
    assert_eq!(store.subscriptions().unwrap().len(), 1);
    assert_eq!(store.rule_types().unwrap().len(), 2);
    assert_eq!(rule_types.calls().len(), 2);
}

#[tokio::test]
async fn test_concurrent_first_subscribe() {
    let dir = TempDir::new().unwrap();
    let rule_types = Arc::new(RecordingRuleTypes::default());
    let marketplace = marketplace(&dir, rule_types.clone()).await;
    let store = MemoryStore::new();
    let project = test_project();

    let first = store.begin().unwrap();
    let second = store.begin().unwrap();
    let first_id = healthcheck_id();
    let second_id = healthcheck_id();
    let (won, lost) = tokio::join!(
        marketplace.subscribe(&project, &first_id, &first),
        marketplace.subscribe(&project, &second_id, &second),
    );

    won.unwrap();
    let err = lost.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SubscriptionCreate);
    assert!(err
        .to_string()
        .contains("error while creating subscription: unique constraint violated"));
    // the losing call never reached the rule type fan-out
    assert_eq!(rule_types.calls().len(), 2);

    first.commit().unwrap();
    second.rollback();
    assert_eq!(store.subscriptions().unwrap().len(), 1);

    // a retry sees the committed row and does nothing
    let retry = RecordingQuerier::new(store.begin().unwrap());
    marketplace
        .subscribe(&project, &healthcheck_id(), &retry)
        .await
        .unwrap();
    assert_eq!(retry.calls(), vec!["get_subscription_by_project_bundle"]);
}

#[tokio::test]
async fn test_projects_subscribe_independently() {
    let dir = TempDir::new().unwrap();
    let marketplace = marketplace(&dir, Arc::new(RecordingRuleTypes::default())).await;
    let store = MemoryStore::new();

    let first = test_project();
    let second = test_project();
    marketplace
        .subscribe(&first, &healthcheck_id(), &store)
        .await
        .unwrap();
    marketplace
        .subscribe(&second, &healthcheck_id(), &store)
        .await
        .unwrap();

    assert_eq!(store.bundles().unwrap().len(), 1);
    assert_eq!(store.subscriptions().unwrap().len(), 2);
    assert_eq!(store.rule_types().unwrap().len(), 4);

    let err = marketplace
        .add_profile(&test_project(), &healthcheck_id(), "hc.yaml", &store)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotSubscribed);
}
