//! In-process store with transactional handles
//!
//! [`MemoryStore`] keeps its tables behind a shared lock and enforces the
//! same unique and foreign key constraints a relational schema would.
//! [`MemoryStore::begin`] returns a [`MemoryTx`] that works on a private copy
//! of the tables; `commit` replays its writes against the shared tables,
//! re-checking constraints, and applies all of them or none.
//!
//! Subscriptions are also checked across transactions as they are inserted:
//! a transaction reserves each `(project, bundle)` pair it subscribes, and
//! any other insert of a reserved or already committed pair fails with
//! [`StoreError::UniqueViolation`], the way a row lock on a unique index does.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

use super::{
    BundleRecord, NewProfile, NewSubscription, ProfileRecord, Querier, RuleTypeRecord, StoreError,
    Subscription, SubscriptionLookup, UpsertRuleType,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    bundles: Vec<BundleRecord>,
    subscriptions: Vec<Subscription>,
    rule_types: Vec<RuleTypeRecord>,
    profiles: Vec<ProfileRecord>,
}

/// A write recorded by a transaction, replayed on commit
#[derive(Debug, Clone)]
enum Write {
    Bundle(BundleRecord),
    Subscription(Subscription),
    RuleType(RuleTypeRecord),
    Profile(ProfileRecord),
}

/// Subscription identity that survives bundle ids differing between
/// snapshots
type SubscriptionKey = (Uuid, String, String);

/// Open transactions' subscription reservations, keyed to the owning
/// transaction
type Reservations = Arc<Mutex<HashMap<SubscriptionKey, Uuid>>>;

impl Tables {
    fn subscription_key(&self, row: &Subscription) -> Option<SubscriptionKey> {
        self.bundles
            .iter()
            .find(|b| b.id == row.bundle_id)
            .map(|b| (row.project_id, b.namespace.clone(), b.name.clone()))
    }

    fn has_subscription(&self, key: &SubscriptionKey) -> bool {
        let (project_id, namespace, name) = key;
        self.find_subscription(&SubscriptionLookup::new(namespace, name, *project_id))
            .is_ok()
    }

    fn find_subscription(&self, lookup: &SubscriptionLookup) -> Result<Subscription, StoreError> {
        let bundle = self
            .bundles
            .iter()
            .find(|b| b.namespace == lookup.namespace && b.name == lookup.name)
            .ok_or(StoreError::NotFound)?;
        self.subscriptions
            .iter()
            .find(|s| s.project_id == lookup.project_id && s.bundle_id == bundle.id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    /// Returns the stored row and whether it was inserted
    fn upsert_bundle(&mut self, candidate: BundleRecord) -> (BundleRecord, bool) {
        if let Some(existing) = self
            .bundles
            .iter()
            .find(|b| b.namespace == candidate.namespace && b.name == candidate.name)
        {
            return (existing.clone(), false);
        }
        self.bundles.push(candidate.clone());
        (candidate, true)
    }

    fn insert_subscription(&mut self, row: Subscription) -> Result<Subscription, StoreError> {
        if !self.bundles.iter().any(|b| b.id == row.bundle_id) {
            return Err(StoreError::ForeignKey {
                constraint: "subscriptions_bundle_id_fkey".to_string(),
            });
        }
        if self
            .subscriptions
            .iter()
            .any(|s| s.project_id == row.project_id && s.bundle_id == row.bundle_id)
        {
            return Err(StoreError::UniqueViolation {
                constraint: "subscriptions_project_id_bundle_id_key".to_string(),
            });
        }
        self.subscriptions.push(row.clone());
        Ok(row)
    }

    fn check_subscription(
        &self,
        subscription_id: Option<Uuid>,
        table: &str,
    ) -> Result<(), StoreError> {
        match subscription_id {
            Some(id) if !self.subscriptions.iter().any(|s| s.id == id) => {
                Err(StoreError::ForeignKey {
                    constraint: format!("{table}_subscription_id_fkey"),
                })
            }
            _ => Ok(()),
        }
    }

    fn upsert_rule_type(&mut self, row: RuleTypeRecord) -> Result<RuleTypeRecord, StoreError> {
        self.check_subscription(row.subscription_id, "rule_types")?;
        if let Some(existing) = self
            .rule_types
            .iter_mut()
            .find(|r| r.project_id == row.project_id && r.name == row.name)
        {
            existing.provider_id = row.provider_id;
            existing.subscription_id = row.subscription_id;
            existing.definition = row.definition;
            return Ok(existing.clone());
        }
        self.rule_types.push(row.clone());
        Ok(row)
    }

    fn insert_profile(&mut self, row: ProfileRecord) -> Result<ProfileRecord, StoreError> {
        self.check_subscription(row.subscription_id, "profiles")?;
        if self
            .profiles
            .iter()
            .any(|p| p.project_id == row.project_id && p.name == row.name)
        {
            return Err(StoreError::UniqueViolation {
                constraint: "profiles_project_id_name_key".to_string(),
            });
        }
        self.profiles.push(row.clone());
        Ok(row)
    }

    fn rule_type(&self, project_id: Uuid, name: &str) -> Result<RuleTypeRecord, StoreError> {
        self.rule_types
            .iter()
            .find(|r| r.project_id == project_id && r.name == name)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn profile(&self, project_id: Uuid, name: &str) -> Result<ProfileRecord, StoreError> {
        self.profiles
            .iter()
            .find(|p| p.project_id == project_id && p.name == name)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    /// Replay one write. Bundle rows inserted meanwhile by another
    /// transaction keep their id; `remap` redirects references to it.
    fn apply(&mut self, write: Write, remap: &mut HashMap<Uuid, Uuid>) -> Result<(), StoreError> {
        match write {
            Write::Bundle(row) => {
                let requested = row.id;
                let (stored, _) = self.upsert_bundle(row);
                if stored.id != requested {
                    remap.insert(requested, stored.id);
                }
            }
            Write::Subscription(mut row) => {
                if let Some(id) = remap.get(&row.bundle_id) {
                    row.bundle_id = *id;
                }
                self.insert_subscription(row)?;
            }
            Write::RuleType(row) => {
                self.upsert_rule_type(row)?;
            }
            Write::Profile(row) => {
                self.insert_profile(row)?;
            }
        }
        Ok(())
    }
}

fn subscription_conflict() -> StoreError {
    StoreError::UniqueViolation {
        constraint: "subscriptions_project_id_bundle_id_key".to_string(),
    }
}

/// Reservations held by one transaction, released when it finishes
#[derive(Debug)]
struct ReservationGuard {
    reservations: Reservations,
    owner: Uuid,
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        if let Ok(mut reserved) = self.reservations.lock() {
            reserved.retain(|_, owner| *owner != self.owner);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex
        .lock()
        .map_err(|e| StoreError::Backend(format!("store lock poisoned: {e}")))
}

fn new_subscription(params: &NewSubscription) -> Subscription {
    Subscription {
        id: Uuid::now_v7(),
        project_id: params.project_id,
        bundle_id: params.bundle_id,
        current_version: params.current_version.clone(),
    }
}

fn new_rule_type(params: &UpsertRuleType) -> RuleTypeRecord {
    RuleTypeRecord {
        id: Uuid::now_v7(),
        project_id: params.project_id,
        provider_id: params.provider_id,
        name: params.definition.name.clone(),
        subscription_id: params.subscription_id,
        definition: params.definition.clone(),
    }
}

fn new_profile(params: &NewProfile) -> ProfileRecord {
    ProfileRecord {
        id: Uuid::now_v7(),
        project_id: params.project_id,
        provider_id: params.provider_id,
        name: params.definition.name.clone(),
        subscription_id: params.subscription_id,
        definition: params.definition.clone(),
    }
}

fn new_bundle(namespace: &str, name: &str) -> BundleRecord {
    BundleRecord {
        id: Uuid::now_v7(),
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

/// Shared in-memory tables. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    reservations: Reservations,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a transaction over a snapshot of the current tables
    pub fn begin(&self) -> Result<MemoryTx, StoreError> {
        let snapshot = lock(&self.tables)?.clone();
        Ok(MemoryTx {
            shared: Arc::clone(&self.tables),
            state: Mutex::new(TxState {
                working: snapshot,
                log: Vec::new(),
            }),
            guard: ReservationGuard {
                reservations: Arc::clone(&self.reservations),
                owner: Uuid::new_v4(),
            },
        })
    }

    pub fn bundles(&self) -> Result<Vec<BundleRecord>, StoreError> {
        Ok(lock(&self.tables)?.bundles.clone())
    }

    pub fn subscriptions(&self) -> Result<Vec<Subscription>, StoreError> {
        Ok(lock(&self.tables)?.subscriptions.clone())
    }

    pub fn rule_types(&self) -> Result<Vec<RuleTypeRecord>, StoreError> {
        Ok(lock(&self.tables)?.rule_types.clone())
    }

    pub fn profiles(&self) -> Result<Vec<ProfileRecord>, StoreError> {
        Ok(lock(&self.tables)?.profiles.clone())
    }
}

/// Autocommit access: every call is its own transaction
#[async_trait]
impl Querier for MemoryStore {
    async fn get_subscription_by_project_bundle(
        &self,
        lookup: &SubscriptionLookup,
    ) -> Result<Subscription, StoreError> {
        lock(&self.tables)?.find_subscription(lookup)
    }

    async fn upsert_bundle(&self, namespace: &str, name: &str) -> Result<BundleRecord, StoreError> {
        Ok(lock(&self.tables)?.upsert_bundle(new_bundle(namespace, name)).0)
    }

    async fn create_subscription(
        &self,
        params: &NewSubscription,
    ) -> Result<Subscription, StoreError> {
        let mut tables = lock(&self.tables)?;
        let row = new_subscription(params);
        if let Some(key) = tables.subscription_key(&row) {
            if lock(&self.reservations)?.contains_key(&key) {
                return Err(subscription_conflict());
            }
        }
        tables.insert_subscription(row)
    }

    async fn upsert_rule_type(
        &self,
        params: &UpsertRuleType,
    ) -> Result<RuleTypeRecord, StoreError> {
        lock(&self.tables)?.upsert_rule_type(new_rule_type(params))
    }

    async fn get_rule_type_by_name(
        &self,
        project_id: Uuid,
        name: &str,
    ) -> Result<RuleTypeRecord, StoreError> {
        lock(&self.tables)?.rule_type(project_id, name)
    }

    async fn create_profile(&self, params: &NewProfile) -> Result<ProfileRecord, StoreError> {
        lock(&self.tables)?.insert_profile(new_profile(params))
    }

    async fn get_profile_by_name(
        &self,
        project_id: Uuid,
        name: &str,
    ) -> Result<ProfileRecord, StoreError> {
        lock(&self.tables)?.profile(project_id, name)
    }
}

#[derive(Debug)]
struct TxState {
    working: Tables,
    log: Vec<Write>,
}

/// A transaction over a [`MemoryStore`]
///
/// Reads see the snapshot taken at `begin` plus this transaction's own
/// writes. Dropping the transaction without committing discards them.
#[derive(Debug)]
pub struct MemoryTx {
    shared: Arc<Mutex<Tables>>,
    state: Mutex<TxState>,
    guard: ReservationGuard,
}

impl MemoryTx {
    /// Apply every write, or none if a constraint now fails
    pub fn commit(self) -> Result<(), StoreError> {
        let state = self
            .state
            .into_inner()
            .map_err(|e| StoreError::Backend(format!("transaction lock poisoned: {e}")))?;

        let mut shared = lock(&self.shared)?;
        let mut next = shared.clone();
        let mut remap = HashMap::new();
        let writes = state.log.len();
        for write in state.log {
            next.apply(write, &mut remap)?;
        }
        *shared = next;
        // committed rows take over from the reservations
        drop(self.guard);
        drop(shared);

        debug!("Committed memory transaction with {} writes", writes);
        Ok(())
    }

    pub fn rollback(self) {
        let writes = lock(&self.state).map(|s| s.log.len()).unwrap_or(0);
        debug!("Rolled back memory transaction with {} writes", writes);
    }
}

#[async_trait]
impl Querier for MemoryTx {
    async fn get_subscription_by_project_bundle(
        &self,
        lookup: &SubscriptionLookup,
    ) -> Result<Subscription, StoreError> {
        lock(&self.state)?.working.find_subscription(lookup)
    }

    async fn upsert_bundle(&self, namespace: &str, name: &str) -> Result<BundleRecord, StoreError> {
        let mut state = lock(&self.state)?;
        let (row, inserted) = state.working.upsert_bundle(new_bundle(namespace, name));
        if inserted {
            state.log.push(Write::Bundle(row.clone()));
        }
        Ok(row)
    }

    async fn create_subscription(
        &self,
        params: &NewSubscription,
    ) -> Result<Subscription, StoreError> {
        let mut state = lock(&self.state)?;
        let row = new_subscription(params);

        // Lock order: shared tables, then reservations
        if let Some(key) = state.working.subscription_key(&row) {
            let committed = lock(&self.shared)?;
            let mut reserved = lock(&self.guard.reservations)?;
            let taken = reserved.get(&key).is_some_and(|owner| *owner != self.guard.owner);
            if taken || committed.has_subscription(&key) {
                return Err(subscription_conflict());
            }
            let row = state.working.insert_subscription(row)?;
            reserved.insert(key, self.guard.owner);
            state.log.push(Write::Subscription(row.clone()));
            return Ok(row);
        }

        let row = state.working.insert_subscription(row)?;
        state.log.push(Write::Subscription(row.clone()));
        Ok(row)
    }

    async fn upsert_rule_type(
        &self,
        params: &UpsertRuleType,
    ) -> Result<RuleTypeRecord, StoreError> {
        let mut state = lock(&self.state)?;
        let row = state.working.upsert_rule_type(new_rule_type(params))?;
        state.log.push(Write::RuleType(row.clone()));
        Ok(row)
    }

    async fn get_rule_type_by_name(
        &self,
        project_id: Uuid,
        name: &str,
    ) -> Result<RuleTypeRecord, StoreError> {
        lock(&self.state)?.working.rule_type(project_id, name)
    }

    async fn create_profile(&self, params: &NewProfile) -> Result<ProfileRecord, StoreError> {
        let mut state = lock(&self.state)?;
        let row = state.working.insert_profile(new_profile(params))?;
        state.log.push(Write::Profile(row.clone()));
        Ok(row)
    }

    async fn get_profile_by_name(
        &self,
        project_id: Uuid,
        name: &str,
    ) -> Result<ProfileRecord, StoreError> {
        lock(&self.state)?.working.profile(project_id, name)
    }
}
