//! SQLite-backed store
//!
//! Each [`SqliteTx`] owns its own connection and holds a `BEGIN IMMEDIATE`
//! transaction, so concurrent writers queue on the database lock (bounded by
//! the busy timeout) instead of interleaving. Uniqueness of bundles,
//! subscriptions, rule types and profiles is enforced by the schema.

use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    BundleRecord, NewProfile, NewSubscription, ProfileRecord, Querier, RuleTypeRecord, StoreError,
    Subscription, SubscriptionLookup, UpsertRuleType,
};

/// Default busy timeout while waiting for another writer
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS bundles (
    id TEXT PRIMARY KEY,
    namespace TEXT NOT NULL,
    name TEXT NOT NULL,
    UNIQUE (namespace, name)
);

CREATE TABLE IF NOT EXISTS subscriptions (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    bundle_id TEXT NOT NULL REFERENCES bundles (id),
    current_version TEXT NOT NULL,
    UNIQUE (project_id, bundle_id)
);

CREATE TABLE IF NOT EXISTS rule_types (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    provider_id TEXT NOT NULL,
    name TEXT NOT NULL,
    subscription_id TEXT REFERENCES subscriptions (id),
    definition TEXT NOT NULL,
    UNIQUE (project_id, name)
);

CREATE TABLE IF NOT EXISTS profiles (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    provider_id TEXT NOT NULL,
    name TEXT NOT NULL,
    subscription_id TEXT REFERENCES subscriptions (id),
    definition TEXT NOT NULL,
    UNIQUE (project_id, name)
);

CREATE INDEX IF NOT EXISTS idx_subscriptions_bundle ON subscriptions (bundle_id);
CREATE INDEX IF NOT EXISTS idx_rule_types_subscription ON rule_types (subscription_id);
";

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
            rusqlite::Error::SqliteFailure(failure, message)
                if failure.code == ErrorCode::ConstraintViolation =>
            {
                let constraint = message.clone().unwrap_or_else(|| err.to_string());
                match failure.extended_code {
                    rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                        StoreError::UniqueViolation { constraint }
                    }
                    rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                        StoreError::ForeignKey { constraint }
                    }
                    _ => StoreError::Backend(err.to_string()),
                }
            }
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

fn json_error(err: serde_json::Error) -> StoreError {
    StoreError::Backend(format!("invalid stored definition: {err}"))
}

fn uuid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn optional_uuid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        Uuid::parse_str(&t).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    })
    .transpose()
}

fn subscription_from_row(row: &Row<'_>) -> rusqlite::Result<Subscription> {
    Ok(Subscription {
        id: uuid_column(row, 0)?,
        project_id: uuid_column(row, 1)?,
        bundle_id: uuid_column(row, 2)?,
        current_version: row.get(3)?,
    })
}

/// Columns shared by `rule_types` and `profiles`, definition still encoded
struct ContentRow {
    id: Uuid,
    project_id: Uuid,
    provider_id: Uuid,
    name: String,
    subscription_id: Option<Uuid>,
    definition: String,
}

fn content_from_row(row: &Row<'_>) -> rusqlite::Result<ContentRow> {
    Ok(ContentRow {
        id: uuid_column(row, 0)?,
        project_id: uuid_column(row, 1)?,
        provider_id: uuid_column(row, 2)?,
        name: row.get(3)?,
        subscription_id: optional_uuid_column(row, 4)?,
        definition: row.get(5)?,
    })
}

/// SQLite database holding marketplace state
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply the schema
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        };

        let conn = store.connect()?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!("Opened SQLite store {} (journal_mode={})", store.path.display(), mode);
        conn.execute_batch(SCHEMA)?;

        Ok(store)
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(conn)
    }

    /// Start a write transaction on a fresh connection
    pub fn begin(&self) -> Result<SqliteTx, StoreError> {
        let conn = self.connect()?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(SqliteTx {
            conn: Mutex::new(conn),
            finished: false,
        })
    }
}

/// An open SQLite transaction. Dropping it without `commit` rolls back.
#[derive(Debug)]
pub struct SqliteTx {
    conn: Mutex<Connection>,
    finished: bool,
}

impl SqliteTx {
    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Backend(format!("connection lock poisoned: {e}")))
    }

    pub fn commit(mut self) -> Result<(), StoreError> {
        self.conn()?.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    pub fn rollback(mut self) -> Result<(), StoreError> {
        self.conn()?.execute_batch("ROLLBACK")?;
        self.finished = true;
        Ok(())
    }

    fn content_row(
        &self,
        table: &str,
        project_id: Uuid,
        name: &str,
    ) -> Result<ContentRow, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT id, project_id, provider_id, name, subscription_id, definition
             FROM {table} WHERE project_id = ?1 AND name = ?2"
        );
        let row = conn
            .query_row(&sql, params![project_id.to_string(), name], content_from_row)
            .optional()?;
        row.ok_or(StoreError::NotFound)
    }
}

impl Drop for SqliteTx {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Ok(conn) = self.conn.get_mut() {
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                warn!("Failed to roll back abandoned SQLite transaction: {}", e);
            }
        }
    }
}

#[async_trait]
impl Querier for SqliteTx {
    async fn get_subscription_by_project_bundle(
        &self,
        lookup: &SubscriptionLookup,
    ) -> Result<Subscription, StoreError> {
        let conn = self.conn()?;
        let row = conn.query_row(
            "SELECT s.id, s.project_id, s.bundle_id, s.current_version
             FROM subscriptions s
             JOIN bundles b ON b.id = s.bundle_id
             WHERE b.namespace = ?1 AND b.name = ?2 AND s.project_id = ?3",
            params![lookup.namespace, lookup.name, lookup.project_id.to_string()],
            subscription_from_row,
        )?;
        Ok(row)
    }

    async fn upsert_bundle(&self, namespace: &str, name: &str) -> Result<BundleRecord, StoreError> {
        let conn = self.conn()?;
        let id = conn.query_row(
            "INSERT INTO bundles (id, namespace, name) VALUES (?1, ?2, ?3)
             ON CONFLICT (namespace, name) DO UPDATE SET namespace = excluded.namespace
             RETURNING id",
            params![Uuid::now_v7().to_string(), namespace, name],
            |row| uuid_column(row, 0),
        )?;
        Ok(BundleRecord {
            id,
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }

    async fn create_subscription(
        &self,
        params: &NewSubscription,
    ) -> Result<Subscription, StoreError> {
        let subscription = Subscription {
            id: Uuid::now_v7(),
            project_id: params.project_id,
            bundle_id: params.bundle_id,
            current_version: params.current_version.clone(),
        };
        self.conn()?.execute(
            "INSERT INTO subscriptions (id, project_id, bundle_id, current_version)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                subscription.id.to_string(),
                subscription.project_id.to_string(),
                subscription.bundle_id.to_string(),
                subscription.current_version
            ],
        )?;
        Ok(subscription)
    }

    async fn upsert_rule_type(
        &self,
        params: &UpsertRuleType,
    ) -> Result<RuleTypeRecord, StoreError> {
        let definition = serde_json::to_string(&params.definition).map_err(json_error)?;
        let id = self.conn()?.query_row(
            "INSERT INTO rule_types (id, project_id, provider_id, name, subscription_id, definition)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (project_id, name) DO UPDATE SET
                 provider_id = excluded.provider_id,
                 subscription_id = excluded.subscription_id,
                 definition = excluded.definition
             RETURNING id",
            params![
                Uuid::now_v7().to_string(),
                params.project_id.to_string(),
                params.provider_id.to_string(),
                params.definition.name,
                params.subscription_id.map(|id| id.to_string()),
                definition
            ],
            |row| uuid_column(row, 0),
        )?;
        Ok(RuleTypeRecord {
            id,
            project_id: params.project_id,
            provider_id: params.provider_id,
            name: params.definition.name.clone(),
            subscription_id: params.subscription_id,
            definition: params.definition.clone(),
        })
    }

    async fn get_rule_type_by_name(
        &self,
        project_id: Uuid,
        name: &str,
    ) -> Result<RuleTypeRecord, StoreError> {
        let row = self.content_row("rule_types", project_id, name)?;
        Ok(RuleTypeRecord {
            id: row.id,
            project_id: row.project_id,
            provider_id: row.provider_id,
            name: row.name,
            subscription_id: row.subscription_id,
            definition: serde_json::from_str(&row.definition).map_err(json_error)?,
        })
    }

    async fn create_profile(&self, params: &NewProfile) -> Result<ProfileRecord, StoreError> {
        let record = ProfileRecord {
            id: Uuid::now_v7(),
            project_id: params.project_id,
            provider_id: params.provider_id,
            name: params.definition.name.clone(),
            subscription_id: params.subscription_id,
            definition: params.definition.clone(),
        };
        let definition = serde_json::to_string(&record.definition).map_err(json_error)?;
        self.conn()?.execute(
            "INSERT INTO profiles (id, project_id, provider_id, name, subscription_id, definition)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id.to_string(),
                record.project_id.to_string(),
                record.provider_id.to_string(),
                record.name,
                record.subscription_id.map(|id| id.to_string()),
                definition
            ],
        )?;
        Ok(record)
    }

    async fn get_profile_by_name(
        &self,
        project_id: Uuid,
        name: &str,
    ) -> Result<ProfileRecord, StoreError> {
        let row = self.content_row("profiles", project_id, name)?;
        Ok(ProfileRecord {
            id: row.id,
            project_id: row.project_id,
            provider_id: row.provider_id,
            name: row.name,
            subscription_id: row.subscription_id,
            definition: serde_json::from_str(&row.definition).map_err(json_error)?,
        })
    }
}
