//! Versioned schema migrations and the `schema_migrations` ledger.
//!
//! # Design
//! Migrations are kept in a `BTreeMap` keyed by version, so they always run
//! in ascending order regardless of registration order. `Migrator::run`
//! creates the ledger, diffs it against the registered set and applies the
//! missing versions inside one transaction, inserting each ledger row right
//! after its body. A failure anywhere rolls back the whole run.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::Utc;
use rusqlite::{params, Connection};

type ApplyFn = Box<dyn Fn(&Connection) -> rusqlite::Result<()> + Send + Sync>;

/// A one-time schema change.
pub struct Migration {
    pub version: i64,
    pub name: String,
    apply: ApplyFn,
}

impl Migration {
    pub fn new(
        version: i64,
        name: impl Into<String>,
        apply: impl Fn(&Connection) -> rusqlite::Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            version,
            name: name.into(),
            apply: Box::new(apply),
        }
    }

    /// Migration whose body is a batch of SQL statements.
    pub fn sql(version: i64, name: impl Into<String>, sql: &'static str) -> Self {
        Self::new(version, name, move |conn| conn.execute_batch(sql))
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version)
            .field("name", &self.name)
            .finish()
    }
}

/// A row of the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    pub applied_at: chrono::DateTime<Utc>,
}

const CREATE_LEDGER: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT,
    applied_at TIMESTAMP
)";

const CREATE_RECIPES: &str = "CREATE TABLE IF NOT EXISTS recipes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    cuisine TEXT NULL,
    created_at TIMESTAMP NOT NULL
)";

#[derive(Debug, Default)]
pub struct Migrator {
    migrations: BTreeMap<i64, Migration>,
}

impl Migrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Migrator preloaded with the schema this crate ships.
    pub fn builtin() -> Self {
        let mut migrator = Self::new();
        migrator.register(Migration::sql(1, "create_recipes", CREATE_RECIPES));
        migrator
    }

    /// Add `migration`. A later registration for the same version replaces
    /// the earlier one.
    pub fn register(&mut self, migration: Migration) {
        if let Some(previous) = self.migrations.insert(migration.version, migration) {
            tracing::warn!(version = previous.version, name = %previous.name, "migration replaced");
        }
    }

    pub fn versions(&self) -> Vec<i64> {
        self.migrations.keys().copied().collect()
    }

    /// Apply every registered migration missing from the ledger. Returns the
    /// versions applied by this call, in order.
    pub fn run(&self, conn: &mut Connection) -> rusqlite::Result<Vec<i64>> {
        let tx = conn.transaction()?;
        tx.execute_batch(CREATE_LEDGER)?;

        let recorded: HashSet<i64> = recorded_versions(&tx)?.into_iter().collect();
        let mut applied = Vec::new();
        for migration in self.migrations.values() {
            if recorded.contains(&migration.version) {
                continue;
            }
            tracing::info!(version = migration.version, name = %migration.name, "applying migration");
            (migration.apply)(&tx)?;
            tx.execute(
                "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
                params![migration.version, migration.name, Utc::now()],
            )?;
            applied.push(migration.version);
        }

        tx.commit()?;
        Ok(applied)
    }
}

/// Versions present in the ledger, ascending.
pub fn recorded_versions(conn: &Connection) -> rusqlite::Result<Vec<i64>> {
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    rows.collect()
}

/// Full ledger, ascending by version.
pub fn ledger(conn: &Connection) -> rusqlite::Result<Vec<MigrationRecord>> {
    let mut stmt =
        conn.prepare("SELECT version, name, applied_at FROM schema_migrations ORDER BY version")?;
    let rows = stmt.query_map([], |row| {
        Ok(MigrationRecord {
            version: row.get(0)?,
            name: row.get(1)?,
            applied_at: row.get(2)?,
        })
    })?;
    rows.collect()
}
