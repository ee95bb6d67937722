//! Local SQLite store.
//!
//! # Design
//! `Store` owns one writer connection and a handful of read-only reader
//! connections, all opened on the same WAL-mode database file. A
//! `RwLock<()>` gate lets any number of reads proceed together while a
//! write holds it exclusively. Connections are only published after
//! migrations have succeeded and every reader is open, so callers never
//! observe a half-initialized store.

use std::error::Error as StdError;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard, RwLock};
use rusqlite::{Connection, OpenFlags, Transaction};
use thiserror::Error;

use crate::migration::{self, Migration, MigrationRecord, Migrator};

/// Default database file name inside the support directory.
pub const DEFAULT_DATABASE_FILE: &str = "kitchen.sqlite";

const BUSY_TIMEOUT: Duration = Duration::from_secs(3);
const READER_CONNECTIONS: usize = 4;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store is not initialized")]
    NotInitialized,
    #[error("store is already initialized")]
    AlreadyInitialized,
    #[error("store setup failed: {source}")]
    MigrationFailed {
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    #[error("database operation failed: {0}")]
    ExecutionFailed(#[source] rusqlite::Error),
}

impl StoreError {
    /// Stable numeric code, disjoint from `ApiError::code`.
    pub fn code(&self) -> i32 {
        match self {
            StoreError::NotInitialized => 3000,
            StoreError::AlreadyInitialized => 3001,
            StoreError::MigrationFailed { .. } => 3002,
            StoreError::ExecutionFailed(_) => 3003,
        }
    }

    fn migration(source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::MigrationFailed {
            source: source.into(),
        }
    }
}

struct Connections {
    path: PathBuf,
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
}

impl Connections {
    /// Any idle reader, or wait on the next one in rotation.
    fn reader(&self) -> MutexGuard<'_, Connection> {
        let start = self.next_reader.fetch_add(1, Ordering::Relaxed);
        let count = self.readers.len();
        for offset in 0..count {
            if let Some(guard) = self.readers[(start + offset) % count].try_lock() {
                return guard;
            }
        }
        self.readers[start % count].lock()
    }
}

pub struct Store {
    support_dir: PathBuf,
    migrator: Mutex<Migrator>,
    gate: RwLock<()>,
    connections: OnceLock<Connections>,
}

impl Store {
    /// Store rooted at `support_dir`. Nothing touches the disk until
    /// [`Store::setup`].
    pub fn new(support_dir: impl Into<PathBuf>) -> Self {
        Self {
            support_dir: support_dir.into(),
            migrator: Mutex::new(Migrator::builtin()),
            gate: RwLock::new(()),
            connections: OnceLock::new(),
        }
    }

    /// Add a migration to run on setup. Has no effect once the store is
    /// ready.
    pub fn register_migration(&self, migration: Migration) {
        if self.is_ready() {
            tracing::warn!(version = migration.version, "migration registered after setup, ignoring");
            return;
        }
        self.migrator.lock().register(migration);
    }

    /// Open `file_name` inside the support directory, apply pending
    /// migrations and open the reader connections.
    pub fn setup(&self, file_name: &str) -> Result<(), StoreError> {
        if self.is_ready() {
            return Err(StoreError::AlreadyInitialized);
        }
        let path = self.support_dir.join(file_name);
        let connections = self.open(&path).map_err(StoreError::migration)?;
        self.connections
            .set(connections)
            .map_err(|_| StoreError::AlreadyInitialized)?;
        tracing::info!(path = %path.display(), "store ready");
        Ok(())
    }

    fn open(&self, path: &Path) -> Result<Connections, Box<dyn StdError + Send + Sync>> {
        std::fs::create_dir_all(&self.support_dir)?;

        let mut writer = Connection::open(path)?;
        writer.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String =
            writer.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(journal_mode = %mode, "writer connection open");

        let applied = self.migrator.lock().run(&mut writer)?;
        if !applied.is_empty() {
            tracing::info!(?applied, "migrations applied");
        }

        let readers = (0..READER_CONNECTIONS)
            .map(|_| open_reader(path).map(Mutex::new))
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Connections {
            path: path.to_path_buf(),
            writer: Mutex::new(writer),
            readers,
            next_reader: AtomicUsize::new(0),
        })
    }

    pub fn is_ready(&self) -> bool {
        self.connections.get().is_some()
    }

    /// Database file path, once set up.
    pub fn path(&self) -> Option<&Path> {
        self.connections.get().map(|c| c.path.as_path())
    }

    fn ready(&self) -> Result<&Connections, StoreError> {
        self.connections.get().ok_or(StoreError::NotInitialized)
    }

    /// Run `op` on a reader connection. Reads may overlap each other but
    /// never a write.
    pub fn read<T>(
        &self,
        op: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, StoreError> {
        let connections = self.ready()?;
        let _shared = self.gate.read();
        let conn = connections.reader();
        op(&conn).map_err(StoreError::ExecutionFailed)
    }

    /// Run `op` on the writer connection with no other read or write in
    /// flight.
    pub fn write<T>(
        &self,
        op: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, StoreError> {
        let connections = self.ready()?;
        let _exclusive = self.gate.write();
        let conn = connections.writer.lock();
        op(&conn).map_err(StoreError::ExecutionFailed)
    }

    /// Like [`Store::write`], inside a transaction that commits only if `op`
    /// succeeds.
    pub fn write_transaction<T>(
        &self,
        op: impl FnOnce(&Transaction<'_>) -> rusqlite::Result<T>,
    ) -> Result<T, StoreError> {
        let connections = self.ready()?;
        let _exclusive = self.gate.write();
        let mut conn = connections.writer.lock();
        let tx = conn.transaction().map_err(StoreError::ExecutionFailed)?;
        let value = op(&tx).map_err(StoreError::ExecutionFailed)?;
        tx.commit().map_err(StoreError::ExecutionFailed)?;
        Ok(value)
    }

    pub fn applied_migrations(&self) -> Result<Vec<MigrationRecord>, StoreError> {
        self.read(migration::ledger)
    }

    /// Versions recorded in the ledger, ascending.
    pub fn applied_versions(&self) -> Result<Vec<i64>, StoreError> {
        self.read(migration::recorded_versions)
    }
}

fn open_reader(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("support_dir", &self.support_dir)
            .field("ready", &self.is_ready())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn ready_store(dir: &Path) -> Store {
        let store = Store::new(dir);
        store.setup(DEFAULT_DATABASE_FILE).unwrap();
        store
    }

    #[test]
    fn operations_before_setup_fail() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        let err = store.read(|_| Ok(())).unwrap_err();
        assert!(matches!(err, StoreError::NotInitialized));
        assert_eq!(err.code(), 3000);
        assert!(matches!(store.write(|_| Ok(())), Err(StoreError::NotInitialized)));
        assert!(matches!(
            store.write_transaction(|_| Ok(())),
            Err(StoreError::NotInitialized)
        ));
        assert!(store.path().is_none());
    }

    #[test]
    fn setup_creates_directory_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let support = dir.path().join("Application Support").join("kitchen");
        let store = ready_store(&support);
        assert!(store.path().unwrap().exists());

        let ledger = store.applied_migrations().unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].name, "create_recipes");
    }

    #[test]
    fn second_setup_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ready_store(dir.path());
        assert!(matches!(
            store.setup(DEFAULT_DATABASE_FILE),
            Err(StoreError::AlreadyInitialized)
        ));
    }

    #[test]
    fn reopening_applies_only_new_migrations() {
        let dir = tempfile::tempdir().unwrap();
        drop(ready_store(dir.path()));

        let store = Store::new(dir.path());
        store.register_migration(Migration::sql(
            2,
            "add_recipe_servings",
            "ALTER TABLE recipes ADD COLUMN servings INTEGER",
        ));
        store.setup(DEFAULT_DATABASE_FILE).unwrap();

        assert_eq!(store.applied_versions().unwrap(), vec![1, 2]);
    }

    #[test]
    fn failed_migration_leaves_store_unready() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        store.register_migration(Migration::sql(2, "broken", "NOT SQL"));
        let err = store.setup(DEFAULT_DATABASE_FILE).unwrap_err();
        assert!(matches!(err, StoreError::MigrationFailed { .. }));
        assert!(!store.is_ready());
        assert!(matches!(store.read(|_| Ok(())), Err(StoreError::NotInitialized)));
    }

    #[test]
    fn op_errors_surface_as_execution_failed() {
        let dir = tempfile::tempdir().unwrap();
        let store = ready_store(dir.path());
        let err = store
            .read(|conn| conn.execute_batch("SELECT * FROM missing_table"))
            .unwrap_err();
        assert!(matches!(err, StoreError::ExecutionFailed(_)));
    }

    #[test]
    fn readers_cannot_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = ready_store(dir.path());
        let result = store.read(|conn| {
            conn.execute(
                "INSERT INTO recipes (name, created_at) VALUES ('x', '2024-01-01')",
                [],
            )
        });
        assert!(matches!(result, Err(StoreError::ExecutionFailed(_))));
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = ready_store(dir.path());
        let result = store.write_transaction(|tx| {
            tx.execute(
                "INSERT INTO recipes (name, created_at) VALUES ('kept?', '2024-01-01')",
                [],
            )?;
            tx.execute("INSERT INTO nowhere VALUES (1)", [])
        });
        assert!(result.is_err());
        let count: i64 = store
            .read(|conn| conn.query_row("SELECT COUNT(*) FROM recipes", [], |r| r.get(0)))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn reads_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ready_store(dir.path()));
        // Both reads must be inside the store at the same time to pass.
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    store
                        .read(|conn| {
                            barrier.wait();
                            conn.query_row("SELECT COUNT(*) FROM recipes", [], |r| {
                                r.get::<_, i64>(0)
                            })
                        })
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 0);
        }
    }

    #[test]
    fn writes_exclude_reads_and_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ready_store(dir.path()));
        let readers = Arc::new(AtomicUsize::new(0));
        let writers = Arc::new(AtomicUsize::new(0));
        let violated = Arc::new(AtomicBool::new(false));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                let readers = Arc::clone(&readers);
                let writers = Arc::clone(&writers);
                let violated = Arc::clone(&violated);
                thread::spawn(move || {
                    for _ in 0..10 {
                        if i % 2 == 0 {
                            store
                                .write(|conn| {
                                    if writers.fetch_add(1, Ordering::SeqCst) != 0
                                        || readers.load(Ordering::SeqCst) != 0
                                    {
                                        violated.store(true, Ordering::SeqCst);
                                    }
                                    conn.execute(
                                        "INSERT INTO recipes (name, created_at) VALUES ('w', '2024-01-01')",
                                        [],
                                    )?;
                                    thread::sleep(Duration::from_millis(1));
                                    writers.fetch_sub(1, Ordering::SeqCst);
                                    Ok(())
                                })
                                .unwrap();
                        } else {
                            store
                                .read(|_| {
                                    readers.fetch_add(1, Ordering::SeqCst);
                                    if writers.load(Ordering::SeqCst) != 0 {
                                        violated.store(true, Ordering::SeqCst);
                                    }
                                    thread::sleep(Duration::from_millis(1));
                                    readers.fetch_sub(1, Ordering::SeqCst);
                                    Ok(())
                                })
                                .unwrap();
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(!violated.load(Ordering::SeqCst));

        let count: i64 = store
            .read(|conn| conn.query_row("SELECT COUNT(*) FROM recipes", [], |r| r.get(0)))
            .unwrap();
        assert_eq!(count, 40);
    }
}
