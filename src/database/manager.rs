//! Reference-counted connection sharing
//!
//! One physical connection exists while at least one holder has it open.
//! The first `open` creates it (running migrations), the last `close`
//! destroys it. The counter and the handle are guarded by one mutex so that
//! open/close pairs from concurrent callers never interleave.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use tracing::{info, warn};

use crate::database::core::{ConnectionSettings, DatabaseConn, DatabaseLocation, Diagnostics};
use crate::database::migration::{MigrationEngine, MigrationOutcome};
use crate::error::{Result, StoreError};

/// Handle to the shared physical connection
///
/// Statements from different holders are serialized on the inner lock. Once
/// the manager physically closes the connection, every further use fails with
/// a state error.
///
/// The lock is not re-entrant: calling [`SharedConnection::with`] again from
/// inside its own closure on the same thread returns a state error. Nested
/// work should use the `&DatabaseConn` the outer closure already holds.
#[derive(Clone)]
pub struct SharedConnection {
    inner: Arc<ConnectionSlot>,
}

struct ConnectionSlot {
    conn: Mutex<Option<DatabaseConn>>,
    owner: Mutex<Option<ThreadId>>,
    closed: AtomicBool,
}

// A panicking closure poisons the lock but leaves the connection usable.
fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Marks the current thread as the connection user until dropped
struct OwnerMark<'a> {
    owner: &'a Mutex<Option<ThreadId>>,
}

impl<'a> OwnerMark<'a> {
    fn set(owner: &'a Mutex<Option<ThreadId>>, id: ThreadId) -> Self {
        *relock(owner) = Some(id);
        Self { owner }
    }
}

impl Drop for OwnerMark<'_> {
    fn drop(&mut self) {
        *relock(self.owner) = None;
    }
}

impl SharedConnection {
    fn new(db: DatabaseConn) -> Self {
        Self {
            inner: Arc::new(ConnectionSlot {
                conn: Mutex::new(Some(db)),
                owner: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Run `f` with exclusive use of the connection
    pub fn with<T>(&self, f: impl FnOnce(&DatabaseConn) -> Result<T>) -> Result<T> {
        let me = thread::current().id();
        if *relock(&self.inner.owner) == Some(me) {
            return Err(StoreError::state(
                "connection is already in use by this thread (nested call)",
            ));
        }

        let guard = relock(&self.inner.conn);
        let db = guard
            .as_ref()
            .ok_or_else(|| StoreError::state("connection is closed"))?;
        let _mark = OwnerMark::set(&self.inner.owner, me);
        f(db)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn shutdown(&self) -> Result<()> {
        if *relock(&self.inner.owner) == Some(thread::current().id()) {
            return Err(StoreError::state(
                "cannot close the connection while this thread is using it",
            ));
        }
        let db = relock(&self.inner.conn).take();
        self.inner.closed.store(true, Ordering::SeqCst);
        match db {
            Some(db) => db.close(),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for SharedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedConnection")
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[derive(Default)]
struct ManagerState {
    open_count: usize,
    handle: Option<SharedConnection>,
    torn_down: bool,
    last_migration: Option<MigrationOutcome>,
}

/// Reference-counted owner of the physical connection
pub struct ConnectionManager {
    location: DatabaseLocation,
    settings: ConnectionSettings,
    diagnostics: Diagnostics,
    migrations: MigrationEngine,
    state: Mutex<ManagerState>,
}

impl ConnectionManager {
    pub fn new(
        location: DatabaseLocation,
        settings: ConnectionSettings,
        diagnostics: Diagnostics,
        migrations: MigrationEngine,
    ) -> Self {
        Self {
            location,
            settings,
            diagnostics,
            migrations,
            state: Mutex::new(ManagerState::default()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ManagerState> {
        relock(&self.state)
    }

    /// Take a reference on the connection, opening and migrating it on 0→1
    ///
    /// A failed physical open or migration leaves the counter unchanged and
    /// no connection open.
    pub fn open(&self) -> Result<SharedConnection> {
        let mut state = self.lock_state();
        if state.torn_down {
            return Err(StoreError::state(
                "connection manager is not initialized (torn down)",
            ));
        }

        if state.open_count == 0 {
            let db = DatabaseConn::open(&self.location, &self.settings, self.diagnostics.clone())?;
            let outcome = match self.migrations.migrate(&db) {
                Ok(outcome) => outcome,
                Err(e) => {
                    if let Err(close_err) = db.close() {
                        warn!("Failed to close database after migration error: {}", close_err);
                    }
                    return Err(e);
                }
            };
            info!("Opened database {:?} ({:?})", self.location, outcome);
            state.last_migration = Some(outcome);
            state.handle = Some(SharedConnection::new(db));
        }

        let handle = state
            .handle
            .clone()
            .ok_or_else(|| StoreError::state("connection handle missing while open"))?;
        state.open_count += 1;
        Ok(handle)
    }

    /// Release a reference, physically closing the connection on 1→0
    pub fn close(&self) -> Result<()> {
        let mut state = self.lock_state();
        if state.open_count == 0 {
            return Err(StoreError::state("close called without a matching open"));
        }

        state.open_count -= 1;
        if state.open_count == 0 {
            if let Some(handle) = state.handle.take() {
                handle.shutdown()?;
                info!("Closed database {:?}", self.location);
            }
        }
        Ok(())
    }

    /// Open and return a guard that closes on drop
    pub fn acquire(&self) -> Result<ConnectionGuard<'_>> {
        let handle = self.open()?;
        Ok(ConnectionGuard {
            manager: self,
            handle,
        })
    }

    /// Close regardless of outstanding references and refuse further opens
    ///
    /// A holder still running a statement finishes it before the connection
    /// is closed.
    pub fn teardown(&self) -> Result<()> {
        let handle = {
            let mut state = self.lock_state();
            state.torn_down = true;
            state.open_count = 0;
            state.last_migration = None;
            state.handle.take()
        };
        if let Some(handle) = handle {
            handle.shutdown()?;
            info!("Tore down database {:?}", self.location);
        }
        Ok(())
    }

    /// Number of outstanding opens
    pub fn open_count(&self) -> usize {
        self.lock_state().open_count
    }

    /// Whether the physical connection currently exists
    pub fn is_open(&self) -> bool {
        self.lock_state()
            .handle
            .as_ref()
            .is_some_and(|h| !h.is_closed())
    }

    pub fn is_torn_down(&self) -> bool {
        self.lock_state().torn_down
    }

    /// Migration result of the most recent physical open
    pub fn last_migration(&self) -> Option<MigrationOutcome> {
        self.lock_state().last_migration
    }

    pub fn location(&self) -> &DatabaseLocation {
        &self.location
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn migrations(&self) -> &MigrationEngine {
        &self.migrations
    }
}

/// Scoped reference on the shared connection; released on drop
pub struct ConnectionGuard<'a> {
    manager: &'a ConnectionManager,
    handle: SharedConnection,
}

impl ConnectionGuard<'_> {
    pub fn with<T>(&self, f: impl FnOnce(&DatabaseConn) -> Result<T>) -> Result<T> {
        self.handle.with(f)
    }

    pub fn handle(&self) -> &SharedConnection {
        &self.handle
    }
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.manager.close() {
            warn!("Failed to release database connection: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::migration::tests::recording_steps;
    use crate::database::migration::SqlMigration;
    use std::sync::Barrier;
    use std::thread;

    fn manager_at(location: DatabaseLocation) -> ConnectionManager {
        let engine = MigrationEngine::new(vec![Box::new(SqlMigration::new(
            "create_items",
            "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT)",
            "DROP TABLE items",
        ))])
        .unwrap();
        ConnectionManager::new(
            location,
            ConnectionSettings::default(),
            Diagnostics::new(),
            engine,
        )
    }

    #[test]
    fn test_open_close_counts() {
        let manager = manager_at(DatabaseLocation::Memory);
        assert!(!manager.is_open());

        let first = manager.open().unwrap();
        let _second = manager.open().unwrap();
        assert_eq!(manager.open_count(), 2);
        assert!(manager.is_open());
        assert_eq!(
            manager.last_migration(),
            Some(MigrationOutcome::Created { version: 1 })
        );

        manager.close().unwrap();
        assert!(manager.is_open());
        first.with(|db| db.table_count("items")).unwrap();

        manager.close().unwrap();
        assert!(!manager.is_open());
        assert!(first.is_closed());
        assert!(first.with(|db| db.table_count("items")).unwrap_err().is_state());
    }

    #[test]
    fn test_close_without_open_is_state_error() {
        let manager = manager_at(DatabaseLocation::Memory);
        assert!(manager.close().unwrap_err().is_state());
        assert_eq!(manager.open_count(), 0);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let manager = manager_at(DatabaseLocation::Memory);
        {
            let guard = manager.acquire().unwrap();
            guard
                .with(|db| db.execute("INSERT INTO items (name) VALUES ('a')"))
                .unwrap();
            assert_eq!(manager.open_count(), 1);
        }
        assert_eq!(manager.open_count(), 0);
        assert!(!manager.is_open());
    }

    #[test]
    fn test_nested_with_is_state_error() {
        let manager = manager_at(DatabaseLocation::Memory);
        let handle = manager.open().unwrap();

        let nested = handle
            .with(|_| Ok(handle.with(|db| db.table_count("items"))))
            .unwrap();
        assert!(nested.unwrap_err().is_state());
        assert_eq!(handle.with(|db| db.table_count("items")).unwrap(), 0);
        manager.close().unwrap();
    }

    #[test]
    fn test_panic_in_closure_keeps_connection_usable() {
        let manager = manager_at(DatabaseLocation::Memory);
        let handle = manager.open().unwrap();

        let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            handle.with(|_| -> Result<()> { panic!("caller bug") })
        }));
        assert!(caught.is_err());

        handle
            .with(|db| db.execute("INSERT INTO items (name) VALUES ('after')"))
            .unwrap();
        assert_eq!(handle.with(|db| db.table_count("items")).unwrap(), 1);

        manager.close().unwrap();
        assert!(handle.is_closed());
        assert!(!manager.is_open());
    }

    #[test]
    fn test_reopen_file_keeps_data_and_skips_migration() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_at(DatabaseLocation::file(dir.path().join("store.db")));

        {
            let guard = manager.acquire().unwrap();
            guard
                .with(|db| db.execute("INSERT INTO items (name) VALUES ('kept')"))
                .unwrap();
        }
        assert!(!manager.is_open());

        let guard = manager.acquire().unwrap();
        assert_eq!(guard.with(|db| db.table_count("items")).unwrap(), 1);
        assert_eq!(
            manager.last_migration(),
            Some(MigrationOutcome::NoOp { version: 1 })
        );
    }

    #[test]
    fn test_teardown_forces_close_and_blocks_reopen() {
        let manager = manager_at(DatabaseLocation::Memory);
        let handle = manager.open().unwrap();
        let _again = manager.open().unwrap();

        manager.teardown().unwrap();

        assert!(handle.is_closed());
        assert_eq!(manager.open_count(), 0);
        assert!(manager.is_torn_down());
        assert!(manager.open().unwrap_err().is_state());
        assert!(manager.close().unwrap_err().is_state());
    }

    #[test]
    fn test_failed_migration_leaves_manager_closed() {
        let engine = MigrationEngine::new(vec![Box::new(SqlMigration::new(
            "broken",
            "CREATE TABLE oops (",
            "",
        ))])
        .unwrap();
        let manager = ConnectionManager::new(
            DatabaseLocation::Memory,
            ConnectionSettings::default(),
            Diagnostics::new(),
            engine,
        );

        let err = manager.open().unwrap_err();
        assert!(err.is_migration());
        assert_eq!(manager.open_count(), 0);
        assert!(!manager.is_open());
    }

    #[test]
    fn test_migrations_run_once_per_physical_open() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let dir = tempfile::tempdir().unwrap();
        let manager = ConnectionManager::new(
            DatabaseLocation::file(dir.path().join("store.db")),
            ConnectionSettings::default(),
            Diagnostics::new(),
            MigrationEngine::new(recording_steps(2, &journal)).unwrap(),
        );

        let _a = manager.open().unwrap();
        let _b = manager.open().unwrap();
        manager.close().unwrap();
        manager.close().unwrap();
        let _c = manager.open().unwrap();

        assert_eq!(*journal.lock().unwrap(), vec!["up0", "up1"]);
    }

    #[test]
    fn test_concurrent_holders_never_see_closed_connection() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(manager_at(DatabaseLocation::file(
            dir.path().join("store.db"),
        )));
        let workers = 8;
        let barrier = Arc::new(Barrier::new(workers));

        let threads: Vec<_> = (0..workers)
            .map(|i| {
                let manager = manager.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    for round in 0..20 {
                        if round == 0 {
                            barrier.wait();
                        }
                        let handle = manager.open().unwrap();
                        handle
                            .with(|db| {
                                db.execute_with_args(
                                    "INSERT INTO items (name) VALUES (?1)",
                                    &[format!("w{i}-{round}").into()],
                                )
                            })
                            .unwrap();
                        assert!(!handle.is_closed());
                        manager.close().unwrap();
                    }
                })
            })
            .collect();

        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(manager.open_count(), 0);
        assert!(!manager.is_open());

        let guard = manager.acquire().unwrap();
        assert_eq!(guard.with(|db| db.table_count("items")).unwrap(), 160);
    }
}
