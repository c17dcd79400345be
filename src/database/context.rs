//! The database context
//!
//! A [`Database`] is built once with its location, connection settings,
//! migrations and diagnostics, then cloned wherever it is needed. All clones
//! share one [`ConnectionManager`], so they share the physical connection and
//! its reference count.
//!
//! ```rust,ignore
//! use rowkeeper::database::{Database, DatabaseLocation, Record, SqlMigration, Transaction, Upsert};
//!
//! let db = Database::builder(DatabaseLocation::file("/tmp/app.db"))
//!     .migration(SqlMigration::new(
//!         "create_users",
//!         "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)",
//!         "DROP TABLE users",
//!     ))
//!     .build()?;
//!
//! let user = Record::new().with("name", "Mario".to_string());
//! db.execute(&Transaction::new("add user")?.add(Upsert::new("users", "id", user, true)))?;
//! ```

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::info;

use crate::database::core::{
    ConnectionSettings, DatabaseConn, DatabaseLocation, Diagnostics, SchemaManager,
};
use crate::database::manager::{ConnectionGuard, ConnectionManager, SharedConnection};
use crate::database::migration::{Migration, MigrationEngine, MigrationOutcome};
use crate::database::query::Query;
use crate::database::transaction::{Transaction, TransactionReport};
use crate::error::Result;

/// Shared handle to one store
#[derive(Clone)]
pub struct Database {
    manager: Arc<ConnectionManager>,
}

/// Collects everything a [`Database`] needs before first use
pub struct DatabaseBuilder {
    location: DatabaseLocation,
    settings: ConnectionSettings,
    diagnostics: Diagnostics,
    migrations: Vec<Box<dyn Migration>>,
    target: Option<u32>,
}

impl DatabaseBuilder {
    pub fn settings(mut self, settings: ConnectionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Append one migration step; steps apply in the order they are added
    pub fn migration(mut self, step: impl Migration + 'static) -> Self {
        self.migrations.push(Box::new(step));
        self
    }

    pub fn migrations(mut self, steps: Vec<Box<dyn Migration>>) -> Self {
        self.migrations.extend(steps);
        self
    }

    /// Schema version to migrate to; defaults to the number of steps
    pub fn target_version(mut self, target: u32) -> Self {
        self.target = Some(target);
        self
    }

    pub fn build(self) -> Result<Database> {
        let mut engine = MigrationEngine::new(self.migrations)?;
        if let Some(target) = self.target {
            engine = engine.with_target(target)?;
        }
        info!(
            "Database context for {:?} with {} migrations (target version {})",
            self.location,
            engine.len(),
            engine.target()
        );
        Ok(Database {
            manager: Arc::new(ConnectionManager::new(
                self.location,
                self.settings,
                self.diagnostics,
                engine,
            )),
        })
    }
}

impl Database {
    pub fn builder(location: DatabaseLocation) -> DatabaseBuilder {
        DatabaseBuilder {
            location,
            settings: ConnectionSettings::default(),
            diagnostics: Diagnostics::default(),
            migrations: Vec::new(),
            target: None,
        }
    }

    /// Take a reference on the shared connection; pair with [`Database::close`]
    pub fn open(&self) -> Result<SharedConnection> {
        self.manager.open()
    }

    pub fn close(&self) -> Result<()> {
        self.manager.close()
    }

    /// Open and release automatically when the guard drops
    pub fn acquire(&self) -> Result<ConnectionGuard<'_>> {
        self.manager.acquire()
    }

    /// Force the connection closed; this context cannot be opened again
    pub fn teardown(&self) -> Result<()> {
        self.manager.teardown()
    }

    pub fn open_count(&self) -> usize {
        self.manager.open_count()
    }

    pub fn is_open(&self) -> bool {
        self.manager.is_open()
    }

    pub fn last_migration(&self) -> Option<MigrationOutcome> {
        self.manager.last_migration()
    }

    pub fn location(&self) -> &DatabaseLocation {
        self.manager.location()
    }

    /// Run a transaction atomically
    pub fn execute(&self, transaction: &Transaction) -> Result<TransactionReport> {
        transaction.run(&self.manager)
    }

    /// Run a transaction on a worker thread
    ///
    /// Statements inside the transaction keep their order; separate background
    /// transactions are not ordered relative to each other.
    pub fn execute_in_background(
        &self,
        transaction: Transaction,
    ) -> JoinHandle<Result<TransactionReport>> {
        let manager = self.manager.clone();
        thread::spawn(move || transaction.run(&manager))
    }

    /// First mapped row, or the query's default
    pub fn query_one<T: Clone>(&self, query: &Query<T>) -> Result<Option<T>> {
        self.with_connection(|db| query.fetch_one(db))
    }

    /// Every mapped row
    pub fn query_list<T>(&self, query: &Query<T>) -> Result<Vec<T>> {
        self.with_connection(|db| query.fetch_all(db))
    }

    pub fn count_rows(&self, table: &str) -> Result<u64> {
        self.with_connection(|db| db.table_count(table))
    }

    /// User tables in name order
    pub fn table_names(&self) -> Result<Vec<String>> {
        self.with_connection(|db| db.table_names())
    }

    /// Persisted schema version
    pub fn schema_version(&self) -> Result<u32> {
        self.with_connection(|db| SchemaManager::new(db).version())
    }

    /// Run SQL outside any transaction, e.g. the output of the DDL helpers
    pub fn run_batch(&self, sql: &str) -> Result<()> {
        self.with_connection(|db| db.execute_batch(sql))
    }

    /// Compact the store
    ///
    /// Must not be called while a transaction is running on this context.
    pub fn vacuum(&self) -> Result<()> {
        self.with_connection(|db| {
            db.diagnostics().message("Vacuum");
            db.execute_batch("VACUUM")
        })
    }

    /// Run `f` while holding a reference on the connection
    ///
    /// Other calls on this context from inside `f` fail with a state error;
    /// use the `&DatabaseConn` passed to `f` instead.
    pub fn with_connection<T>(&self, f: impl FnOnce(&DatabaseConn) -> Result<T>) -> Result<T> {
        self.manager.acquire()?.with(f)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("location", self.manager.location())
            .field("migrations", self.manager.migrations())
            .field("open_count", &self.manager.open_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::core::{drop_table_sql, truncate_table_sql};
    use crate::database::migration::tests::recording_steps;
    use crate::database::migration::SqlMigration;
    use crate::database::record::{Record, RecordKey};
    use crate::database::statements::{Reconciliation, Statement, StatementOutcome, Upsert};
    use std::sync::Mutex;

    fn users_v1() -> SqlMigration {
        SqlMigration::new(
            "create_users",
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, age INTEGER)",
            "DROP TABLE users",
        )
    }

    fn users_v2() -> SqlMigration {
        SqlMigration::new(
            "create_pets",
            "CREATE TABLE pets (id INTEGER PRIMARY KEY, owner INTEGER, name TEXT)",
            "DROP TABLE pets",
        )
    }

    fn file_db(dir: &tempfile::TempDir) -> Database {
        Database::builder(DatabaseLocation::file(dir.path().join("app.db")))
            .migration(users_v1())
            .migration(users_v2())
            .build()
            .unwrap()
    }

    fn user(id: i64, name: &str, age: i64) -> Record {
        Record::new()
            .with("id", id)
            .with("name", name.to_string())
            .with("age", age)
    }

    fn names_query() -> Query<String> {
        Query::new("SELECT name FROM users ORDER BY id", |row| row.get(0))
    }

    #[test]
    fn test_build_requires_migrations() {
        let err = Database::builder(DatabaseLocation::Memory)
            .build()
            .unwrap_err();
        assert!(err.is_configuration());

        let err = Database::builder(DatabaseLocation::Memory)
            .migration(users_v1())
            .target_version(2)
            .build()
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_create_then_reopen_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let db = file_db(&dir);

        assert_eq!(db.schema_version().unwrap(), 2);
        assert_eq!(
            db.last_migration(),
            Some(MigrationOutcome::Created { version: 2 })
        );

        assert_eq!(db.table_names().unwrap(), vec!["pets", "users"]);
        assert_eq!(
            db.last_migration(),
            Some(MigrationOutcome::NoOp { version: 2 })
        );
        assert_eq!(db.open_count(), 0);
        assert!(!db.is_open());
    }

    #[test]
    fn test_upgrade_applies_only_new_steps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.db");

        let v1 = Database::builder(DatabaseLocation::file(&path))
            .migration(users_v1())
            .build()
            .unwrap();
        assert_eq!(v1.schema_version().unwrap(), 1);

        let v2 = Database::builder(DatabaseLocation::file(&path))
            .migration(users_v1())
            .migration(users_v2())
            .build()
            .unwrap();
        let _handle = v2.open().unwrap();
        assert_eq!(
            v2.last_migration(),
            Some(MigrationOutcome::Upgraded { from: 1, to: 2 })
        );
        assert_eq!(v2.schema_version().unwrap(), 2);
        v2.close().unwrap();
    }

    #[test]
    fn test_downgrade_runs_down_steps_descending() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steps.db");
        let journal = Arc::new(Mutex::new(Vec::new()));

        let full = Database::builder(DatabaseLocation::file(&path))
            .migrations(recording_steps(4, &journal))
            .build()
            .unwrap();
        assert_eq!(full.schema_version().unwrap(), 4);
        journal.lock().unwrap().clear();

        let lowered = Database::builder(DatabaseLocation::file(&path))
            .migrations(recording_steps(4, &journal))
            .target_version(1)
            .build()
            .unwrap();
        assert_eq!(lowered.schema_version().unwrap(), 1);
        assert_eq!(*journal.lock().unwrap(), vec!["down3", "down2", "down1"]);
    }

    #[test]
    fn test_transaction_is_all_or_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let db = file_db(&dir);

        let good = Upsert::new("users", "id", user(1, "John", 27), false);
        let bad = Statement::raw("INSERT INTO missing_table (x) VALUES (1)");
        let err = db
            .execute(&Transaction::new("add john").unwrap().add(good).add(bad))
            .unwrap_err();

        assert!(err.is_transaction());
        assert_eq!(db.count_rows("users").unwrap(), 0);
        assert_eq!(db.open_count(), 0);
    }

    #[test]
    fn test_save_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let db = file_db(&dir);

        let report = db
            .execute(
                &Transaction::new("people")
                    .unwrap()
                    .add(Upsert::new("users", "id", user(1, "John", 27), false))
                    .add(Upsert::new("users", "id", user(2, "Mario", 23), false))
                    .add(Upsert::new("users", "id", user(1, "Johnny", 28), false)),
            )
            .unwrap();
        assert_eq!(report.outcomes.len(), 3);

        assert_eq!(db.query_list(&names_query()).unwrap(), vec!["Johnny", "Mario"]);

        let oldest = Query::new("SELECT name FROM users WHERE age > ?1", |row| row.get(0))
            .arg(100i64)
            .with_default("none".to_string());
        assert_eq!(db.query_one(&oldest).unwrap().as_deref(), Some("none"));
    }

    #[test]
    fn test_reconcile_through_context() {
        let dir = tempfile::tempdir().unwrap();
        let db = file_db(&dir);
        db.execute(
            &Transaction::new("seed")
                .unwrap()
                .add(Reconciliation::new(
                    "users",
                    "id",
                    vec![user(1, "a", 1), user(2, "b", 2), user(3, "c", 3)],
                    false,
                )),
        )
        .unwrap();

        let report = db
            .execute(
                &Transaction::new("sync")
                    .unwrap()
                    .add(Reconciliation::new(
                        "users",
                        "id",
                        vec![user(2, "b", 2), user(3, "c", 3), user(4, "d", 4)],
                        false,
                    )),
            )
            .unwrap();

        match &report.outcomes[0] {
            StatementOutcome::Reconciled(sync) => {
                assert_eq!(sync.deleted, vec![RecordKey::Integer(1)]);
                assert_eq!(sync.inserted, 1);
                assert_eq!(sync.updated, 2);
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let ids = db
            .query_list(&Query::new("SELECT id FROM users ORDER BY id", |row| {
                row.get::<_, i64>(0)
            }))
            .unwrap();
        assert_eq!(ids, vec![2, 3, 4]);
    }

    #[test]
    fn test_background_transactions() {
        let dir = tempfile::tempdir().unwrap();
        let db = file_db(&dir);

        let handles: Vec<_> = (1..=4)
            .map(|i| {
                db.execute_in_background(
                    Transaction::new(format!("bg {}", i))
                        .unwrap()
                        .add(Upsert::new("users", "id", user(i, "bg", i), false)),
                )
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert_eq!(db.count_rows("users").unwrap(), 4);
        assert_eq!(db.open_count(), 0);
    }

    #[test]
    fn test_teardown_makes_context_unusable() {
        let dir = tempfile::tempdir().unwrap();
        let db = file_db(&dir);
        let clone = db.clone();
        let _handle = db.open().unwrap();

        db.teardown().unwrap();

        assert!(!clone.is_open());
        assert!(clone.count_rows("users").unwrap_err().is_state());
        assert!(clone.open().unwrap_err().is_state());
    }

    #[test]
    fn test_hooks_see_transactions_and_survive_panics() {
        let dir = tempfile::tempdir().unwrap();
        let messages = Arc::new(Mutex::new(Vec::new()));
        let sink = messages.clone();
        let diagnostics = Diagnostics::new()
            .with_message_hook(move |text| sink.lock().unwrap().push(text.to_string()))
            .with_query_hook(|_| panic!("query hook exploded"));

        let db = Database::builder(DatabaseLocation::file(dir.path().join("hooks.db")))
            .migration(users_v1())
            .diagnostics(diagnostics)
            .build()
            .unwrap();
        db.execute(
            &Transaction::new("hooked")
                .unwrap()
                .add(Upsert::new("users", "id", user(7, "x", 1), false)),
        )
        .unwrap();

        let messages = messages.lock().unwrap();
        assert!(messages.contains(&"Executing transaction: hooked".to_string()));
        assert!(messages.contains(&"Successful transaction: hooked".to_string()));
        assert!(messages.contains(&"Successfully added record with ID 7 in users".to_string()));
    }

    #[test]
    fn test_nested_read_inside_with_connection_returns() {
        let dir = tempfile::tempdir().unwrap();
        let db = file_db(&dir);
        let (tx, rx) = std::sync::mpsc::channel();

        let worker = db.clone();
        std::thread::spawn(move || {
            let nested = worker.with_connection(|_| Ok(worker.count_rows("users")));
            let _ = tx.send(nested);
        });

        let nested = rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("nested read did not return");
        assert!(nested.unwrap().unwrap_err().is_state());
        assert_eq!(db.count_rows("users").unwrap(), 0);
        assert_eq!(db.open_count(), 0);
    }

    #[test]
    fn test_panicking_mapper_leaves_connection_usable() {
        let dir = tempfile::tempdir().unwrap();
        let db = file_db(&dir);
        let _held = db.open().unwrap();
        db.execute(
            &Transaction::new("seed")
                .unwrap()
                .add(Upsert::new("users", "id", user(1, "a", 1), false)),
        )
        .unwrap();

        let bad: Query<i64> = Query::new("SELECT id FROM users", |_| panic!("mapper bug"));
        let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            db.query_list(&bad)
        }));
        assert!(caught.is_err());

        assert_eq!(db.count_rows("users").unwrap(), 1);
        assert_eq!(db.open_count(), 1);
        db.close().unwrap();
        assert!(!db.is_open());
    }

    #[test]
    fn test_ddl_helpers_and_vacuum() {
        let dir = tempfile::tempdir().unwrap();
        let db = file_db(&dir);
        db.execute(
            &Transaction::new("seed")
                .unwrap()
                .add(Upsert::new("users", "id", user(1, "a", 1), false)),
        )
        .unwrap();

        db.run_batch(&truncate_table_sql("users")).unwrap();
        assert_eq!(db.count_rows("users").unwrap(), 0);

        db.run_batch(&drop_table_sql("pets")).unwrap();
        db.run_batch(&drop_table_sql("pets")).unwrap();
        assert_eq!(db.table_names().unwrap(), vec!["users"]);

        db.vacuum().unwrap();
    }

    #[test]
    fn test_in_memory_store_lives_while_held() {
        let db = Database::builder(DatabaseLocation::Memory)
            .migration(users_v1())
            .build()
            .unwrap();
        let _held = db.open().unwrap();

        db.execute(
            &Transaction::new("mem")
                .unwrap()
                .add(Upsert::new("users", "id", user(1, "m", 1), false)),
        )
        .unwrap();
        assert_eq!(db.count_rows("users").unwrap(), 1);
        assert_eq!(db.open_count(), 1);
        db.close().unwrap();
    }
}
