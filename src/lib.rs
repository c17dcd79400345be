#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Rowkeeper - versioned, transactional access to an embedded SQLite store
//!
//! Rowkeeper keeps one SQLite database on a known schema and writes to it
//! atomically. It can be used as a library or through the `rowkeeper`
//! command-line tool.
//!
//! # Feature Flags
//!
//! | Feature | Description | Key Dependencies |
//! |---------|-------------|------------------|
//! | (none) | Library: migrations, transactions, reconciliation | `rusqlite` |
//! | `display` | `tabled` derives on report types | `tabled` |
//! | `cli` | The `rowkeeper` binary (default) | `clap`, `tracing-subscriber`, `tabled` |
//!
//! # Architecture
//!
//! - **[`database`]**: the storage layer
//!   - `core`: SQLite connection, schema version, diagnostics hooks
//!   - `manager`: reference-counted sharing of the one physical connection
//!   - `migration`: ordered up/down schema steps
//!   - `statements` / `transaction`: upserts, table reconciliation, atomic batches
//!   - `context`: the [`Database`] handle callers build once and clone
//! - **[`config`]**: configuration file and environment handling
//! - **[`error`]**: the [`StoreError`] type
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use rowkeeper::{Database, DatabaseLocation, Query, Record, Reconciliation, SqlMigration, Transaction};
//!
//! let db = Database::builder(DatabaseLocation::file("/tmp/people.db"))
//!     .migration(SqlMigration::new(
//!         "create_people",
//!         "CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT, age INTEGER)",
//!         "DROP TABLE people",
//!     ))
//!     .build()?;
//!
//! // Make the table hold exactly these rows
//! let people = vec![
//!     Record::new().with("id", 1i64).with("name", "John".to_string()).with("age", 27i64),
//!     Record::new().with("id", 2i64).with("name", "Mario".to_string()).with("age", 23i64),
//! ];
//! db.execute(&Transaction::new("sync people")?.add(Reconciliation::new("people", "id", people, false)))?;
//!
//! let adults = db.query_list(&Query::new("SELECT name FROM people WHERE age >= ?1", |row| {
//!     row.get::<_, String>(0)
//! }).arg(18i64))?;
//! ```

pub mod config;
pub mod database;
pub mod error;
pub mod utils;

pub use config::{format_size, get_store_info, RowkeeperConfig, StoreInfo, TableInfo};
pub use database::{
    drop_table_sql, truncate_table_sql, ConnectionSettings, Database, DatabaseBuilder,
    DatabaseLocation, Diagnostics, Migration, MigrationOutcome, Query, Record, RecordKey,
    ReconcileReport, Reconciliation, SaveOutcome, SqlMigration, Statement, StatementOutcome,
    Transaction, TransactionReport, Upsert,
};
pub use error::{Result, StoreError};
pub use utils::OutputFormat;
