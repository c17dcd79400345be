//! Database module
//!
//! Everything needed to keep one SQLite store on a known schema and to write
//! to it atomically:
//!
//! ```text
//! database/
//! ├── core/           # Foundation
//! │   ├── connection  # SQLite DatabaseConn wrapper and connection settings
//! │   ├── diagnostics # Query/message hooks
//! │   └── schema      # user_version tracking and DDL helpers
//! │
//! ├── manager         # Reference-counted sharing of the physical connection
//! ├── migration       # Ordered up/down schema steps
//! ├── record          # Caller records and primary keys
//! ├── query           # Read-path query descriptions
//! ├── statements/     # Upsert, reconciliation and raw statements
//! ├── transaction     # Named all-or-nothing statement batches
//! └── context         # The Database context tying it all together
//! ```
//!
//! Most callers only need [`Database`], [`Transaction`], the statement types
//! and [`Query`].

pub mod context;
pub mod core;
pub mod manager;
pub mod migration;
pub mod query;
pub mod record;
pub mod statements;
pub mod transaction;

pub use context::{Database, DatabaseBuilder};
pub use core::{
    drop_table_sql, quote_identifier, truncate_table_sql, ConnectionSettings, DatabaseConn,
    DatabaseLocation, DiagnosticHook, Diagnostics, SchemaManager, SchemaStatus, JOURNAL_MODES,
};
pub use manager::{ConnectionGuard, ConnectionManager, SharedConnection};
pub use migration::{Migration, MigrationEngine, MigrationOutcome, SqlMigration};
pub use query::{Query, RowMapper};
pub use record::{Record, RecordKey};
pub use statements::{
    ReconcileReport, Reconciliation, SaveOutcome, Statement, StatementOutcome, Upsert,
};
pub use transaction::{Transaction, TransactionReport};
