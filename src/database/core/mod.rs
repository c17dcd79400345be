//! Core database infrastructure
//!
//! This module provides the foundational database components:
//! - `DatabaseConn`: physical SQLite connection wrapper with settings and diagnostics
//! - `SchemaManager`: schema version tracking and status
//! - `Diagnostics`: optional query/message hooks

mod connection;
mod diagnostics;
mod schema;

pub use connection::{ConnectionSettings, DatabaseConn, DatabaseLocation, JOURNAL_MODES};
pub use diagnostics::{DiagnosticHook, Diagnostics};
pub use schema::{
    drop_table_sql, quote_identifier, truncate_table_sql, SchemaManager, SchemaStatus,
};
