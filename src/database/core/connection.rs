//! Database connection management
//!
//! This module provides the physical connection wrapper used by the connection
//! manager. Every statement issued through [`DatabaseConn`] is reported to the
//! attached [`Diagnostics`] before it runs.

use std::path::PathBuf;
use std::time::Duration;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};

use super::diagnostics::Diagnostics;
use super::schema::quote_identifier;
use crate::error::{Result, StoreError};

/// Where the store lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    /// A database file, created on first open
    File(PathBuf),
    /// A private in-memory database; its content is lost on physical close
    Memory,
}

impl DatabaseLocation {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        DatabaseLocation::File(path.into())
    }
}

/// Values accepted by `PRAGMA journal_mode`
pub const JOURNAL_MODES: [&str; 6] = ["DELETE", "TRUNCATE", "PERSIST", "MEMORY", "WAL", "OFF"];

/// Pragmas applied on every physical open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// `PRAGMA journal_mode` value (e.g. `WAL`, `DELETE`)
    pub journal_mode: String,
    /// Enforce foreign-key constraints
    pub foreign_keys: bool,
    /// How long a statement waits on a locked database
    pub busy_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            journal_mode: "WAL".to_string(),
            foreign_keys: true,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Physical SQLite connection
///
/// `DatabaseConn` wraps a single `rusqlite::Connection` together with the
/// diagnostics that observe every statement issued through it.
pub struct DatabaseConn {
    pub conn: Connection,
    diagnostics: Diagnostics,
}

impl DatabaseConn {
    /// Open the database at `location` and apply `settings`
    pub fn open(
        location: &DatabaseLocation,
        settings: &ConnectionSettings,
        diagnostics: Diagnostics,
    ) -> Result<Self> {
        let conn = match location {
            DatabaseLocation::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                Connection::open(path)?
            }
            DatabaseLocation::Memory => Connection::open_in_memory()?,
        };

        let db = DatabaseConn { conn, diagnostics };
        db.configure(settings)?;
        Ok(db)
    }

    /// Create an in-memory database with default settings and no hooks
    pub fn open_in_memory() -> Result<Self> {
        Self::open(
            &DatabaseLocation::Memory,
            &ConnectionSettings::default(),
            Diagnostics::new(),
        )
    }

    fn configure(&self, settings: &ConnectionSettings) -> Result<()> {
        let journal_mode = settings.journal_mode.to_uppercase();
        if !JOURNAL_MODES.contains(&journal_mode.as_str()) {
            return Err(StoreError::config(format!(
                "unknown journal mode '{}', expected one of {}",
                settings.journal_mode,
                JOURNAL_MODES.join(", ")
            )));
        }

        // journal_mode answers with the mode actually in effect ("memory" for in-memory stores)
        let _: String = self.conn.query_row(
            &format!("PRAGMA journal_mode={}", journal_mode),
            [],
            |row| row.get(0),
        )?;

        self.conn.execute("PRAGMA synchronous=NORMAL", [])?;
        self.conn.pragma_update(None, "foreign_keys", settings.foreign_keys)?;
        self.conn.busy_timeout(settings.busy_timeout)?;

        Ok(())
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Execute a SQL statement
    pub fn execute(&self, sql: &str) -> Result<usize> {
        self.diagnostics.query(sql);
        Ok(self.conn.execute(sql, [])?)
    }

    /// Execute a SQL statement with positional arguments
    pub fn execute_with_args(&self, sql: &str, args: &[Value]) -> Result<usize> {
        self.diagnostics.query(sql);
        Ok(self.conn.execute(sql, params_from_iter(args.iter()))?)
    }

    /// Execute several `;`-separated statements without arguments
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.diagnostics.query(sql);
        Ok(self.conn.execute_batch(sql)?)
    }

    /// Map the first row of a query, or `None` when there is no row
    pub fn query_first<T>(
        &self,
        sql: &str,
        args: &[Value],
        mapper: impl FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Option<T>> {
        self.diagnostics.query(sql);
        Ok(self
            .conn
            .query_row(sql, params_from_iter(args.iter()), mapper)
            .optional()?)
    }

    /// Map every row of a query
    pub fn query_all<T>(
        &self,
        sql: &str,
        args: &[Value],
        mut mapper: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Vec<T>> {
        self.diagnostics.query(sql);
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| mapper(row))?;
        Ok(rows.collect::<rusqlite::Result<Vec<T>>>()?)
    }

    /// Begin an unchecked transaction
    ///
    /// Dropping the returned guard without committing rolls back every
    /// statement issued through this connection since it began.
    pub fn transaction(&self) -> Result<rusqlite::Transaction<'_>> {
        self.diagnostics.query("BEGIN DEFERRED");
        Ok(self.conn.unchecked_transaction()?)
    }

    /// Check if a table exists in the database
    pub fn table_exists(&self, table_name: &str) -> Result<bool> {
        let sql = "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1";
        self.diagnostics.query(sql);
        let count: i64 = self.conn.query_row(sql, [table_name], |row| row.get(0))?;
        Ok(count > 0)
    }

    /// Get the row count for a table
    pub fn table_count(&self, table_name: &str) -> Result<u64> {
        if table_name.is_empty() {
            return Err(StoreError::config("table name must not be empty"));
        }
        let sql = format!("SELECT COUNT(*) FROM {}", quote_identifier(table_name));
        self.diagnostics.query(&sql);
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// Names of all user tables, sorted
    pub fn table_names(&self) -> Result<Vec<String>> {
        self.query_all(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            &[],
            |row| row.get(0),
        )
    }

    /// Physically close the connection
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| StoreError::Sqlite(e))
    }
}
