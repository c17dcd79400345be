//! Database schema version tracking
//!
//! The schema version lives in SQLite's `user_version` header field, so it is
//! tracked by the storage engine itself and needs no bookkeeping table. This
//! module also holds the raw DDL helpers handed out to callers.

use super::connection::DatabaseConn;
use crate::error::Result;

/// SQL that drops `table` if it exists
pub fn drop_table_sql(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {};", table)
}

/// SQL that empties `table` and compacts the database file
///
/// The `VACUUM` part fails inside a transaction, so run it through
/// `execute_batch` on an idle connection.
pub fn truncate_table_sql(table: &str) -> String {
    format!("DELETE FROM {}; VACUUM;", table)
}

/// Quote an identifier for use in generated SQL
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Schema version reader/writer for an open connection
pub struct SchemaManager<'a> {
    db: &'a DatabaseConn,
}

impl<'a> SchemaManager<'a> {
    /// Create a new schema manager for the given connection
    pub fn new(db: &'a DatabaseConn) -> Self {
        Self { db }
    }

    /// Persisted schema version; 0 for a fresh store
    pub fn version(&self) -> Result<u32> {
        self.db.diagnostics().query("PRAGMA user_version");
        let version: i64 = self
            .db
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;
        Ok(version.max(0) as u32)
    }

    /// Record a new schema version
    pub fn set_version(&self, version: u32) -> Result<()> {
        self.db
            .diagnostics()
            .query(&format!("PRAGMA user_version = {}", version));
        self.db.conn.pragma_update(None, "user_version", version)?;
        Ok(())
    }

    /// Compare the persisted version against `target`
    ///
    /// `available` is the number of known migration steps; a persisted version
    /// beyond it cannot be migrated in either direction.
    pub fn check_status(&self, target: u32, available: usize) -> Result<SchemaStatus> {
        let current = self.version()?;

        let status = if current == target {
            SchemaStatus::Current { version: current }
        } else if current as usize > available {
            SchemaStatus::Incompatible {
                database_version: current,
                available,
            }
        } else if current == 0 {
            SchemaStatus::NotInitialized
        } else if current < target {
            SchemaStatus::NeedsUpgrade {
                from: current,
                to: target,
            }
        } else {
            SchemaStatus::NeedsDowngrade {
                from: current,
                to: target,
            }
        };

        Ok(status)
    }
}

/// Status of the database schema relative to a target version
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaStatus {
    /// Fresh store (version 0) and a non-zero target
    NotInitialized,

    /// Schema already at the target version
    Current { version: u32 },

    /// Schema is older than the target
    NeedsUpgrade { from: u32, to: u32 },

    /// Schema is newer than the target but within the known steps
    NeedsDowngrade { from: u32, to: u32 },

    /// Database is from a version with unknown migration steps
    Incompatible {
        database_version: u32,
        available: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_store_version() {
        let db = DatabaseConn::open_in_memory().unwrap();
        let manager = SchemaManager::new(&db);

        assert_eq!(manager.version().unwrap(), 0);
        assert_eq!(
            manager.check_status(2, 2).unwrap(),
            SchemaStatus::NotInitialized
        );
        assert_eq!(
            manager.check_status(0, 2).unwrap(),
            SchemaStatus::Current { version: 0 }
        );
    }

    #[test]
    fn test_status_transitions() {
        let db = DatabaseConn::open_in_memory().unwrap();
        let manager = SchemaManager::new(&db);

        manager.set_version(2).unwrap();
        assert_eq!(manager.version().unwrap(), 2);

        assert_eq!(
            manager.check_status(4, 4).unwrap(),
            SchemaStatus::NeedsUpgrade { from: 2, to: 4 }
        );
        assert_eq!(
            manager.check_status(1, 4).unwrap(),
            SchemaStatus::NeedsDowngrade { from: 2, to: 1 }
        );
        assert_eq!(
            manager.check_status(1, 1).unwrap(),
            SchemaStatus::Incompatible {
                database_version: 2,
                available: 1
            }
        );
    }

    #[test]
    fn test_ddl_helpers() {
        assert_eq!(drop_table_sql("users"), "DROP TABLE IF EXISTS users;");
        assert_eq!(truncate_table_sql("users"), "DELETE FROM users; VACUUM;");
        assert_eq!(quote_identifier("odd\"name"), "\"odd\"\"name\"");
    }

    #[test]
    fn test_truncate_sql_runs() {
        let db = DatabaseConn::open_in_memory().unwrap();
        db.execute_batch("CREATE TABLE users (id INTEGER PRIMARY KEY); INSERT INTO users DEFAULT VALUES;")
            .unwrap();

        db.execute_batch(&truncate_table_sql("users")).unwrap();
        assert_eq!(db.table_count("users").unwrap(), 0);

        db.execute_batch(&drop_table_sql("users")).unwrap();
        assert!(!db.table_exists("users").unwrap());
    }
}
