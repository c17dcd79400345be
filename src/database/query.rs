//! Read-path query descriptions
//!
//! A [`Query`] is statement text, positional arguments, a row-mapping function
//! and an optional default. The mapper is a plain function from one row to one
//! value, so the storage layer stays agnostic of the caller's row types.

use rusqlite::types::Value;
use rusqlite::Row;

use crate::database::core::{quote_identifier, DatabaseConn};
use crate::database::record::RecordKey;
use crate::error::Result;

/// Maps one raw row to one typed value
pub type RowMapper<T> = fn(&Row<'_>) -> rusqlite::Result<T>;

#[derive(Clone)]
pub struct Query<T> {
    sql: String,
    args: Vec<Value>,
    mapper: RowMapper<T>,
    default: Option<T>,
}

impl<T> Query<T> {
    pub fn new(sql: impl Into<String>, mapper: RowMapper<T>) -> Self {
        Self {
            sql: sql.into(),
            args: Vec::new(),
            mapper,
            default: None,
        }
    }

    /// Append one positional argument
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn args(mut self, values: Vec<Value>) -> Self {
        self.args = values;
        self
    }

    /// Value returned by single-row reads when no row matches
    pub fn with_default(mut self, default: T) -> Self {
        self.default = Some(default);
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn arguments(&self) -> &[Value] {
        &self.args
    }

    /// Map every row
    pub fn fetch_all(&self, db: &DatabaseConn) -> Result<Vec<T>> {
        db.query_all(&self.sql, &self.args, self.mapper)
    }
}

impl<T: Clone> Query<T> {
    /// Map the first row, falling back to the default
    pub fn fetch_one(&self, db: &DatabaseConn) -> Result<Option<T>> {
        let first = db.query_first(&self.sql, &self.args, self.mapper)?;
        Ok(first.or_else(|| self.default.clone()))
    }
}

impl Query<RecordKey> {
    /// `SELECT <key_field> FROM <table>`
    pub fn primary_keys(table: &str, key_field: &str) -> Self {
        Query::new(
            format!(
                "SELECT {} FROM {}",
                quote_identifier(key_field),
                quote_identifier(table)
            ),
            |row| row.get(0),
        )
    }
}

impl<T> std::fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("sql", &self.sql)
            .field("args", &self.args)
            .field("has_default", &self.default.is_some())
            .finish()
    }
}
