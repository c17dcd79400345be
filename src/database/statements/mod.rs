//! Units of work that run inside a transaction
//!
//! A [`Statement`] carries all of its parameters explicitly; the transaction
//! coordinator dispatches on the variant.

mod reconcile;
mod upsert;

pub use reconcile::{ReconcileReport, Reconciliation};
pub use upsert::{SaveOutcome, Upsert};

use rusqlite::types::Value;
use serde::Serialize;

use crate::database::core::DatabaseConn;
use crate::error::Result;

#[derive(Debug, Clone)]
pub enum Statement {
    /// Insert or update one record
    Upsert(Upsert),
    /// Make a table match a record list
    Reconciliation(Reconciliation),
    /// A single SQL statement with positional arguments
    Raw { sql: String, args: Vec<Value> },
}

/// Result of one statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StatementOutcome {
    Saved(SaveOutcome),
    Reconciled(ReconcileReport),
    Raw { rows_affected: usize },
}

impl Statement {
    pub fn raw(sql: impl Into<String>) -> Self {
        Statement::Raw {
            sql: sql.into(),
            args: Vec::new(),
        }
    }

    pub fn raw_with_args(sql: impl Into<String>, args: Vec<Value>) -> Self {
        Statement::Raw {
            sql: sql.into(),
            args,
        }
    }

    /// Run against an open connection; the caller owns the transaction
    pub fn run(&self, db: &DatabaseConn) -> Result<StatementOutcome> {
        match self {
            Statement::Upsert(upsert) => upsert.run(db).map(StatementOutcome::Saved),
            Statement::Reconciliation(sync) => sync.run(db).map(StatementOutcome::Reconciled),
            Statement::Raw { sql, args } => db
                .execute_with_args(sql, args)
                .map(|rows_affected| StatementOutcome::Raw { rows_affected }),
        }
    }
}

impl From<Upsert> for Statement {
    fn from(upsert: Upsert) -> Self {
        Statement::Upsert(upsert)
    }
}

impl From<Reconciliation> for Statement {
    fn from(sync: Reconciliation) -> Self {
        Statement::Reconciliation(sync)
    }
}
