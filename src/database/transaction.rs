//! Named, all-or-nothing statement batches
//!
//! A [`Transaction`] acquires the shared connection, runs its statements in
//! order inside one storage transaction and commits. The first failing
//! statement aborts the rest; dropping the uncommitted storage transaction
//! rolls back everything done since it began. The connection reference is
//! released on every exit path.

use serde::Serialize;
use tracing::{debug, info};

use crate::database::manager::ConnectionManager;
use crate::database::statements::{Statement, StatementOutcome};
use crate::error::{Result, StoreError};

#[derive(Debug, Clone)]
pub struct Transaction {
    name: String,
    statements: Vec<Statement>,
}

/// One outcome per statement, in execution order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionReport {
    pub name: String,
    pub outcomes: Vec<StatementOutcome>,
}

impl Transaction {
    /// Start an empty transaction; the name is used in diagnostics and errors
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(StoreError::config("a transaction needs a name"));
        }
        Ok(Self {
            name,
            statements: Vec::new(),
        })
    }

    /// Append a statement
    pub fn add(mut self, statement: impl Into<Statement>) -> Self {
        self.statements.push(statement.into());
        self
    }

    pub fn push(&mut self, statement: impl Into<Statement>) {
        self.statements.push(statement.into());
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Run against the connection owned by `manager`
    ///
    /// Lifecycle errors from acquiring the connection surface as they are;
    /// everything that fails after the storage transaction began is wrapped
    /// in [`StoreError::Transaction`].
    pub(crate) fn run(&self, manager: &ConnectionManager) -> Result<TransactionReport> {
        let diagnostics = manager.diagnostics();
        diagnostics.message(&format!("Executing transaction: {}", self.name));

        let guard = manager.acquire()?;
        let outcomes = guard
            .with(|db| {
                let tx = db.transaction()?;
                let mut outcomes = Vec::with_capacity(self.statements.len());
                for (index, statement) in self.statements.iter().enumerate() {
                    debug!("Transaction {} statement {}", self.name, index);
                    outcomes.push(statement.run(db)?);
                }
                tx.commit()?;
                Ok(outcomes)
            })
            .map_err(|source| StoreError::Transaction {
                name: self.name.clone(),
                source: Box::new(source),
            })?;
        drop(guard);

        info!(
            "Committed transaction {} ({} statements)",
            self.name,
            outcomes.len()
        );
        diagnostics.message(&format!("Successful transaction: {}", self.name));

        Ok(TransactionReport {
            name: self.name.clone(),
            outcomes,
        })
    }
}
