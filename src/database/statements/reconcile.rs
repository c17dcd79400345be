//! Table reconciliation against a record list
//!
//! After a successful run the table holds exactly the keys of the supplied
//! list: persisted rows whose key is not in the list are deleted, every list
//! entry is saved. An empty table is bulk-loaded without consulting the key
//! query at all.

use std::collections::HashSet;

use serde::Serialize;

use super::upsert::{delete_by_key, insert_record, require_names, save, SaveOutcome};
use crate::database::core::DatabaseConn;
use crate::database::query::Query;
use crate::database::record::{Record, RecordKey};
use crate::error::Result;

/// What a reconciliation did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub table: String,
    /// Keys removed because they were not in the list, in key-query order
    pub deleted: Vec<RecordKey>,
    pub inserted: usize,
    pub updated: usize,
}

/// Make `table` match `records`
#[derive(Debug, Clone)]
pub struct Reconciliation {
    table: String,
    key_field: String,
    records: Vec<Record>,
    key_query: Query<RecordKey>,
    key_generated: bool,
}

impl Reconciliation {
    /// Reconcile using `SELECT <key_field> FROM <table>` to list persisted keys
    pub fn new(
        table: impl Into<String>,
        key_field: impl Into<String>,
        records: Vec<Record>,
        key_generated: bool,
    ) -> Self {
        let table = table.into();
        let key_field = key_field.into();
        let key_query = Query::primary_keys(&table, &key_field);
        Self {
            table,
            key_field,
            records,
            key_query,
            key_generated,
        }
    }

    /// Replace the query listing persisted keys
    pub fn with_key_query(mut self, key_query: Query<RecordKey>) -> Self {
        self.key_query = key_query;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn run(&self, db: &DatabaseConn) -> Result<ReconcileReport> {
        require_names(&self.table, &self.key_field)?;
        let diagnostics = db.diagnostics();
        let mut report = ReconcileReport {
            table: self.table.clone(),
            ..Default::default()
        };

        if db.table_count(&self.table)? == 0 {
            diagnostics.message(&format!("{} is empty", self.table));
            for source in &self.records {
                let mut record = source.clone();
                let key = record.key(&self.key_field)?;
                if self.key_generated {
                    record.remove(&self.key_field);
                }
                diagnostics.message(&format!(
                    "Inserting record with ID {} in {}",
                    key.map(|k| k.to_string())
                        .unwrap_or_else(|| "<generated>".to_string()),
                    self.table
                ));
                insert_record(db, &self.table, &record, false)?;
                report.inserted += 1;
            }
            return Ok(report);
        }

        let wanted = self.listed_keys()?;
        for key in self.key_query.fetch_all(db)? {
            if wanted.contains(&key) {
                continue;
            }
            diagnostics.message(&format!(
                "Deleting record with ID {} from {}",
                key, self.table
            ));
            delete_by_key(db, &self.table, &self.key_field, &key)?;
            report.deleted.push(key);
        }

        for record in &self.records {
            match save(
                db,
                &self.table,
                &self.key_field,
                record,
                self.key_generated,
            )? {
                SaveOutcome::Inserted(_) => report.inserted += 1,
                SaveOutcome::Updated(_) => report.updated += 1,
            }
        }

        Ok(report)
    }

    /// Keys carried by the new list
    fn listed_keys(&self) -> Result<HashSet<RecordKey>> {
        let mut keys = HashSet::with_capacity(self.records.len());
        for record in &self.records {
            if let Some(key) = record.key(&self.key_field)? {
                keys.insert(key);
            }
        }
        Ok(keys)
    }
}
