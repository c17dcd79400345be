//! Insert-or-update of a single record
//!
//! The branch taken depends on whether the record carries its primary key and
//! whether a row with that key already exists:
//!
//! | key in record | key generated | row exists | action |
//! |---|---|---|---|
//! | no  | yes | -   | `INSERT OR REPLACE` |
//! | no  | no  | -   | configuration error |
//! | yes | -   | yes | `UPDATE` of the non-key fields |
//! | yes | yes | no  | `INSERT` without the key (engine assigns one) |
//! | yes | no  | no  | `INSERT` with the supplied key |

use serde::Serialize;

use crate::database::core::{quote_identifier, DatabaseConn};
use crate::database::record::{Record, RecordKey};
use crate::error::{Result, StoreError};

/// What a save did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "key", rename_all = "lowercase")]
pub enum SaveOutcome {
    Inserted(RecordKey),
    Updated(RecordKey),
}

impl SaveOutcome {
    pub fn key(&self) -> &RecordKey {
        match self {
            SaveOutcome::Inserted(key) | SaveOutcome::Updated(key) => key,
        }
    }
}

/// Save one record into `table`
#[derive(Debug, Clone, PartialEq)]
pub struct Upsert {
    table: String,
    key_field: String,
    record: Record,
    key_generated: bool,
}

impl Upsert {
    pub fn new(
        table: impl Into<String>,
        key_field: impl Into<String>,
        record: Record,
        key_generated: bool,
    ) -> Self {
        Self {
            table: table.into(),
            key_field: key_field.into(),
            record,
            key_generated,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn run(&self, db: &DatabaseConn) -> Result<SaveOutcome> {
        save(
            db,
            &self.table,
            &self.key_field,
            &self.record,
            self.key_generated,
        )
    }
}

pub(crate) fn require_names(table: &str, key_field: &str) -> Result<()> {
    if table.is_empty() {
        return Err(StoreError::config("table name must not be empty"));
    }
    if key_field.is_empty() {
        return Err(StoreError::config("primary key name must not be empty"));
    }
    Ok(())
}

/// Save `source` without touching it; the working copy is private
pub(crate) fn save(
    db: &DatabaseConn,
    table: &str,
    key_field: &str,
    source: &Record,
    key_generated: bool,
) -> Result<SaveOutcome> {
    require_names(table, key_field)?;
    if source.is_empty() {
        return Err(StoreError::config("record to save must not be empty"));
    }

    let mut record = source.clone();
    let key = record.key(key_field)?;
    record.remove(key_field);

    let outcome = match key {
        None if key_generated => {
            let row_id = insert_record(db, table, &record, true)?;
            SaveOutcome::Inserted(RecordKey::Integer(row_id))
        }
        None => {
            return Err(StoreError::config(format!(
                "table '{}' has no generated primary key, but the record has no '{}' value",
                table, key_field
            )));
        }
        Some(key) => {
            if update_by_key(db, table, key_field, &record, &key)? > 0 {
                SaveOutcome::Updated(key)
            } else if key_generated {
                let row_id = insert_record(db, table, &record, false)?;
                SaveOutcome::Inserted(RecordKey::Integer(row_id))
            } else {
                record.set(key_field, key.to_value());
                insert_record(db, table, &record, false)?;
                SaveOutcome::Inserted(key)
            }
        }
    };

    db.diagnostics().message(&match &outcome {
        SaveOutcome::Inserted(key) => {
            format!("Successfully added record with ID {} in {}", key, table)
        }
        SaveOutcome::Updated(key) => {
            format!("Successfully updated record with ID {} in {}", key, table)
        }
    });

    Ok(outcome)
}

/// Insert `record` and return the engine's row id for it
pub(crate) fn insert_record(
    db: &DatabaseConn,
    table: &str,
    record: &Record,
    replace_on_conflict: bool,
) -> Result<i64> {
    let verb = if replace_on_conflict {
        "INSERT OR REPLACE"
    } else {
        "INSERT"
    };

    if record.is_empty() {
        db.execute(&format!(
            "{} INTO {} DEFAULT VALUES",
            verb,
            quote_identifier(table)
        ))?;
    } else {
        let columns: Vec<String> = record.iter().map(|(c, _)| quote_identifier(c)).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let values: Vec<_> = record.iter().map(|(_, v)| v.clone()).collect();
        let sql = format!(
            "{} INTO {} ({}) VALUES ({})",
            verb,
            quote_identifier(table),
            columns.join(", "),
            placeholders.join(", ")
        );
        db.execute_with_args(&sql, &values)?;
    }

    Ok(db.conn.last_insert_rowid())
}

/// Update the non-key fields of the row with `key`; returns matched rows
///
/// With nothing to set, only checks that the row exists.
fn update_by_key(
    db: &DatabaseConn,
    table: &str,
    key_field: &str,
    record: &Record,
    key: &RecordKey,
) -> Result<usize> {
    if record.is_empty() {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} = ?1",
            quote_identifier(table),
            quote_identifier(key_field)
        );
        let count: Option<i64> = db.query_first(&sql, &[key.to_value()], |row| row.get(0))?;
        return Ok(count.unwrap_or(0).max(0) as usize);
    }

    let assignments: Vec<String> = record
        .iter()
        .enumerate()
        .map(|(i, (c, _))| format!("{} = ?{}", quote_identifier(c), i + 1))
        .collect();
    let mut values: Vec<_> = record.iter().map(|(_, v)| v.clone()).collect();
    values.push(key.to_value());

    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?{}",
        quote_identifier(table),
        assignments.join(", "),
        quote_identifier(key_field),
        values.len()
    );
    db.execute_with_args(&sql, &values)
}

pub(crate) fn delete_by_key(
    db: &DatabaseConn,
    table: &str,
    key_field: &str,
    key: &RecordKey,
) -> Result<usize> {
    let sql = format!(
        "DELETE FROM {} WHERE {} = ?1",
        quote_identifier(table),
        quote_identifier(key_field)
    );
    db.execute_with_args(&sql, &[key.to_value()])
}
