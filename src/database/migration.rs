//! Versioned schema migrations
//!
//! Step `i` (0-based) transforms the schema from version `i` to `i + 1`. On
//! each physical open the [`MigrationEngine`] compares the persisted version
//! with its target and either creates, upgrades, downgrades or leaves the
//! schema alone.
//!
//! Every step runs inside its own storage transaction together with the
//! version bump. A failing step stops the sequence; steps completed before it
//! stay applied and the persisted version names the last of them.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::info;

use crate::database::core::{DatabaseConn, SchemaManager, SchemaStatus};
use crate::error::{MigrationDirection, Result, StoreError};

/// A reversible schema transform
pub trait Migration: Send + Sync {
    /// Name used in diagnostics and errors
    fn name(&self) -> &str {
        "unnamed"
    }

    /// Apply the transform (create/alter)
    fn up(&self, conn: &DatabaseConn) -> Result<()>;

    /// Revert the transform (drop or reconstructive alter)
    fn down(&self, conn: &DatabaseConn) -> Result<()>;
}

/// A migration step made of two SQL batches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlMigration {
    name: String,
    up: String,
    down: String,
}

impl SqlMigration {
    pub fn new(name: impl Into<String>, up: impl Into<String>, down: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            up: up.into(),
            down: down.into(),
        }
    }

    pub fn up_sql(&self) -> &str {
        &self.up
    }

    pub fn down_sql(&self) -> &str {
        &self.down
    }

    /// Load `NNN_name.up.sql` / `NNN_name.down.sql` pairs from a directory
    ///
    /// Steps are ordered by their numeric prefix. A step without a down file
    /// gets an empty down; a down file without an up file is an error.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Vec<SqlMigration>> {
        let dir = dir.as_ref();
        let mut found: BTreeMap<u64, (String, Option<String>, Option<String>)> = BTreeMap::new();

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            let (stem, is_up) = if let Some(stem) = file_name.strip_suffix(".up.sql") {
                (stem, true)
            } else if let Some(stem) = file_name.strip_suffix(".down.sql") {
                (stem, false)
            } else {
                continue;
            };

            let (number, name) = stem.split_once('_').unwrap_or((stem, stem));
            let number: u64 = number.parse().map_err(|_| {
                StoreError::config(format!(
                    "migration file '{}' must start with a numeric prefix",
                    file_name
                ))
            })?;

            let sql = std::fs::read_to_string(&path)?;
            let slot = found
                .entry(number)
                .or_insert_with(|| (name.to_string(), None, None));
            if is_up {
                slot.1 = Some(sql);
            } else {
                slot.2 = Some(sql);
            }
        }

        found
            .into_iter()
            .map(|(number, (name, up, down))| match up {
                Some(up) => Ok(SqlMigration::new(name, up, down.unwrap_or_default())),
                None => Err(StoreError::config(format!(
                    "migration {} ({}) in '{}' has no up file",
                    number,
                    name,
                    dir.display()
                ))),
            })
            .collect()
    }
}

impl Migration for SqlMigration {
    fn name(&self) -> &str {
        &self.name
    }

    fn up(&self, conn: &DatabaseConn) -> Result<()> {
        conn.execute_batch(&self.up)
    }

    fn down(&self, conn: &DatabaseConn) -> Result<()> {
        if self.down.trim().is_empty() {
            return Ok(());
        }
        conn.execute_batch(&self.down)
    }
}

/// What a migration run did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Fresh store brought to `version`
    Created { version: u32 },
    Upgraded { from: u32, to: u32 },
    Downgraded { from: u32, to: u32 },
    /// Already at `version`
    NoOp { version: u32 },
}

/// Ordered migration steps plus the version they should bring a store to
pub struct MigrationEngine {
    steps: Vec<Box<dyn Migration>>,
    target: u32,
}

impl MigrationEngine {
    /// Create an engine targeting the last step
    ///
    /// At least one step is required.
    pub fn new(steps: Vec<Box<dyn Migration>>) -> Result<Self> {
        if steps.is_empty() {
            return Err(StoreError::config("at least one migration is required"));
        }
        let target = u32::try_from(steps.len())
            .map_err(|_| StoreError::config("too many migrations"))?;
        Ok(Self { steps, target })
    }

    /// Lower the target version, e.g. to downgrade a store
    pub fn with_target(mut self, target: u32) -> Result<Self> {
        if target as usize > self.steps.len() {
            return Err(StoreError::config(format!(
                "target version {} exceeds the {} supplied migrations",
                target,
                self.steps.len()
            )));
        }
        self.target = target;
        Ok(self)
    }

    pub fn target(&self) -> u32 {
        self.target
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Bring the store behind `db` to the target version
    pub fn migrate(&self, db: &DatabaseConn) -> Result<MigrationOutcome> {
        let schema = SchemaManager::new(db);
        let diagnostics = db.diagnostics();

        match schema.check_status(self.target, self.steps.len())? {
            SchemaStatus::Current { version } => Ok(MigrationOutcome::NoOp { version }),
            SchemaStatus::NotInitialized => {
                diagnostics.message("Creating database");
                for index in 0..self.target as usize {
                    self.apply(db, index, MigrationDirection::Up)?;
                }
                Ok(MigrationOutcome::Created {
                    version: self.target,
                })
            }
            SchemaStatus::NeedsUpgrade { from, to } => {
                diagnostics.message(&format!(
                    "Upgrading database schema from version {} to {}",
                    from, to
                ));
                for index in from as usize..to as usize {
                    self.apply(db, index, MigrationDirection::Up)?;
                }
                Ok(MigrationOutcome::Upgraded { from, to })
            }
            SchemaStatus::NeedsDowngrade { from, to } => {
                diagnostics.message(&format!(
                    "Downgrading database schema from version {} to {}",
                    from, to
                ));
                for index in (to as usize..from as usize).rev() {
                    self.apply(db, index, MigrationDirection::Down)?;
                }
                Ok(MigrationOutcome::Downgraded { from, to })
            }
            SchemaStatus::Incompatible {
                database_version,
                available,
            } => Err(StoreError::UnknownVersion {
                persisted: database_version,
                available,
            }),
        }
    }

    /// Run one step and record the resulting version in the same transaction
    fn apply(&self, db: &DatabaseConn, index: usize, direction: MigrationDirection) -> Result<()> {
        let step = &self.steps[index];
        let (from, to) = match direction {
            MigrationDirection::Up => (index, index + 1),
            MigrationDirection::Down => (index + 1, index),
        };

        info!("Migrating {} step {} ({})", direction, index, step.name());
        db.diagnostics().message(&format!(
            "{} database schema from version {} to {}",
            match direction {
                MigrationDirection::Up => "Upgrading",
                MigrationDirection::Down => "Downgrading",
            },
            from,
            to
        ));

        let wrap = |source: StoreError| StoreError::Migration {
            step: index,
            name: step.name().to_string(),
            direction,
            source: Box::new(source),
        };

        let tx = db.transaction().map_err(wrap)?;
        let applied = match direction {
            MigrationDirection::Up => step.up(db),
            MigrationDirection::Down => step.down(db),
        };
        applied.map_err(wrap)?;
        SchemaManager::new(db).set_version(to as u32).map_err(wrap)?;
        tx.commit().map_err(|e| wrap(e.into()))?;

        Ok(())
    }
}

impl std::fmt::Debug for MigrationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationEngine")
            .field(
                "steps",
                &self.steps.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field("target", &self.target)
            .finish()
    }
}
