pub mod maintenance;
pub mod migrate;
pub mod status;
pub mod sync;

use anyhow::{anyhow, Result};
use rowkeeper::database::Migration;
use rowkeeper::{Database, Diagnostics, Record, RowkeeperConfig, SqlMigration};
use std::path::Path;

/// Build a database context from the configured location and migrations
///
/// `target` lowers the schema version the store is migrated to on open.
pub(crate) fn open_database(config: &RowkeeperConfig, target: Option<u32>) -> Result<Database> {
    let dir = config.migrations_path().ok_or_else(|| {
        anyhow!(
            "no migrations_dir configured; set it in {} or ROWKEEPER_MIGRATIONS_DIR",
            RowkeeperConfig::config_file_path()
        )
    })?;

    let steps = SqlMigration::load_dir(&dir)
        .map_err(|e| anyhow!("Failed to load migrations from {}: {}", dir.display(), e))?;
    let steps: Vec<Box<dyn Migration>> = steps
        .into_iter()
        .map(|step| Box::new(step) as Box<dyn Migration>)
        .collect();

    let mut builder = Database::builder(config.location())
        .settings(config.connection_settings())
        .diagnostics(Diagnostics::new())
        .migrations(steps);
    if let Some(target) = target {
        builder = builder.target_version(target);
    }

    builder
        .build()
        .map_err(|e| anyhow!("Failed to set up database: {}", e))
}

/// Read a JSON file holding one object or an array of objects
pub(crate) fn read_records(path: &Path) -> Result<Vec<Record>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("Unable to read {}: {}", path.display(), e))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| anyhow!("Invalid JSON in {}: {}", path.display(), e))?;

    match value {
        serde_json::Value::Object(object) => Ok(vec![Record::from_json(&object)]),
        serde_json::Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                item.as_object()
                    .map(Record::from_json)
                    .ok_or_else(|| anyhow!("entry {} in {} is not an object", i, path.display()))
            })
            .collect(),
        _ => Err(anyhow!(
            "{} must hold a JSON object or an array of objects",
            path.display()
        )),
    }
}
