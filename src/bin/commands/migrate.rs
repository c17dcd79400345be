use anyhow::{anyhow, Result};
use clap::Args;
use rowkeeper::{MigrationOutcome, OutputFormat, RowkeeperConfig};
use serde::Serialize;
use tracing::info;

use super::open_database;

/// Arguments for the Migrate command
#[derive(Args)]
pub struct MigrateArgs {
    /// Schema version to migrate to; defaults to the latest migration.
    /// A version below the current one downgrades the store.
    #[clap(long, short)]
    pub target: Option<u32>,
}

#[derive(Debug, Serialize)]
struct MigrateResult {
    path: String,
    action: &'static str,
    from: u32,
    to: u32,
}

impl From<(String, MigrationOutcome)> for MigrateResult {
    fn from((path, outcome): (String, MigrationOutcome)) -> Self {
        let (action, from, to) = match outcome {
            MigrationOutcome::Created { version } => ("created", 0, version),
            MigrationOutcome::Upgraded { from, to } => ("upgraded", from, to),
            MigrationOutcome::Downgraded { from, to } => ("downgraded", from, to),
            MigrationOutcome::NoOp { version } => ("unchanged", version, version),
        };
        MigrateResult {
            path,
            action,
            from,
            to,
        }
    }
}

pub fn run(config: &RowkeeperConfig, args: MigrateArgs, output_format: OutputFormat) -> Result<()> {
    let db = open_database(config, args.target)?;

    // the first open runs the migrations
    let version = db
        .schema_version()
        .map_err(|e| anyhow!("Migration failed: {}", e))?;
    let outcome = db
        .last_migration()
        .ok_or_else(|| anyhow!("database opened without a migration result"))?;
    info!("store at version {} after {:?}", version, outcome);

    let result = MigrateResult::from((config.sqlite_path(), outcome));
    if output_format.is_json() {
        println!("{}", output_format.to_json(&result));
    } else if result.from == result.to {
        println!("{} is already at schema version {}", result.path, result.to);
    } else {
        println!(
            "{} {} from schema version {} to {}",
            result.path, result.action, result.from, result.to
        );
    }
    Ok(())
}
