use anyhow::{anyhow, Result};
use clap::Args;
use rowkeeper::{
    OutputFormat, Reconciliation, RowkeeperConfig, SaveOutcome, StatementOutcome, Transaction,
    TransactionReport, Upsert,
};
use std::path::PathBuf;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use super::{open_database, read_records};

/// Table and input shared by the Sync and Save commands
#[derive(Args)]
pub struct RecordArgs {
    /// Table to write to
    #[clap(long)]
    pub table: String,

    /// Primary key column
    #[clap(long, default_value = "id")]
    pub key: String,

    /// JSON file with the record(s)
    #[clap(long, value_name = "FILE")]
    pub file: PathBuf,

    /// The primary key is assigned by SQLite
    #[clap(long)]
    pub auto_key: bool,
}

/// Make the table hold exactly the records in the file
pub fn run_sync(config: &RowkeeperConfig, args: RecordArgs, output_format: OutputFormat) -> Result<()> {
    let records = read_records(&args.file)?;
    let db = open_database(config, None)?;

    let transaction = Transaction::new(format!("sync {}", args.table))?.add(Reconciliation::new(
        args.table.as_str(),
        args.key.as_str(),
        records,
        args.auto_key,
    ));
    let report = db.execute(&transaction)?;
    print_report(&report, output_format);
    Ok(())
}

/// Insert or update every record in the file
pub fn run_save(config: &RowkeeperConfig, args: RecordArgs, output_format: OutputFormat) -> Result<()> {
    let records = read_records(&args.file)?;
    if records.is_empty() {
        return Err(anyhow!("{} holds no records", args.file.display()));
    }
    let db = open_database(config, None)?;

    let mut transaction = Transaction::new(format!("save {}", args.table))?;
    for record in records {
        transaction.push(Upsert::new(
            args.table.as_str(),
            args.key.as_str(),
            record,
            args.auto_key,
        ));
    }
    let report = db.execute(&transaction)?;
    print_report(&report, output_format);
    Ok(())
}

#[derive(Tabled)]
struct ActionRow {
    action: &'static str,
    key: String,
}

fn print_report(report: &TransactionReport, output_format: OutputFormat) {
    if output_format.is_json() {
        println!("{}", output_format.to_json(report));
        return;
    }

    let mut rows = Vec::new();
    for outcome in &report.outcomes {
        match outcome {
            StatementOutcome::Saved(SaveOutcome::Inserted(key)) => rows.push(ActionRow {
                action: "inserted",
                key: key.to_string(),
            }),
            StatementOutcome::Saved(SaveOutcome::Updated(key)) => rows.push(ActionRow {
                action: "updated",
                key: key.to_string(),
            }),
            StatementOutcome::Reconciled(sync) => {
                for key in &sync.deleted {
                    rows.push(ActionRow {
                        action: "deleted",
                        key: key.to_string(),
                    });
                }
                println!(
                    "{}: {} deleted, {} inserted, {} updated",
                    sync.table,
                    sync.deleted.len(),
                    sync.inserted,
                    sync.updated
                );
            }
            StatementOutcome::Raw { rows_affected } => rows.push(ActionRow {
                action: "raw",
                key: format!("{} rows", rows_affected),
            }),
        }
    }

    if !rows.is_empty() {
        println!("{}", Table::new(rows).with(Style::rounded()));
    }
}
