use anyhow::Result;
use rowkeeper::{drop_table_sql, truncate_table_sql, OutputFormat, RowkeeperConfig};
use serde_json::json;

use super::open_database;

pub fn run_vacuum(config: &RowkeeperConfig, output_format: OutputFormat) -> Result<()> {
    let db = open_database(config, None)?;
    let before = std::fs::metadata(config.sqlite_path()).map(|m| m.len()).ok();
    db.vacuum()?;
    let after = std::fs::metadata(config.sqlite_path()).map(|m| m.len()).ok();

    if output_format.is_json() {
        println!(
            "{}",
            output_format.to_json(&json!({"vacuumed": config.sqlite_path(), "size_before": before, "size_after": after}))
        );
    } else {
        println!("Vacuumed {}", config.sqlite_path());
        if let (Some(before), Some(after)) = (before, after) {
            println!(
                "  {} -> {}",
                rowkeeper::format_size(before),
                rowkeeper::format_size(after)
            );
        }
    }
    Ok(())
}

pub fn run_drop(config: &RowkeeperConfig, table: &str, output_format: OutputFormat) -> Result<()> {
    let db = open_database(config, None)?;
    db.run_batch(&drop_table_sql(table))?;
    report(output_format, "dropped", table);
    Ok(())
}

pub fn run_truncate(config: &RowkeeperConfig, table: &str, output_format: OutputFormat) -> Result<()> {
    let db = open_database(config, None)?;
    db.run_batch(&truncate_table_sql(table))?;
    report(output_format, "truncated", table);
    Ok(())
}

fn report(output_format: OutputFormat, action: &str, table: &str) {
    if output_format.is_json() {
        println!(
            "{}",
            output_format.to_json(&json!({"action": action, "table": table}))
        );
    } else {
        println!("{} {}", action, table);
    }
}
