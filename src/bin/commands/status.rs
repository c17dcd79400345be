use rowkeeper::{format_size, get_store_info, OutputFormat, RowkeeperConfig, StoreInfo};
use serde::Serialize;
use tabled::settings::Style;
use tabled::Table;

#[derive(Debug, Serialize)]
struct Status {
    config_file: String,
    store: StoreInfo,
}

pub fn run(config: &RowkeeperConfig, config_path: &Option<String>, output_format: OutputFormat) {
    let status = Status {
        config_file: config_path
            .clone()
            .unwrap_or_else(RowkeeperConfig::config_file_path),
        store: get_store_info(config),
    };

    if output_format.is_json() {
        println!("{}", output_format.to_json(&status));
        return;
    }

    println!("Configuration:");
    println!("  Config File:        {}", status.config_file);
    for line in config.summary().lines() {
        println!("  {}", line);
    }
    println!();

    let store = &status.store;
    println!("Store:");
    if !store.exists {
        println!("  {} does not exist yet", store.path);
        return;
    }
    if let Some(size) = store.size_bytes {
        println!("  Size:               {}", format_size(size));
    }
    if let Some(modified) = &store.last_modified {
        println!("  Last Modified:      {}", modified);
    }
    match store.schema_version {
        Some(0) => println!("  Schema Version:     not initialized"),
        Some(v) => println!("  Schema Version:     {}", v),
        None => println!("  Schema Version:     unreadable"),
    }

    if store.tables.is_empty() {
        return;
    }
    println!();
    println!("{}", Table::new(&store.tables).with(Style::rounded()));
}
