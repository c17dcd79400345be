#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use clap::{Parser, Subcommand};
use rowkeeper::*;
use tracing::Level;

mod commands;

use commands::migrate::MigrateArgs;
use commands::sync::RecordArgs;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// configuration file path, by default $HOME/.rowkeeper/rowkeeper.toml is used
    #[clap(short, long)]
    config: Option<String>,

    /// Print debug information
    #[clap(long, global = true)]
    debug: bool,

    /// Output format: table (default), json, json-pretty
    #[clap(long, short = 'f', global = true, default_value = "table")]
    format: OutputFormat,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show configuration, store file and per-table row counts
    Status,

    /// Bring the store to the latest (or a given) schema version
    Migrate(MigrateArgs),

    /// Make a table hold exactly the records of a JSON array file
    Sync(RecordArgs),

    /// Insert or update the record(s) of a JSON file
    Save(RecordArgs),

    /// Compact the store file
    Vacuum,

    /// Drop a table if it exists
    Drop {
        #[clap(value_name = "TABLE")]
        table: String,
    },

    /// Delete every row of a table and compact the store
    Truncate {
        #[clap(value_name = "TABLE")]
        table: String,
    },
}

fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if cli.debug {
        tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .init();
    }

    let config = match RowkeeperConfig::new(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let format = cli.format;
    let result = match cli.command {
        Commands::Status => {
            commands::status::run(&config, &cli.config, format);
            Ok(())
        }
        Commands::Migrate(args) => commands::migrate::run(&config, args, format),
        Commands::Sync(args) => commands::sync::run_sync(&config, args, format),
        Commands::Save(args) => commands::sync::run_save(&config, args, format),
        Commands::Vacuum => commands::maintenance::run_vacuum(&config, format),
        Commands::Drop { table } => commands::maintenance::run_drop(&config, &table, format),
        Commands::Truncate { table } => {
            commands::maintenance::run_truncate(&config, &table, format)
        }
    };

    if let Err(e) = result {
        eprintln!("ERROR: {:#}", e);
        std::process::exit(1);
    }
}
