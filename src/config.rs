use anyhow::{anyhow, Result};
use config::Config;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::database::{
    ConnectionSettings, DatabaseConn, DatabaseLocation, Diagnostics, JOURNAL_MODES,
};

pub struct RowkeeperConfig {
    /// Directory holding the store file
    pub data_dir: String,

    /// Store file name inside `data_dir`
    pub database_file: String,

    /// SQLite journal mode applied on every open
    pub journal_mode: String,

    /// Enforce foreign-key constraints
    pub foreign_keys: bool,

    /// Busy timeout in milliseconds
    pub busy_timeout_ms: u64,

    /// Directory of `NNN_name.up.sql` / `NNN_name.down.sql` migration files
    pub migrations_dir: Option<String>,
}

const EMPTY_CONFIG: &str = r#"### rowkeeper configuration file

### directory holding the database file
# data_dir = "~/.rowkeeper"

### database file name inside data_dir
# database_file = "rowkeeper.sqlite3"

### connection settings applied on every open
# journal_mode = "WAL"
# foreign_keys = true
# busy_timeout_ms = 5000

### directory with NNN_name.up.sql / NNN_name.down.sql migration files
# migrations_dir = "~/.rowkeeper/migrations"
"#;

const DEFAULT_DATABASE_FILE: &str = "rowkeeper.sqlite3";

impl Default for RowkeeperConfig {
    fn default() -> Self {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| ".".to_string());

        Self {
            data_dir: format!("{}/.rowkeeper", home_dir),
            database_file: DEFAULT_DATABASE_FILE.to_string(),
            journal_mode: "WAL".to_string(),
            foreign_keys: true,
            busy_timeout_ms: 5000,
            migrations_dir: None,
        }
    }
}

impl RowkeeperConfig {
    /// Load the configuration file (creating it when missing), then the environment
    ///
    /// Environment variables use the `ROWKEEPER_` prefix, e.g.
    /// `ROWKEEPER_DATA_DIR=/var/lib/app rowkeeper status`.
    pub fn new(path: &Option<String>) -> Result<RowkeeperConfig> {
        let mut builder = Config::builder();

        match path {
            Some(p) => {
                let path = Path::new(p.as_str());
                if path.exists() {
                    builder = builder.add_source(config::File::from(path));
                } else {
                    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                        std::fs::create_dir_all(parent)
                            .map_err(|e| anyhow!("Unable to create config directory: {}", e))?;
                    }
                    std::fs::write(path, EMPTY_CONFIG)
                        .map_err(|e| anyhow!("Unable to create config file: {}", e))?;
                }
            }
            None => {
                let home =
                    dirs::home_dir().ok_or_else(|| anyhow!("Could not find home directory"))?;
                let rowkeeper_dir = home.join(".rowkeeper");
                std::fs::create_dir_all(&rowkeeper_dir)
                    .map_err(|e| anyhow!("Unable to create rowkeeper directory: {}", e))?;
                let p = rowkeeper_dir.join("rowkeeper.toml");
                if p.exists() {
                    builder = builder.add_source(config::File::from(p.as_path()));
                } else {
                    std::fs::write(&p, EMPTY_CONFIG).map_err(|e| {
                        anyhow!("Unable to create config file {}: {}", p.display(), e)
                    })?;
                }
            }
        }

        builder = builder.add_source(config::Environment::with_prefix("ROWKEEPER"));

        let settings = builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;

        let values = settings
            .try_deserialize::<HashMap<String, String>>()
            .map_err(|e| anyhow!("Failed to deserialize configuration: {}", e))?;

        Self::from_values(&values)
    }

    /// Build from flat key/value pairs, filling in defaults
    fn from_values(values: &HashMap<String, String>) -> Result<RowkeeperConfig> {
        let defaults = RowkeeperConfig::default();

        let data_dir = values
            .get("data_dir")
            .map(|d| expand_home(d))
            .unwrap_or(defaults.data_dir);

        let database_file = values
            .get("database_file")
            .cloned()
            .unwrap_or(defaults.database_file);
        if database_file.trim().is_empty() {
            return Err(anyhow!("database_file must not be empty"));
        }

        let journal_mode = values
            .get("journal_mode")
            .map(|m| m.to_uppercase())
            .unwrap_or(defaults.journal_mode);
        if !JOURNAL_MODES.contains(&journal_mode.as_str()) {
            return Err(anyhow!(
                "journal_mode must be one of {}, got '{}'",
                JOURNAL_MODES.join(", "),
                journal_mode
            ));
        }

        let foreign_keys = match values.get("foreign_keys") {
            Some(v) => parse_bool(v)
                .ok_or_else(|| anyhow!("foreign_keys must be true or false, got '{}'", v))?,
            None => defaults.foreign_keys,
        };

        let busy_timeout_ms = match values.get("busy_timeout_ms") {
            Some(v) => v
                .parse()
                .map_err(|_| anyhow!("busy_timeout_ms must be a number, got '{}'", v))?,
            None => defaults.busy_timeout_ms,
        };

        let migrations_dir = values.get("migrations_dir").map(|d| expand_home(d));

        Ok(RowkeeperConfig {
            data_dir,
            database_file,
            journal_mode,
            foreign_keys,
            busy_timeout_ms,
            migrations_dir,
        })
    }

    /// Get the path to the SQLite database file
    pub fn sqlite_path(&self) -> String {
        let data_dir = self.data_dir.trim_end_matches('/');
        format!("{}/{}", data_dir, self.database_file)
    }

    pub fn location(&self) -> DatabaseLocation {
        DatabaseLocation::file(self.sqlite_path())
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            journal_mode: self.journal_mode.clone(),
            foreign_keys: self.foreign_keys,
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
        }
    }

    pub fn migrations_path(&self) -> Option<PathBuf> {
        self.migrations_dir.as_ref().map(PathBuf::from)
    }

    /// Display configuration summary
    pub fn summary(&self) -> String {
        [
            format!("Data Directory:     {}", self.data_dir),
            format!("SQLite Path:        {}", self.sqlite_path()),
            format!("Journal Mode:       {}", self.journal_mode),
            format!("Foreign Keys:       {}", self.foreign_keys),
            format!("Busy Timeout:       {} ms", self.busy_timeout_ms),
            format!(
                "Migrations:         {}",
                self.migrations_dir.as_deref().unwrap_or("(not configured)")
            ),
        ]
        .join("\n")
    }

    /// Get the config file path
    pub fn config_file_path() -> String {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| "~".to_string());
        format!("{}/.rowkeeper/rowkeeper.toml", home_dir)
    }
}

fn expand_home(path: &str) -> String {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest).to_string_lossy().to_string(),
        _ => path.to_string(),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

// =============================================================================
// Store info (used by the status command)
// =============================================================================

/// Row count of one table
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "display", derive(tabled::Tabled))]
pub struct TableInfo {
    pub name: String,
    pub rows: u64,
}

/// Information about the SQLite store
#[derive(Debug, Serialize, Clone)]
pub struct StoreInfo {
    pub path: String,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,
    pub tables: Vec<TableInfo>,
}

/// Inspect the store without migrating it
pub fn get_store_info(config: &RowkeeperConfig) -> StoreInfo {
    use crate::database::SchemaManager;

    let path = config.sqlite_path();
    let metadata = std::fs::metadata(&path).ok();
    let exists = metadata.is_some();
    let size_bytes = metadata.as_ref().map(|m| m.len());
    let last_modified = metadata.and_then(|m| m.modified().ok()).map(|t| {
        let datetime: chrono::DateTime<chrono::Utc> = t.into();
        datetime.format("%Y-%m-%d %H:%M:%S UTC").to_string()
    });

    let (schema_version, tables) = if exists {
        match DatabaseConn::open(
            &config.location(),
            &config.connection_settings(),
            Diagnostics::new(),
        ) {
            Ok(db) => {
                let version = SchemaManager::new(&db).version().ok();
                let tables = db
                    .table_names()
                    .unwrap_or_default()
                    .into_iter()
                    .map(|name| TableInfo {
                        rows: db.table_count(&name).unwrap_or(0),
                        name,
                    })
                    .collect();
                if let Err(e) = db.close() {
                    tracing::warn!("Failed to close {}: {}", path, e);
                }
                (version, tables)
            }
            Err(_) => (None, Vec::new()),
        }
    } else {
        (None, Vec::new())
    };

    StoreInfo {
        path,
        exists,
        size_bytes,
        last_modified,
        schema_version,
        tables,
    }
}

/// Format bytes as human-readable size
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(data_dir: &str) -> RowkeeperConfig {
        RowkeeperConfig {
            data_dir: data_dir.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = RowkeeperConfig::default();
        assert_eq!(config.database_file, "rowkeeper.sqlite3");
        assert_eq!(config.journal_mode, "WAL");
        assert!(config.foreign_keys);
        assert_eq!(config.busy_timeout_ms, 5000);
        assert!(config.migrations_dir.is_none());
    }

    #[test]
    fn test_paths_and_settings() {
        let config = test_config("/test/dir/");
        assert_eq!(config.sqlite_path(), "/test/dir/rowkeeper.sqlite3");

        let settings = config.connection_settings();
        assert_eq!(settings.journal_mode, "WAL");
        assert_eq!(settings.busy_timeout, Duration::from_millis(5000));
    }

    #[test]
    fn test_from_values() {
        let values: HashMap<String, String> = [
            ("data_dir", "/srv/data"),
            ("journal_mode", "delete"),
            ("foreign_keys", "false"),
            ("busy_timeout_ms", "250"),
            ("migrations_dir", "/srv/migrations"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = RowkeeperConfig::from_values(&values).unwrap();
        assert_eq!(config.data_dir, "/srv/data");
        assert_eq!(config.journal_mode, "DELETE");
        assert!(!config.foreign_keys);
        assert_eq!(config.busy_timeout_ms, 250);
        assert_eq!(
            config.migrations_path(),
            Some(PathBuf::from("/srv/migrations"))
        );
    }

    #[test]
    fn test_from_values_rejects_bad_numbers() {
        let values: HashMap<String, String> =
            [("busy_timeout_ms".to_string(), "soon".to_string())]
                .into_iter()
                .collect();
        assert!(RowkeeperConfig::from_values(&values).is_err());

        let values: HashMap<String, String> =
            [("foreign_keys".to_string(), "maybe".to_string())]
                .into_iter()
                .collect();
        assert!(RowkeeperConfig::from_values(&values).is_err());

        let values: HashMap<String, String> =
            [("journal_mode".to_string(), "wal; PRAGMA foreign_keys=0".to_string())]
                .into_iter()
                .collect();
        assert!(RowkeeperConfig::from_values(&values).is_err());
    }

    #[test]
    fn test_new_creates_missing_file_then_reads_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("rowkeeper.toml");
        let path_str = Some(path.to_string_lossy().to_string());

        RowkeeperConfig::new(&path_str).unwrap();
        assert!(path.exists());

        std::fs::write(&path, "database_file = \"custom.db\"\nbusy_timeout_ms = 42\n").unwrap();
        let config = RowkeeperConfig::new(&path_str).unwrap();
        assert_eq!(config.database_file, "custom.db");
        assert_eq!(config.busy_timeout_ms, 42);
    }

    #[test]
    fn test_store_info() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir.path().to_string_lossy());

        let missing = get_store_info(&config);
        assert!(!missing.exists);
        assert!(missing.tables.is_empty());

        let db = DatabaseConn::open(
            &config.location(),
            &config.connection_settings(),
            Diagnostics::new(),
        )
        .unwrap();
        db.execute_batch(
            "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT);
             INSERT INTO notes (body) VALUES ('a'), ('b');
             PRAGMA user_version = 3;",
        )
        .unwrap();
        db.close().unwrap();

        let info = get_store_info(&config);
        assert!(info.exists);
        assert!(info.size_bytes.is_some());
        assert!(info.last_modified.is_some());
        assert_eq!(info.schema_version, Some(3));
        assert_eq!(
            info.tables,
            vec![TableInfo {
                name: "notes".to_string(),
                rows: 2
            }]
        );
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(500), "500 B");
        assert_eq!(format_size(1024), "1.00 KB");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(1048576), "1.00 MB");
        assert_eq!(format_size(1073741824), "1.00 GB");
    }
}
