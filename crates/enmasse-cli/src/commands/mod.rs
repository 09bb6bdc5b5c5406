pub mod export;
pub mod import;

use enmasse::{load_config, Database, EnmasseConfig, SqliteStore};
use std::path::PathBuf;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_PARAMETER_MISSING: u8 = 2;
pub const EXIT_OBJECT_NOT_FOUND: u8 = 3;
pub const EXIT_PARTIAL: u8 = 4;

/// Global options shared by every subcommand.
#[derive(Debug)]
pub struct Context {
    pub config_path: Option<PathBuf>,
    pub database: Option<PathBuf>,
}

impl Context {
    /// Loads the configuration file, if any, and applies global overrides.
    pub fn config(&self) -> Result<EnmasseConfig, String> {
        let mut config = match &self.config_path {
            Some(path) => load_config(path).map_err(|e| e.to_string())?,
            None => EnmasseConfig::default(),
        };
        if let Some(database) = &self.database {
            config.database = database.clone();
        }
        Ok(config)
    }
}

pub fn open_store(config: &EnmasseConfig) -> Result<SqliteStore, String> {
    let db = Database::open(&config.database).map_err(|e| format!("store error: {e}"))?;
    Ok(SqliteStore::new(db, config.cluster_id))
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}
