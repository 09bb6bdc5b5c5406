//! Run configuration.
//!
//! Loaded from an optional YAML file; every field has a default so an empty
//! file (or none at all) is a valid configuration. The value is passed
//! explicitly to the loader, reconciler and exporter.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::document::ParseOptions;
use crate::error::ConfigError;
use crate::schema::ObjectType;

/// Environment variable that can switch the reload notification off.
pub const NEEDS_RELOAD_ENV: &str = "ENMASSE_NEEDS_CONFIG_RELOAD";

/// Whether a sync may delete store objects missing from the document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPolicy {
    /// Objects absent from the document are left alone.
    #[default]
    AdditiveOnly,
    /// The document is exhaustive; absent objects are deleted.
    FullyManaged,
}

/// Settings of the post-import reload call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Endpoint of the running server. Without it no call is made.
    #[serde(default)]
    pub url: Option<String>,
    /// Seconds to keep retrying while the server is not yet reachable.
    #[serde(default = "default_initial_wait_time")]
    pub initial_wait_time: u64,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: None,
            initial_wait_time: default_initial_wait_time(),
        }
    }
}

impl ReloadConfig {
    /// Whether a reload should be requested, taking the environment
    /// override into account.
    pub fn is_requested(&self) -> bool {
        self.enabled && reload_override_from_env().unwrap_or(true)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnmasseConfig {
    /// Cluster whose objects are managed.
    #[serde(default = "default_cluster_id")]
    pub cluster_id: i64,

    /// SQLite database holding the object catalog.
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Skip missing include files instead of failing the load.
    #[serde(default)]
    pub ignore_missing_includes: bool,

    /// Reject unknown object types instead of skipping them.
    #[serde(default = "default_true")]
    pub strict_types: bool,

    /// Seconds to wait for a missing referenced object to appear.
    #[serde(default = "default_missing_wait_time")]
    pub missing_wait_time: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Threads polling for missing references.
    #[serde(default = "default_wait_workers")]
    pub wait_workers: usize,

    /// Commit each object type separately instead of once per run.
    #[serde(default)]
    pub per_type_atomicity: bool,

    /// Sync policy per object type. Unlisted types are additive-only.
    #[serde(default)]
    pub policies: BTreeMap<ObjectType, SyncPolicy>,

    #[serde(default)]
    pub reload: ReloadConfig,
}

fn default_true() -> bool {
    true
}

fn default_cluster_id() -> i64 {
    1
}

fn default_database() -> PathBuf {
    crate::db::default_database_path().unwrap_or_else(|| PathBuf::from("enmasse.db"))
}

fn default_missing_wait_time() -> u64 {
    180
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_wait_workers() -> usize {
    num_cpus::get().max(1)
}

fn default_initial_wait_time() -> u64 {
    10
}

impl Default for EnmasseConfig {
    fn default() -> Self {
        Self {
            cluster_id: default_cluster_id(),
            database: default_database(),
            ignore_missing_includes: false,
            strict_types: true,
            missing_wait_time: default_missing_wait_time(),
            poll_interval_ms: default_poll_interval_ms(),
            wait_workers: default_wait_workers(),
            per_type_atomicity: false,
            policies: BTreeMap::new(),
            reload: ReloadConfig::default(),
        }
    }
}

impl EnmasseConfig {
    pub fn policy_for(&self, object_type: ObjectType) -> SyncPolicy {
        self.policies.get(&object_type).copied().unwrap_or_default()
    }

    pub fn missing_wait(&self) -> Duration {
        Duration::from_secs(self.missing_wait_time)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            strict_types: self.strict_types,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Validation {
                message: "poll_interval_ms must be greater than zero".to_string(),
            });
        }
        if self.wait_workers == 0 {
            return Err(ConfigError::Validation {
                message: "wait_workers must be greater than zero".to_string(),
            });
        }
        if let Some(external) = self.policies.keys().find(|t| t.is_external()) {
            return Err(ConfigError::Validation {
                message: format!("'{}' is registered by the server and has no sync policy", external),
            });
        }
        Ok(())
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<EnmasseConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content).map_err(|e| match e {
        ConfigError::ParseYaml { message, .. } => ConfigError::ParseYaml {
            path: path.to_path_buf(),
            message,
        },
        other => other,
    })
}

pub fn load_config_from_str(content: &str) -> Result<EnmasseConfig, ConfigError> {
    let config: EnmasseConfig = if content.trim().is_empty() {
        EnmasseConfig::default()
    } else {
        serde_yaml::from_str(content).map_err(|e| ConfigError::ParseYaml {
            path: PathBuf::new(),
            message: e.to_string(),
        })?
    };

    config.validate()?;
    Ok(config)
}

/// Reads the reload override from the environment, if set to a boolean.
pub fn reload_override_from_env() -> Option<bool> {
    let value = std::env::var(NEEDS_RELOAD_ENV).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            log::warn!("Ignoring non-boolean {}={}", NEEDS_RELOAD_ENV, value);
            None
        }
    }
}

/// Loads `KEY=VALUE` lines into the process environment.
///
/// Blank lines, `#`/`;` comments and `[section]` headers are skipped.
/// Surrounding quotes on values are removed. Returns the number of variables
/// set.
pub fn load_env_file(path: &Path) -> Result<usize, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut count = 0;
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') || line.starts_with('[') {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            return Err(ConfigError::Validation {
                message: format!(
                    "{}:{}: expected KEY=VALUE",
                    path.display(),
                    line_no + 1
                ),
            });
        };

        let key = key.trim();
        let value = strip_quotes(value.trim());
        if key.is_empty() {
            return Err(ConfigError::Validation {
                message: format!("{}:{}: empty key", path.display(), line_no + 1),
            });
        }

        std::env::set_var(key, value);
        count += 1;
    }

    log::debug!("Loaded {} variables from {}", count, path.display());
    Ok(count)
}

fn strip_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}
