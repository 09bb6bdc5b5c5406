pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod exporter;
pub mod loader;
pub mod notify;
pub mod reconciler;
pub mod resolver;
pub mod schema;
pub mod store;

pub use config::{load_config, load_env_file, EnmasseConfig, ReloadConfig, SyncPolicy};
pub use db::Database;
pub use document::{Document, FieldValue, Fields, Record};
pub use error::{ConfigError, DocumentError, EnmasseError, RecordError, ResolveError, Result};
pub use exporter::{export, Exporter};
pub use loader::{load, LoadOptions, LoadedDocument};
pub use notify::{notifier_from_config, HttpReloadNotifier, NoopNotifier, NotifyError, ReloadNotifier};
pub use reconciler::{CancelFlag, Outcome, Reconciler, SyncReport};
pub use schema::{HandlerRegistry, ObjectHandler, ObjectType};
pub use store::{PersistedObject, SqliteStore, Store, StoreError};
