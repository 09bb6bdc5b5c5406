use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::schema::ObjectType;

#[derive(Error, Debug)]
pub enum EnmasseError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    #[error("Dependency error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Sync cancelled before commit; uncommitted changes were rolled back")]
    Cancelled,

    #[error("Another sync is already running on this reconciler")]
    SyncInProgress,
}

/// Errors raised while reading, parsing or rendering documents. All of them
/// are structural and abort a run before any store mutation.
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Failed to read document '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write document '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML in '{path}': {message}")]
    ParseYaml { path: PathBuf, message: String },

    #[error("Failed to serialize YAML: {0}")]
    SerializeYaml(String),

    #[error("Invalid document structure in '{path}': {message}")]
    InvalidStructure { path: PathBuf, message: String },

    #[error("Unknown object type '{key}' in '{path}'")]
    UnknownType { path: PathBuf, key: String },

    #[error("Object type '{object_type}' in '{path}' is registered by the server and cannot be declared")]
    ExternalType {
        path: PathBuf,
        object_type: ObjectType,
    },

    #[error("Circular include: {}", format_chain(.chain))]
    CircularInclude { chain: Vec<PathBuf> },

    #[error("Include '{path}' (from '{included_from}') not found")]
    IncludeNotFound { path: PathBuf, included_from: PathBuf },
}

fn format_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

impl DocumentError {
    /// Attaches the source path to errors raised by the serializer, which
    /// only sees bytes.
    pub fn at(self, source: &Path) -> Self {
        match self {
            DocumentError::ParseYaml { message, .. } => DocumentError::ParseYaml {
                path: source.to_path_buf(),
                message,
            },
            DocumentError::InvalidStructure { message, .. } => DocumentError::InvalidStructure {
                path: source.to_path_buf(),
                message,
            },
            DocumentError::UnknownType { key, .. } => DocumentError::UnknownType {
                path: source.to_path_buf(),
                key,
            },
            DocumentError::ExternalType { object_type, .. } => DocumentError::ExternalType {
                path: source.to_path_buf(),
                object_type,
            },
            other => other,
        }
    }
}

impl From<serde_yaml::Error> for DocumentError {
    fn from(err: serde_yaml::Error) -> Self {
        DocumentError::ParseYaml {
            path: PathBuf::new(),
            message: err.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Dependency cycle between object types: {}", format_types(.types))]
    DependencyCycle { types: Vec<ObjectType> },
}

fn format_types(types: &[ObjectType]) -> String {
    types
        .iter()
        .map(|t| t.key())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Per-record failures. These are collected into the sync report; the
/// offending record is skipped and its siblings proceed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("{object_type} '{name}': {message}")]
    Validation {
        object_type: ObjectType,
        name: String,
        message: String,
    },

    #[error("{object_type} '{name}': unresolved reference to {target_type} '{target_name}'")]
    UnresolvedReference {
        object_type: ObjectType,
        name: String,
        target_type: ObjectType,
        target_name: String,
    },
}

impl RecordError {
    /// A stable name for the error kind, used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            RecordError::Validation { .. } => "ValidationError",
            RecordError::UnresolvedReference { .. } => "UnresolvedReferenceError",
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML in '{path}': {message}")]
    ParseYaml { path: PathBuf, message: String },

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

pub type Result<T> = std::result::Result<T, EnmasseError>;
