//! Store adapter: the persisted object catalog the reconciler writes to.
//!
//! The [`Store`] trait is the only way the reconciler and exporter touch
//! persisted state. [`SqliteStore`] is the bundled implementation.

pub mod sqlite;

use thiserror::Error;

use crate::db::DatabaseError;
use crate::document::Fields;
use crate::schema::ObjectType;

pub use sqlite::SqliteStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Database(DatabaseError),

    /// Concurrent modification or a unique-key clash.
    #[error("Store conflict: {0}")]
    Conflict(String),

    #[error("{object_type} with id {id} not found")]
    NotFound { object_type: ObjectType, id: i64 },

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Stored fields of {object_type} '{name}' are unreadable: {message}")]
    Corrupt {
        object_type: ObjectType,
        name: String,
        message: String,
    },
}

impl From<DatabaseError> for StoreError {
    fn from(err: DatabaseError) -> Self {
        if err.is_busy() {
            StoreError::Conflict(err.to_string())
        } else {
            StoreError::Database(err)
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::from(DatabaseError::from(err))
    }
}

/// One currently existing object in the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedObject {
    /// Store-assigned identifier. Not portable across environments.
    pub id: i64,
    pub object_type: ObjectType,
    pub name: String,
    pub cluster_id: i64,
    pub fields: Fields,
}

/// Payload for creating an object.
#[derive(Debug, Clone)]
pub struct NewObject {
    pub name: String,
    pub fields: Fields,
}

/// Access to the persisted object catalog of one cluster.
///
/// Implementations must be shareable across the reconciler's wait workers,
/// which only call [`Store::exists`].
pub trait Store: Send + Sync {
    /// Lists all objects of a type.
    fn list(&self, object_type: ObjectType) -> Result<Vec<PersistedObject>, StoreError>;

    /// Checks whether an object of the given type and name exists.
    fn exists(&self, object_type: ObjectType, name: &str) -> Result<bool, StoreError> {
        Ok(self.list(object_type)?.iter().any(|o| o.name == name))
    }

    fn create(
        &self,
        object_type: ObjectType,
        object: &NewObject,
    ) -> Result<PersistedObject, StoreError>;

    /// Replaces the fields of an existing object.
    fn update(
        &self,
        object_type: ObjectType,
        id: i64,
        fields: &Fields,
    ) -> Result<PersistedObject, StoreError>;

    fn delete(&self, object_type: ObjectType, id: i64) -> Result<(), StoreError>;

    /// Opens a transaction scope. Writes until [`Store::commit`] are not
    /// visible to other readers and are discarded by [`Store::rollback`].
    fn begin(&self) -> Result<(), StoreError>;

    fn commit(&self) -> Result<(), StoreError>;

    /// Discards the open transaction. A no-op when none is open.
    fn rollback(&self) -> Result<(), StoreError>;
}
