//! SQLite implementation of [`Store`] on top of the `objects` table.

use rusqlite::{params, OptionalExtension, Row};

use super::{NewObject, PersistedObject, Store, StoreError};
use crate::db::{Database, DatabaseError};
use crate::document::Fields;
use crate::schema::ObjectType;

/// A raw `objects` row; `fields` is still JSON text.
#[derive(Debug, Clone)]
struct ObjectRow {
    id: i64,
    name: String,
    fields: String,
}

impl ObjectRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            fields: row.get("fields")?,
        })
    }
}

/// Object catalog of one cluster stored in SQLite.
///
/// Clones share the underlying connection, so a clone handed to another
/// thread observes (and takes part in) the same transaction.
#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
    cluster_id: i64,
}

impl SqliteStore {
    pub fn new(db: Database, cluster_id: i64) -> Self {
        Self { db, cluster_id }
    }

    /// Registers a service the way a running server does when it deploys
    /// one. Already registered services are left untouched.
    pub fn register_service(&self, name: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO objects (cluster_id, object_type, name, fields)
                 VALUES (?1, ?2, ?3, '{}')",
                params![self.cluster_id, ObjectType::Service.key(), name],
            )?;
            Ok(())
        })?;
        log::debug!("Registered service '{}'", name);
        Ok(())
    }

    fn decode(&self, object_type: ObjectType, row: ObjectRow) -> Result<PersistedObject, StoreError> {
        let fields: Fields =
            serde_json::from_str(&row.fields).map_err(|e| StoreError::Corrupt {
                object_type,
                name: row.name.clone(),
                message: e.to_string(),
            })?;
        Ok(PersistedObject {
            id: row.id,
            object_type,
            name: row.name,
            cluster_id: self.cluster_id,
            fields,
        })
    }

    fn encode(fields: &Fields) -> Result<String, StoreError> {
        serde_json::to_string(fields).map_err(|e| StoreError::Transaction(e.to_string()))
    }

    fn find_row(&self, object_type: ObjectType, id: i64) -> Result<Option<ObjectRow>, StoreError> {
        Ok(self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, name, fields FROM objects
                     WHERE id = ?1 AND cluster_id = ?2 AND object_type = ?3",
                    params![id, self.cluster_id, object_type.key()],
                    ObjectRow::from_row,
                )
                .optional()?)
        })?)
    }

    fn map_write_error(err: DatabaseError, object_type: ObjectType, name: &str) -> StoreError {
        if err.is_constraint_violation() {
            StoreError::Conflict(format!("{} '{}' already exists", object_type, name))
        } else {
            StoreError::from(err)
        }
    }
}

impl Store for SqliteStore {
    fn list(&self, object_type: ObjectType) -> Result<Vec<PersistedObject>, StoreError> {
        let rows = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, fields FROM objects
                 WHERE cluster_id = ?1 AND object_type = ?2 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![self.cluster_id, object_type.key()], ObjectRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        rows.into_iter()
            .map(|row| self.decode(object_type, row))
            .collect()
    }

    fn exists(&self, object_type: ObjectType, name: &str) -> Result<bool, StoreError> {
        Ok(self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM objects
                 WHERE cluster_id = ?1 AND object_type = ?2 AND name = ?3)",
                params![self.cluster_id, object_type.key(), name],
                |r| r.get(0),
            )?)
        })?)
    }

    fn create(
        &self,
        object_type: ObjectType,
        object: &NewObject,
    ) -> Result<PersistedObject, StoreError> {
        let json = Self::encode(&object.fields)?;
        let id = self
            .db
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO objects (cluster_id, object_type, name, fields, updated_at)
                     VALUES (?1, ?2, ?3, ?4, datetime('now'))",
                    params![self.cluster_id, object_type.key(), object.name, json],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .map_err(|e| Self::map_write_error(e, object_type, &object.name))?;

        Ok(PersistedObject {
            id,
            object_type,
            name: object.name.clone(),
            cluster_id: self.cluster_id,
            fields: object.fields.clone(),
        })
    }

    fn update(
        &self,
        object_type: ObjectType,
        id: i64,
        fields: &Fields,
    ) -> Result<PersistedObject, StoreError> {
        let json = Self::encode(fields)?;
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE objects SET fields = ?1, updated_at = datetime('now')
                 WHERE id = ?2 AND cluster_id = ?3 AND object_type = ?4",
                params![json, id, self.cluster_id, object_type.key()],
            )?)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound { object_type, id });
        }

        match self.find_row(object_type, id)? {
            Some(row) => self.decode(object_type, row),
            None => Err(StoreError::NotFound { object_type, id }),
        }
    }

    fn delete(&self, object_type: ObjectType, id: i64) -> Result<(), StoreError> {
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM objects WHERE id = ?1 AND cluster_id = ?2 AND object_type = ?3",
                params![id, self.cluster_id, object_type.key()],
            )?)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound { object_type, id });
        }
        Ok(())
    }

    fn begin(&self) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            if !conn.is_autocommit() {
                return Ok(Err(StoreError::Transaction(
                    "a transaction is already open".to_string(),
                )));
            }
            conn.execute_batch("BEGIN IMMEDIATE")?;
            Ok(Ok(()))
        })?
    }

    fn commit(&self) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            if conn.is_autocommit() {
                return Ok(Err(StoreError::Transaction(
                    "no transaction is open".to_string(),
                )));
            }
            conn.execute_batch("COMMIT")?;
            Ok(Ok(()))
        })?
    }

    fn rollback(&self) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            if !conn.is_autocommit() {
                conn.execute_batch("ROLLBACK")?;
            }
            Ok(())
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::FieldValue;

    fn store() -> SqliteStore {
        SqliteStore::new(Database::open_in_memory().unwrap(), 1)
    }

    fn new_object(name: &str) -> NewObject {
        let mut fields = Fields::new();
        fields.insert("type".to_string(), FieldValue::from("basic_auth"));
        fields.insert("is_active".to_string(), FieldValue::Bool(true));
        NewObject {
            name: name.to_string(),
            fields,
        }
    }

    #[test]
    fn test_create_and_list() {
        let store = store();
        let created = store.create(ObjectType::Security, &new_object("sec1")).unwrap();
        assert!(created.id > 0);

        let listed = store.list(ObjectType::Security).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "sec1");
        assert_eq!(listed[0].fields["is_active"], FieldValue::Bool(true));
        assert!(store.list(ObjectType::Cache).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_create_is_conflict() {
        let store = store();
        store.create(ObjectType::Security, &new_object("sec1")).unwrap();
        let err = store
            .create(ObjectType::Security, &new_object("sec1"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn test_update_replaces_fields() {
        let store = store();
        let created = store.create(ObjectType::Security, &new_object("sec1")).unwrap();
        let mut fields = Fields::new();
        fields.insert("type".to_string(), FieldValue::from("apikey"));

        let updated = store
            .update(ObjectType::Security, created.id, &fields)
            .unwrap();
        assert_eq!(updated.fields, fields);
        assert!(!updated.fields.contains_key("is_active"));
    }

    #[test]
    fn test_update_and_delete_missing_is_not_found() {
        let store = store();
        assert!(matches!(
            store.update(ObjectType::Cache, 42, &Fields::new()),
            Err(StoreError::NotFound { id: 42, .. })
        ));
        assert!(matches!(
            store.delete(ObjectType::Cache, 42),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_clusters_are_isolated() {
        let db = Database::open_in_memory().unwrap();
        let one = SqliteStore::new(db.clone(), 1);
        let two = SqliteStore::new(db, 2);
        one.create(ObjectType::Cache, &new_object("c1")).unwrap();
        assert!(one.exists(ObjectType::Cache, "c1").unwrap());
        assert!(!two.exists(ObjectType::Cache, "c1").unwrap());
    }

    #[test]
    fn test_rollback_discards_writes() {
        let store = store();
        store.begin().unwrap();
        store.create(ObjectType::Cache, &new_object("c1")).unwrap();
        assert!(store.exists(ObjectType::Cache, "c1").unwrap());
        store.rollback().unwrap();
        assert!(!store.exists(ObjectType::Cache, "c1").unwrap());
    }

    #[test]
    fn test_commit_keeps_writes() {
        let store = store();
        store.begin().unwrap();
        store.create(ObjectType::Cache, &new_object("c1")).unwrap();
        store.commit().unwrap();
        assert!(store.exists(ObjectType::Cache, "c1").unwrap());
    }

    #[test]
    fn test_nested_begin_and_stray_commit_fail() {
        let store = store();
        assert!(matches!(store.commit(), Err(StoreError::Transaction(_))));
        store.begin().unwrap();
        assert!(matches!(store.begin(), Err(StoreError::Transaction(_))));
        store.rollback().unwrap();
        store.rollback().unwrap();
    }

    #[test]
    fn test_register_service_is_idempotent() {
        let store = store();
        store.register_service("demo.ping").unwrap();
        store.register_service("demo.ping").unwrap();
        assert!(store.exists(ObjectType::Service, "demo.ping").unwrap());
        assert_eq!(store.list(ObjectType::Service).unwrap().len(), 1);
    }
}
