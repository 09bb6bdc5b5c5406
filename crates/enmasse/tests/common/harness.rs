//! Isolated store and document directory for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use tempfile::TempDir;

use enmasse::document::Fields;
use enmasse::store::NewObject;
use enmasse::{
    load, Database, Document, EnmasseConfig, LoadOptions, ObjectType, PersistedObject,
    SqliteStore, Store, StoreError,
};

pub struct TestHarness {
    temp_dir: TempDir,
    pub store: SqliteStore,
    pub config: EnmasseConfig,
}

impl TestHarness {
    /// Creates a harness with a short wait and a fast poll interval.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let database = temp_dir.path().join("data").join("enmasse.db");
        let db = Database::open(&database).expect("Failed to open database");

        let config = EnmasseConfig {
            database,
            missing_wait_time: 1,
            poll_interval_ms: 50,
            wait_workers: 4,
            ..Default::default()
        };

        Self {
            store: SqliteStore::new(db, config.cluster_id),
            config,
            temp_dir,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes a document file relative to the temp directory.
    pub fn write_document(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.temp_dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create document dir");
        }
        std::fs::write(&path, content).expect("Failed to write document");
        path
    }

    /// Parses a document from YAML text.
    pub fn parse(&self, content: &str) -> Document {
        enmasse::document::parse(content.as_bytes()).expect("Failed to parse document")
    }

    /// Writes and loads a document through the include-resolving loader.
    pub fn load(&self, content: &str) -> Document {
        let path = self.write_document("enmasse.yaml", content);
        load(&path, &LoadOptions::from(&self.config))
            .expect("Failed to load document")
            .document
    }

    /// Names of all stored objects of a type, sorted.
    pub fn names(&self, object_type: ObjectType) -> Vec<String> {
        let mut names: Vec<String> = self
            .store
            .list(object_type)
            .expect("Failed to list objects")
            .into_iter()
            .map(|o| o.name)
            .collect();
        names.sort();
        names
    }

    pub fn find(&self, object_type: ObjectType, name: &str) -> Option<PersistedObject> {
        self.store
            .list(object_type)
            .expect("Failed to list objects")
            .into_iter()
            .find(|o| o.name == name)
    }

    /// Inserts an object directly, bypassing the reconciler.
    pub fn seed(&self, object_type: ObjectType, name: &str, fields: Fields) {
        self.store
            .create(
                object_type,
                &NewObject {
                    name: name.to_string(),
                    fields,
                },
            )
            .expect("Failed to seed object");
    }
}

/// Wraps a store and fails the n-th create with a conflict.
pub struct FailingStore<'a> {
    inner: &'a dyn Store,
    fail_on_create: usize,
    creates: AtomicUsize,
}

impl<'a> FailingStore<'a> {
    pub fn new(inner: &'a dyn Store, fail_on_create: usize) -> Self {
        Self {
            inner,
            fail_on_create,
            creates: AtomicUsize::new(0),
        }
    }
}

impl Store for FailingStore<'_> {
    fn list(&self, object_type: ObjectType) -> Result<Vec<PersistedObject>, StoreError> {
        self.inner.list(object_type)
    }

    fn exists(&self, object_type: ObjectType, name: &str) -> Result<bool, StoreError> {
        self.inner.exists(object_type, name)
    }

    fn create(
        &self,
        object_type: ObjectType,
        object: &NewObject,
    ) -> Result<PersistedObject, StoreError> {
        let n = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_on_create {
            return Err(StoreError::Conflict(format!(
                "injected failure on create #{}",
                n
            )));
        }
        self.inner.create(object_type, object)
    }

    fn update(
        &self,
        object_type: ObjectType,
        id: i64,
        fields: &Fields,
    ) -> Result<PersistedObject, StoreError> {
        self.inner.update(object_type, id, fields)
    }

    fn delete(&self, object_type: ObjectType, id: i64) -> Result<(), StoreError> {
        self.inner.delete(object_type, id)
    }

    fn begin(&self) -> Result<(), StoreError> {
        self.inner.begin()
    }

    fn commit(&self) -> Result<(), StoreError> {
        self.inner.commit()
    }

    fn rollback(&self) -> Result<(), StoreError> {
        self.inner.rollback()
    }
}
