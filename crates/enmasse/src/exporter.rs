//! Turns the current store contents back into a document.

use std::fs;
use std::path::Path;

use crate::document::{self, Document};
use crate::error::{DocumentError, Result};
use crate::schema::{HandlerRegistry, ObjectType};
use crate::store::Store;

/// Reads every declarable type from a store and projects it onto records.
pub struct Exporter<'a> {
    store: &'a dyn Store,
    handlers: HandlerRegistry,
}

impl<'a> Exporter<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self {
            store,
            handlers: HandlerRegistry::new(),
        }
    }

    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    /// Builds a document with types in canonical order and records sorted
    /// by name byte-wise.
    pub fn export(&self) -> Result<Document> {
        let span = tracing::info_span!("export");
        let _enter = span.enter();

        let mut document = Document::new();

        for object_type in ObjectType::declarable() {
            let Some(handler) = self.handlers.get(object_type) else {
                log::warn!("No handler for {}, skipping export", object_type.display_name());
                continue;
            };

            let mut objects = self.store.list(object_type)?;
            objects.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));

            log::debug!("Exporting {} {} object(s)", objects.len(), object_type.key());
            for object in &objects {
                document.upsert(object_type, handler.from_persisted(object));
            }
        }

        log::info!("Exported {} object(s)", document.len());
        Ok(document)
    }

    /// Exports and writes the rendered document to `path`.
    pub fn export_to_file(&self, path: &Path) -> Result<Document> {
        let document = self.export()?;
        let bytes = document::render(&document)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| DocumentError::WriteFile {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        fs::write(path, bytes).map_err(|e| DocumentError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        log::info!("Wrote {}", path.display());
        Ok(document)
    }
}

/// Exports a store with the default handlers.
pub fn export(store: &dyn Store) -> Result<Document> {
    Exporter::new(store).export()
}
