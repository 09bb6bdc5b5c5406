//! Document loader with recursive include resolution.
//!
//! Includes are resolved depth-first relative to the including file. A
//! file's includes are merged before its own declarations, so an including
//! document overrides what it pulls in.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::EnmasseConfig;
use crate::document::{self, Document, ParseOptions};
use crate::error::DocumentError;

/// Options controlling include resolution and parsing.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Skip missing includes with a diagnostic instead of failing.
    pub ignore_missing_includes: bool,
    pub parse: ParseOptions,
}

impl From<&EnmasseConfig> for LoadOptions {
    fn from(config: &EnmasseConfig) -> Self {
        Self {
            ignore_missing_includes: config.ignore_missing_includes,
            parse: config.parse_options(),
        }
    }
}

/// A flattened document together with where it came from.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub document: Document,
    /// Files read, in the order they were opened.
    pub sources: Vec<PathBuf>,
    /// Non-fatal problems: skipped includes and unknown types.
    pub diagnostics: Vec<String>,
}

/// Loads a document and everything it includes.
pub fn load(path: &Path, options: &LoadOptions) -> Result<LoadedDocument, DocumentError> {
    let mut loader = DocumentLoader {
        options,
        chain: Vec::new(),
        sources: Vec::new(),
        diagnostics: Vec::new(),
    };

    let document = loader.load_file(path)?;

    log::info!(
        "Loaded {} object(s) from {} file(s)",
        document.len(),
        loader.sources.len()
    );

    Ok(LoadedDocument {
        document,
        sources: loader.sources,
        diagnostics: loader.diagnostics,
    })
}

struct DocumentLoader<'a> {
    options: &'a LoadOptions,
    /// Canonical paths of the files currently being resolved.
    chain: Vec<PathBuf>,
    sources: Vec<PathBuf>,
    diagnostics: Vec<String>,
}

impl DocumentLoader<'_> {
    fn load_file(&mut self, path: &Path) -> Result<Document, DocumentError> {
        let canonical = fs::canonicalize(path).map_err(|e| DocumentError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        if self.chain.contains(&canonical) {
            let mut chain = self.chain.clone();
            chain.push(canonical);
            return Err(DocumentError::CircularInclude { chain });
        }

        let bytes = fs::read(&canonical).map_err(|e| DocumentError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        log::debug!("Reading document {}", canonical.display());
        let parsed = document::parse_with(&bytes, &self.options.parse).map_err(|e| e.at(path))?;
        self.diagnostics.extend(
            parsed
                .diagnostics
                .into_iter()
                .map(|d| format!("{}: {}", path.display(), d)),
        );
        self.sources.push(canonical.clone());

        let mut own = parsed.document;
        let includes = std::mem::take(&mut own.includes);
        let base_dir = canonical.parent().map(Path::to_path_buf).unwrap_or_default();

        self.chain.push(canonical);
        let mut merged = Document::new();
        for include in includes {
            let target = if include.path.is_absolute() {
                include.path.clone()
            } else {
                base_dir.join(&include.path)
            };

            if !target.exists() {
                if self.options.ignore_missing_includes {
                    let message = format!(
                        "Skipping missing include '{}' from {}",
                        include.path.display(),
                        path.display()
                    );
                    log::warn!("{}", message);
                    self.diagnostics.push(message);
                    continue;
                }
                return Err(DocumentError::IncludeNotFound {
                    path: target,
                    included_from: path.to_path_buf(),
                });
            }

            merged.merge(self.load_file(&target)?);
        }
        self.chain.pop();

        merged.merge(own);
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::FieldValue;
    use crate::schema::ObjectType;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_single_file() {
        let dir = TempDir::new().unwrap();
        let root = write(&dir, "main.yaml", "cache:\n  - name: c1\n    max_size: 10\n");
        let loaded = load(&root, &LoadOptions::default()).unwrap();
        assert_eq!(loaded.document.len(), 1);
        assert_eq!(loaded.sources.len(), 1);
        assert!(loaded.diagnostics.is_empty());
    }

    #[test]
    fn test_includes_are_relative_to_including_file() {
        let dir = TempDir::new().unwrap();
        write(&dir, "conf/security.yaml", "security:\n  - name: sec1\n    type: basic_auth\n");
        write(&dir, "conf/extra/cache.yaml", "cache:\n  - name: c1\n");
        write(
            &dir,
            "conf/all.yaml",
            "include:\n  - security.yaml\n  - path: extra/cache.yaml\n",
        );
        let root = write(&dir, "main.yaml", "include:\n  - conf/all.yaml\n");

        let loaded = load(&root, &LoadOptions::default()).unwrap();
        assert!(loaded.document.find(ObjectType::Security, "sec1").is_some());
        assert!(loaded.document.find(ObjectType::Cache, "c1").is_some());
        assert_eq!(loaded.sources.len(), 4);
        assert!(loaded.document.includes.is_empty());
    }

    #[test]
    fn test_includer_overrides_included_records() {
        let dir = TempDir::new().unwrap();
        write(&dir, "base.yaml", "cache:\n  - name: c1\n    max_size: 10\n  - name: c2\n");
        let root = write(
            &dir,
            "main.yaml",
            "include:\n  - base.yaml\ncache:\n  - name: c1\n    max_size: 99\n",
        );

        let loaded = load(&root, &LoadOptions::default()).unwrap();
        let names: Vec<&str> = loaded
            .document
            .records(ObjectType::Cache)
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(names, vec!["c1", "c2"]);
        assert_eq!(
            loaded.document.find(ObjectType::Cache, "c1").unwrap().get("max_size"),
            Some(&FieldValue::Int(99))
        );
    }

    #[test]
    fn test_later_include_wins() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.yaml", "cache:\n  - name: c1\n    max_size: 1\n");
        write(&dir, "b.yaml", "cache:\n  - name: c1\n    max_size: 2\n");
        let root = write(&dir, "main.yaml", "include:\n  - a.yaml\n  - b.yaml\n");

        let loaded = load(&root, &LoadOptions::default()).unwrap();
        assert_eq!(
            loaded.document.find(ObjectType::Cache, "c1").unwrap().get("max_size"),
            Some(&FieldValue::Int(2))
        );
    }

    #[test]
    fn test_circular_include_names_the_chain() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.yaml", "include:\n  - b.yaml\n");
        write(&dir, "b.yaml", "include:\n  - a.yaml\n");
        let root = dir.path().join("a.yaml");

        match load(&root, &LoadOptions::default()) {
            Err(DocumentError::CircularInclude { chain }) => {
                assert_eq!(chain.len(), 3);
                assert_eq!(chain.first(), chain.last());
                assert!(chain[1].ends_with("b.yaml"));
            }
            other => panic!("expected a circular include error, got {:?}", other),
        }
    }

    #[test]
    fn test_self_include_is_circular() {
        let dir = TempDir::new().unwrap();
        let root = write(&dir, "self.yaml", "include:\n  - ./self.yaml\n");
        assert!(matches!(
            load(&root, &LoadOptions::default()),
            Err(DocumentError::CircularInclude { .. })
        ));
    }

    #[test]
    fn test_diamond_include_is_not_circular() {
        let dir = TempDir::new().unwrap();
        write(&dir, "shared.yaml", "cache:\n  - name: shared\n");
        write(&dir, "left.yaml", "include:\n  - shared.yaml\n");
        write(&dir, "right.yaml", "include:\n  - shared.yaml\n");
        let root = write(&dir, "main.yaml", "include:\n  - left.yaml\n  - right.yaml\n");

        let loaded = load(&root, &LoadOptions::default()).unwrap();
        assert_eq!(loaded.document.len(), 1);
    }

    #[test]
    fn test_missing_include_fails_by_default() {
        let dir = TempDir::new().unwrap();
        let root = write(&dir, "main.yaml", "include:\n  - nowhere.yaml\n");
        match load(&root, &LoadOptions::default()) {
            Err(DocumentError::IncludeNotFound { path, included_from }) => {
                assert!(path.ends_with("nowhere.yaml"));
                assert_eq!(included_from, root);
            }
            other => panic!("expected a missing include error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_include_can_be_skipped() {
        let dir = TempDir::new().unwrap();
        let root = write(
            &dir,
            "main.yaml",
            "include:\n  - nowhere.yaml\ncache:\n  - name: c1\n",
        );
        let options = LoadOptions {
            ignore_missing_includes: true,
            ..Default::default()
        };
        let loaded = load(&root, &options).unwrap();
        assert_eq!(loaded.document.len(), 1);
        assert_eq!(loaded.diagnostics.len(), 1);
        assert!(loaded.diagnostics[0].contains("nowhere.yaml"));
    }

    #[test]
    fn test_parse_errors_carry_the_file_path() {
        let dir = TempDir::new().unwrap();
        let bad = write(&dir, "bad.yaml", "channel_soap:\n  - name: x\n");
        let root = write(&dir, "main.yaml", "include:\n  - bad.yaml\n");
        match load(&root, &LoadOptions::default()) {
            Err(DocumentError::UnknownType { path, key }) => {
                assert_eq!(key, "channel_soap");
                assert_eq!(fs::canonicalize(path).unwrap(), fs::canonicalize(bad).unwrap());
            }
            other => panic!("expected an unknown type error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_root_is_a_read_error() {
        let dir = TempDir::new().unwrap();
        let result = load(&dir.path().join("absent.yaml"), &LoadOptions::default());
        assert!(matches!(result, Err(DocumentError::ReadFile { .. })));
    }
}
