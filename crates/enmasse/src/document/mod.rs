//! In-memory desired-state document.
//!
//! A [`Document`] maps each object type to an ordered list of
//! [`Record`]s, plus any include directives that still need resolving.

pub mod serializer;
pub mod value;

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::schema::ObjectType;

pub use serializer::{parse, parse_with, render, ParseOptions, Parsed};
pub use value::FieldValue;

/// Field values of a record keyed by field name. `name` is held separately.
pub type Fields = BTreeMap<String, FieldValue>;

/// One declared instance of an object type.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub name: String,
    pub fields: Fields,
}

impl Record {
    /// Creates a record with no fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Fields::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Returns a field value, treating explicit nulls as absent.
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key).filter(|v| !v.is_null())
    }

    /// Returns a string field.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(FieldValue::as_str)
    }
}

/// A reference to another document to merge in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeDirective {
    pub path: PathBuf,
}

/// The desired state of all managed objects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    sections: BTreeMap<ObjectType, Vec<Record>>,
    /// Unresolved include directives, in declaration order.
    pub includes: Vec<IncludeDirective>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the records of one type in declaration order.
    pub fn records(&self, object_type: ObjectType) -> &[Record] {
        self.sections
            .get(&object_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Returns the object types that have at least one record, in canonical order.
    pub fn types(&self) -> Vec<ObjectType> {
        self.sections
            .iter()
            .filter(|(_, records)| !records.is_empty())
            .map(|(t, _)| *t)
            .collect()
    }

    /// Iterates over non-empty sections in canonical order.
    pub fn sections(&self) -> impl Iterator<Item = (ObjectType, &[Record])> {
        self.sections
            .iter()
            .filter(|(_, records)| !records.is_empty())
            .map(|(t, records)| (*t, records.as_slice()))
    }

    /// Looks up a record by type and name.
    pub fn find(&self, object_type: ObjectType, name: &str) -> Option<&Record> {
        self.records(object_type).iter().find(|r| r.name == name)
    }

    /// Adds a record. A record with the same type and name is replaced in
    /// place, so the later declaration wins while keeping the first position.
    pub fn upsert(&mut self, object_type: ObjectType, record: Record) {
        let section = self.sections.entry(object_type).or_default();
        match section.iter_mut().find(|r| r.name == record.name) {
            Some(existing) => {
                log::debug!(
                    "Overriding {} '{}' with a later declaration",
                    object_type.display_name(),
                    record.name
                );
                *existing = record;
            }
            None => section.push(record),
        }
    }

    /// Builder-style variant of [`Document::upsert`].
    pub fn with_record(mut self, object_type: ObjectType, record: Record) -> Self {
        self.upsert(object_type, record);
        self
    }

    /// Merges every record of `other` into this document, type by type,
    /// in `other`'s encounter order.
    pub fn merge(&mut self, other: Document) {
        for (object_type, records) in other.sections {
            for record in records {
                self.upsert(object_type, record);
            }
        }
    }

    /// Total number of records across all types.
    pub fn len(&self) -> usize {
        self.sections.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
