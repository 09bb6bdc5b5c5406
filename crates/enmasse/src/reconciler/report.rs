//! Outcome of a sync run.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::error::RecordError;
use crate::schema::ObjectType;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TypeCounts {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl TypeCounts {
    /// Number of store writes.
    pub fn changes(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

/// A record that was not applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordFailure {
    pub object_type: ObjectType,
    pub name: String,
    pub kind: String,
    pub message: String,
}

/// A reference whose target never appeared.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnresolvedReference {
    pub referrer_type: ObjectType,
    pub referrer: String,
    pub target_type: ObjectType,
    pub target: String,
    pub waited_secs: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NotifyOutcome {
    /// No reload was requested: nothing changed or reloads are off.
    #[default]
    Skipped,
    Sent,
    Failed {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    #[default]
    Success,
    /// Some records failed; the rest were applied.
    Partial,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub outcome: Outcome,
    pub counts: BTreeMap<ObjectType, TypeCounts>,
    pub failures: Vec<RecordFailure>,
    pub unresolved: Vec<UnresolvedReference>,
    pub notification: NotifyOutcome,
    pub duration_ms: u64,
}

impl SyncReport {
    pub fn counts_for(&self, object_type: ObjectType) -> TypeCounts {
        self.counts.get(&object_type).copied().unwrap_or_default()
    }

    pub(crate) fn counts_mut(&mut self, object_type: ObjectType) -> &mut TypeCounts {
        self.counts.entry(object_type).or_default()
    }

    pub(crate) fn record_failure(&mut self, error: &RecordError) {
        let (object_type, name) = match error {
            RecordError::Validation {
                object_type, name, ..
            }
            | RecordError::UnresolvedReference {
                object_type, name, ..
            } => (*object_type, name.clone()),
        };
        log::warn!("Skipping {}", error);
        self.counts_mut(object_type).failed += 1;
        self.failures.push(RecordFailure {
            object_type,
            name,
            kind: error.kind().to_string(),
            message: error.to_string(),
        });
        self.outcome = Outcome::Partial;
    }

    /// Total store writes across all types.
    pub fn changes(&self) -> usize {
        self.counts.values().map(TypeCounts::changes).sum()
    }

    pub fn total(&self) -> TypeCounts {
        self.counts.values().fold(TypeCounts::default(), |acc, c| TypeCounts {
            created: acc.created + c.created,
            updated: acc.updated + c.updated,
            deleted: acc.deleted + c.deleted,
            skipped: acc.skipped + c.skipped,
            failed: acc.failed + c.failed,
        })
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    /// True when any failure was caused by a missing reference.
    pub fn has_unresolved_references(&self) -> bool {
        self.failures
            .iter()
            .any(|f| f.kind == "UnresolvedReferenceError")
    }

    pub fn failed(&self, object_type: ObjectType, name: &str) -> Option<&RecordFailure> {
        self.failures
            .iter()
            .find(|f| f.object_type == object_type && f.name == name)
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.total();
        write!(
            f,
            "{} created, {} updated, {} deleted, {} unchanged, {} failed",
            total.created, total.updated, total.deleted, total.skipped, total.failed
        )
    }
}
