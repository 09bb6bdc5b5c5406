//! Per-type diff between declared records and persisted objects.

use std::collections::{HashMap, HashSet};

use crate::config::SyncPolicy;
use crate::document::Record;
use crate::schema::{ObjectHandler, ObjectType};
use crate::store::PersistedObject;

/// What a sync will do to one object type.
#[derive(Debug, Clone)]
pub struct TypePlan {
    pub object_type: ObjectType,
    /// New records, in declaration order.
    pub creates: Vec<Record>,
    /// Changed records with their persisted counterpart, in declaration order.
    pub updates: Vec<(Record, PersistedObject)>,
    /// Objects to remove, ordered by name.
    pub deletes: Vec<PersistedObject>,
    /// Names of records already matching the store.
    pub unchanged: Vec<String>,
}

impl TypePlan {
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

/// Diffs the records of one type against the store.
///
/// `desired` holds the records that passed validation and reference checks.
/// `declared` holds every name the document declares for the type, failed
/// ones included, so a record that failed this run is never deleted.
pub fn diff(
    handler: &dyn ObjectHandler,
    desired: &[Record],
    declared: &HashSet<&str>,
    existing: Vec<PersistedObject>,
    policy: SyncPolicy,
) -> TypePlan {
    let object_type = handler.object_type();
    let mut by_name: HashMap<String, PersistedObject> = existing
        .into_iter()
        .map(|o| (o.name.clone(), o))
        .collect();

    let mut plan = TypePlan {
        object_type,
        creates: Vec::new(),
        updates: Vec::new(),
        deletes: Vec::new(),
        unchanged: Vec::new(),
    };

    for record in desired {
        match by_name.remove(&record.name) {
            None => plan.creates.push(record.clone()),
            Some(current) if handler.is_unchanged(record, &current) => {
                plan.unchanged.push(record.name.clone())
            }
            Some(current) => plan.updates.push((record.clone(), current)),
        }
    }

    if policy == SyncPolicy::FullyManaged {
        let mut leftovers: Vec<PersistedObject> = by_name
            .into_values()
            .filter(|o| !declared.contains(o.name.as_str()))
            .collect();
        leftovers.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
        plan.deletes = leftovers;
    }

    plan
}
