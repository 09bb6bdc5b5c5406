//! Orders object types so referenced types are applied before the types
//! that reference them.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::ResolveError;
use crate::schema::ObjectType;

/// Which types each type references.
pub type EdgeTable = BTreeMap<ObjectType, Vec<ObjectType>>;

/// Reference edges derived from the field schemas. Self-references are
/// left out; records of one type are applied together.
pub fn schema_edges() -> EdgeTable {
    ObjectType::all()
        .iter()
        .map(|t| (*t, t.referenced_types()))
        .collect()
}

/// Orders `types` using the schema's reference edges.
pub fn resolve_order(types: &[ObjectType]) -> Result<Vec<ObjectType>, ResolveError> {
    resolve_order_with(types, &schema_edges())
}

/// Orders `types` so that for every edge `A -> B` with both present, `B`
/// comes first. Unconstrained types keep canonical order.
pub fn resolve_order_with(
    types: &[ObjectType],
    edges: &EdgeTable,
) -> Result<Vec<ObjectType>, ResolveError> {
    let present: BTreeSet<ObjectType> = types.iter().copied().collect();

    // dependents[b] = types waiting on b; pending[a] = unmet dependencies of a.
    let mut dependents: BTreeMap<ObjectType, Vec<ObjectType>> = BTreeMap::new();
    let mut pending: BTreeMap<ObjectType, usize> = present.iter().map(|t| (*t, 0)).collect();

    for &from in &present {
        let targets: BTreeSet<ObjectType> = edges
            .get(&from)
            .into_iter()
            .flatten()
            .copied()
            .filter(|to| *to != from && present.contains(to))
            .collect();
        for to in targets {
            dependents.entry(to).or_default().push(from);
            *pending.entry(from).or_default() += 1;
        }
    }

    let mut ready: BTreeSet<ObjectType> = pending
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(t, _)| *t)
        .collect();
    let mut order = Vec::with_capacity(present.len());

    while let Some(next) = ready.pop_first() {
        order.push(next);
        for dependent in dependents.get(&next).into_iter().flatten() {
            if let Some(n) = pending.get_mut(dependent) {
                *n -= 1;
                if *n == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    if order.len() < present.len() {
        let stuck: Vec<ObjectType> = pending
            .into_iter()
            .filter(|(_, n)| *n > 0)
            .map(|(t, _)| t)
            .collect();
        return Err(ResolveError::DependencyCycle { types: stuck });
    }

    log::debug!(
        "Type order: {}",
        order.iter().map(|t| t.key()).collect::<Vec<_>>().join(", ")
    );
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ObjectType::*;

    fn position(order: &[ObjectType], t: ObjectType) -> usize {
        order.iter().position(|x| *x == t).unwrap()
    }

    #[test]
    fn test_referenced_types_come_first() {
        let order = resolve_order(&[ChannelRest, Groups, Security, Cache]).unwrap();
        assert!(position(&order, Security) < position(&order, Groups));
        assert!(position(&order, Groups) < position(&order, ChannelRest));
        assert!(position(&order, Cache) < position(&order, ChannelRest));
    }

    #[test]
    fn test_full_schema_has_no_cycle() {
        let order = resolve_order(ObjectType::all()).unwrap();
        assert_eq!(order.len(), ObjectType::all().len());
        for t in ObjectType::all() {
            for dep in t.referenced_types() {
                assert!(position(&order, dep) < position(&order, *t));
            }
        }
    }

    #[test]
    fn test_ties_follow_canonical_order() {
        let order = resolve_order(&[Jira, Sql, Cache, Ldap]).unwrap();
        assert_eq!(order, vec![Cache, Sql, Ldap, Jira]);
    }

    #[test]
    fn test_absent_dependencies_do_not_constrain() {
        let order = resolve_order(&[Scheduler, Cache]).unwrap();
        assert_eq!(order, vec![Cache, Scheduler]);
    }

    #[test]
    fn test_custom_edges_can_reorder() {
        let mut edges = EdgeTable::new();
        edges.insert(Security, vec![Cache]);
        let order = resolve_order_with(&[Security, Cache], &edges).unwrap();
        assert_eq!(order, vec![Cache, Security]);
    }

    #[test]
    fn test_cycle_is_reported() {
        let mut edges = EdgeTable::new();
        edges.insert(Security, vec![Cache]);
        edges.insert(Cache, vec![Sql]);
        edges.insert(Sql, vec![Security]);
        edges.insert(Jira, vec![Security]);

        match resolve_order_with(&[Security, Cache, Sql, Jira, Ldap], &edges) {
            Err(ResolveError::DependencyCycle { types }) => {
                assert!(types.contains(&Security));
                assert!(types.contains(&Cache));
                assert!(types.contains(&Sql));
                assert!(!types.contains(&Ldap));
            }
            other => panic!("expected a cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_edges_are_ignored() {
        let mut edges = EdgeTable::new();
        edges.insert(Groups, vec![Groups]);
        assert_eq!(resolve_order_with(&[Groups], &edges).unwrap(), vec![Groups]);
    }
}
