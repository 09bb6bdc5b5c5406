//! Makes the store match a document.
//!
//! A run goes through fixed phases: validate every record, order the types,
//! wait (bounded) for referenced objects that do not exist yet, then apply
//! creates, updates and deletes type by type inside one transaction. Records
//! that fail validation or reference resolution are reported and skipped;
//! store errors and cancellation roll the whole run back.

pub mod plan;
pub mod report;
pub mod wait;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Instant;

use crate::config::{EnmasseConfig, SyncPolicy};
use crate::document::{Document, FieldValue, Record};
use crate::error::{EnmasseError, RecordError, Result};
use crate::notify::{NoopNotifier, ReloadNotifier};
use crate::resolver::{self, EdgeTable};
use crate::schema::handler::HandlerContext;
use crate::schema::{FieldKind, HandlerRegistry, ObjectHandler, ObjectType};
use crate::store::{NewObject, Store};

pub use plan::TypePlan;
pub use report::{NotifyOutcome, Outcome, RecordFailure, SyncReport, TypeCounts, UnresolvedReference};
pub use wait::{CancelFlag, WaitOutcome, WaitPool, WaitTarget};

type RecordKey = (ObjectType, String);

/// Records that passed validation, per type, in declaration order.
type ValidRecords = BTreeMap<ObjectType, Vec<Record>>;

/// Applies documents to one store.
///
/// Only one sync runs at a time per reconciler; a second concurrent call
/// fails with [`EnmasseError::SyncInProgress`].
pub struct Reconciler<'a> {
    store: &'a dyn Store,
    config: &'a EnmasseConfig,
    handlers: HandlerRegistry,
    edges: EdgeTable,
    notifier: Box<dyn ReloadNotifier>,
    cancel: CancelFlag,
    run_lock: Mutex<()>,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn Store, config: &'a EnmasseConfig) -> Self {
        Self {
            store,
            config,
            handlers: HandlerRegistry::new(),
            edges: resolver::schema_edges(),
            notifier: Box::new(NoopNotifier),
            cancel: CancelFlag::new(),
            run_lock: Mutex::new(()),
        }
    }

    pub fn with_notifier(mut self, notifier: Box<dyn ReloadNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Replaces the type dependency table used for ordering.
    pub fn with_edges(mut self, edges: EdgeTable) -> Self {
        self.edges = edges;
        self
    }

    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    /// Runs one sync of `document` against the store.
    pub fn sync(&self, document: &Document) -> Result<SyncReport> {
        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| EnmasseError::SyncInProgress)?;

        let span = tracing::info_span!(
            "sync",
            cluster_id = self.config.cluster_id,
            records = document.len()
        );
        let _enter = span.enter();

        let started = Instant::now();
        let ctx = HandlerContext::now();
        let mut report = SyncReport::default();

        let mut valid = self.validate(document, &mut report);
        let order = resolver::resolve_order_with(&document.types(), &self.edges)?;
        self.resolve_references(document, &mut valid, &mut report)?;
        self.apply(document, &order, &valid, &ctx, &mut report)?;

        report.notification = self.notify(&report);
        report.duration_ms = started.elapsed().as_millis() as u64;

        log::info!("Sync finished in {}ms: {}", report.duration_ms, report);
        Ok(report)
    }

    fn handler(&self, object_type: ObjectType) -> Option<&dyn ObjectHandler> {
        self.handlers.get(object_type)
    }

    fn validate(&self, document: &Document, report: &mut SyncReport) -> ValidRecords {
        let mut valid = ValidRecords::new();

        for (object_type, records) in document.sections() {
            let Some(handler) = self.handler(object_type) else {
                for record in records {
                    report.record_failure(&RecordError::Validation {
                        object_type,
                        name: record.name.clone(),
                        message: "no handler registered for this type".to_string(),
                    });
                }
                continue;
            };

            let section = valid.entry(object_type).or_default();
            for record in records {
                match handler.validate(record) {
                    Ok(normalized) => section.push(normalized),
                    Err(e) => report.record_failure(&e),
                }
            }
        }

        valid
    }

    /// Fails every record whose references cannot be satisfied, waiting for
    /// missing targets first.
    fn resolve_references(
        &self,
        document: &Document,
        valid: &mut ValidRecords,
        report: &mut SyncReport,
    ) -> Result<()> {
        let declared: HashSet<WaitTarget> = document
            .sections()
            .flat_map(|(t, records)| {
                records.iter().map(move |r| WaitTarget {
                    object_type: t,
                    name: r.name.clone(),
                })
            })
            .collect();

        // Records that failed validation count as failed targets.
        let mut failed: HashSet<RecordKey> = declared
            .iter()
            .filter(|t| {
                !valid
                    .get(&t.object_type)
                    .is_some_and(|records| records.iter().any(|r| r.name == t.name))
            })
            .map(|t| (t.object_type, t.name.clone()))
            .collect();

        let reconciled: HashSet<ObjectType> = document.types().into_iter().collect();
        let mut references: BTreeMap<RecordKey, Vec<WaitTarget>> = BTreeMap::new();
        let mut in_store: HashMap<WaitTarget, bool> = HashMap::new();
        let mut missing: BTreeMap<WaitTarget, Vec<RecordKey>> = BTreeMap::new();

        for (object_type, records) in valid.iter() {
            for record in records {
                let key = (*object_type, record.name.clone());
                let targets = references_of(*object_type, record);

                // Undeclared objects of a fully managed type are deleted by
                // this run, whether they exist now or appear while waiting.
                let removed = targets
                    .iter()
                    .find(|t| !declared.contains(*t) && self.removed_by_run(&reconciled, t));
                if let Some(target) = removed {
                    log::warn!(
                        "{} '{}' references {} '{}', which this sync removes",
                        object_type.display_name(),
                        record.name,
                        target.object_type.display_name(),
                        target.name
                    );
                    report.record_failure(&unresolved(*object_type, &record.name, target));
                    failed.insert(key.clone());
                    references.insert(key, targets);
                    continue;
                }

                for target in &targets {
                    if declared.contains(target) {
                        continue;
                    }
                    if !self.exists_cached(&mut in_store, target)? {
                        missing.entry(target.clone()).or_default().push(key.clone());
                    }
                }
                references.insert(key, targets);
            }
        }

        if !missing.is_empty() {
            let pool = WaitPool::new(
                self.config.wait_workers,
                self.config.poll_interval(),
                self.config.missing_wait(),
                self.cancel.clone(),
            );
            let mut results = pool.wait_all(self.store, missing.keys().cloned().collect())?;
            results.sort_by(|a, b| a.target.cmp(&b.target));

            for result in results {
                match result.outcome {
                    WaitOutcome::Resolved => {}
                    WaitOutcome::Cancelled => return Err(EnmasseError::Cancelled),
                    WaitOutcome::TimedOut => {
                        let referrers = missing.get(&result.target).map(Vec::as_slice).unwrap_or(&[]);
                        for (referrer_type, referrer) in referrers {
                            report.unresolved.push(UnresolvedReference {
                                referrer_type: *referrer_type,
                                referrer: referrer.clone(),
                                target_type: result.target.object_type,
                                target: result.target.name.clone(),
                                waited_secs: result.waited.as_secs_f64(),
                            });
                            if failed.insert((*referrer_type, referrer.clone())) {
                                report.record_failure(&unresolved(
                                    *referrer_type,
                                    referrer,
                                    &result.target,
                                ));
                            }
                        }
                    }
                }
            }
        }

        // A record depending on a declared record that failed fails too,
        // unless the target already exists in the store.
        loop {
            let mut newly_failed = Vec::new();
            for (key, targets) in &references {
                if failed.contains(key) {
                    continue;
                }
                for target in targets {
                    let target_key = (target.object_type, target.name.clone());
                    if declared.contains(target)
                        && failed.contains(&target_key)
                        && !self.exists_cached(&mut in_store, target)?
                    {
                        newly_failed.push((key.clone(), target.clone()));
                        break;
                    }
                }
            }

            if newly_failed.is_empty() {
                break;
            }
            for ((object_type, name), target) in newly_failed {
                report.record_failure(&unresolved(object_type, &name, &target));
                failed.insert((object_type, name));
            }
        }

        for (object_type, records) in valid.iter_mut() {
            records.retain(|r| !failed.contains(&(*object_type, r.name.clone())));
        }
        Ok(())
    }

    /// True when a sync of this document deletes every undeclared object
    /// of the target's type.
    fn removed_by_run(&self, reconciled: &HashSet<ObjectType>, target: &WaitTarget) -> bool {
        reconciled.contains(&target.object_type)
            && self.config.policy_for(target.object_type) == SyncPolicy::FullyManaged
    }

    fn exists_cached(
        &self,
        cache: &mut HashMap<WaitTarget, bool>,
        target: &WaitTarget,
    ) -> Result<bool> {
        if let Some(found) = cache.get(target) {
            return Ok(*found);
        }
        let found = self.store.exists(target.object_type, &target.name)?;
        cache.insert(target.clone(), found);
        Ok(found)
    }

    fn apply(
        &self,
        document: &Document,
        order: &[ObjectType],
        valid: &ValidRecords,
        ctx: &HandlerContext,
        report: &mut SyncReport,
    ) -> Result<()> {
        let per_type = self.config.per_type_atomicity;

        if !per_type {
            self.store.begin()?;
        }

        for &object_type in order {
            match self.apply_step(object_type, document, valid, ctx) {
                Ok(counts) => {
                    let entry = report.counts_mut(object_type);
                    entry.created += counts.created;
                    entry.updated += counts.updated;
                    entry.deleted += counts.deleted;
                    entry.skipped += counts.skipped;
                }
                Err(e) => {
                    self.abort(&e);
                    return Err(e);
                }
            }
        }

        if !per_type {
            if let Err(e) = self.finish_transaction() {
                self.abort(&e);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Applies one type, inside its own transaction when types commit
    /// separately.
    fn apply_step(
        &self,
        object_type: ObjectType,
        document: &Document,
        valid: &ValidRecords,
        ctx: &HandlerContext,
    ) -> Result<TypeCounts> {
        self.check_cancelled()?;
        if self.config.per_type_atomicity {
            self.store.begin()?;
        }
        let counts = self.apply_type(object_type, document, valid, ctx)?;
        if self.config.per_type_atomicity {
            self.finish_transaction()?;
        }
        Ok(counts)
    }

    fn finish_transaction(&self) -> Result<()> {
        self.check_cancelled()?;
        self.store.commit()?;
        Ok(())
    }

    fn apply_type(
        &self,
        object_type: ObjectType,
        document: &Document,
        valid: &ValidRecords,
        ctx: &HandlerContext,
    ) -> Result<TypeCounts> {
        let span = tracing::debug_span!("apply_type", object_type = object_type.key());
        let _enter = span.enter();

        let Some(handler) = self.handler(object_type) else {
            return Ok(TypeCounts::default());
        };

        let declared: HashSet<&str> = document
            .records(object_type)
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        let desired = valid.get(&object_type).map(Vec::as_slice).unwrap_or(&[]);
        let existing = self.store.list(object_type)?;
        let plan = plan::diff(
            handler,
            desired,
            &declared,
            existing,
            self.config.policy_for(object_type),
        );

        let mut counts = TypeCounts {
            skipped: plan.unchanged.len(),
            ..Default::default()
        };
        let label = object_type.display_name();
        if plan.is_empty() {
            log::debug!("No changes for {}", label);
        }

        for record in &plan.creates {
            self.check_cancelled()?;
            let fields = handler.to_persisted(record, None, ctx);
            self.store.create(
                object_type,
                &NewObject {
                    name: record.name.clone(),
                    fields,
                },
            )?;
            log::info!("Created {} '{}'", label, record.name);
            counts.created += 1;
        }

        for (record, current) in &plan.updates {
            self.check_cancelled()?;
            let fields = handler.to_persisted(record, Some(current), ctx);
            self.store.update(object_type, current.id, &fields)?;
            log::info!("Updated {} '{}'", label, record.name);
            counts.updated += 1;
        }

        for object in &plan.deletes {
            self.check_cancelled()?;
            self.store.delete(object_type, object.id)?;
            log::info!("Deleted {} '{}'", label, object.name);
            counts.deleted += 1;
        }

        for name in &plan.unchanged {
            log::debug!("{} '{}' is unchanged", label, name);
        }

        Ok(counts)
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(EnmasseError::Cancelled);
        }
        Ok(())
    }

    fn abort(&self, cause: &EnmasseError) {
        log::error!("Sync aborted: {}", cause);
        match self.store.rollback() {
            Ok(()) => log::warn!("Rolled back uncommitted changes"),
            Err(e) => log::error!("Rollback failed: {}", e),
        }
    }

    fn notify(&self, report: &SyncReport) -> NotifyOutcome {
        if report.changes() == 0 || !self.notifier.is_enabled() {
            return NotifyOutcome::Skipped;
        }
        match self.notifier.notify() {
            Ok(()) => NotifyOutcome::Sent,
            Err(e) => {
                log::warn!("Configuration was committed but the reload call failed: {}", e);
                NotifyOutcome::Failed {
                    message: e.to_string(),
                }
            }
        }
    }
}

/// Every object a record names through its reference fields.
fn references_of(object_type: ObjectType, record: &Record) -> Vec<WaitTarget> {
    let mut out = Vec::new();
    for spec in object_type.schema().reference_fields() {
        let Some(value) = record.get(spec.name) else {
            continue;
        };
        let names: Vec<&str> = match (spec.kind, value) {
            (FieldKind::Reference(_), FieldValue::String(name)) => vec![name.as_str()],
            (FieldKind::ReferenceList(_), FieldValue::List(items)) => {
                items.iter().filter_map(FieldValue::as_str).collect()
            }
            _ => Vec::new(),
        };
        if let Some(target_type) = spec.kind.reference_target() {
            for name in names {
                let target = WaitTarget {
                    object_type: target_type,
                    name: name.to_string(),
                };
                if !out.contains(&target) {
                    out.push(target);
                }
            }
        }
    }
    out
}

fn unresolved(object_type: ObjectType, name: &str, target: &WaitTarget) -> RecordError {
    RecordError::UnresolvedReference {
        object_type,
        name: name.to_string(),
        target_type: target.object_type,
        target_name: target.name.clone(),
    }
}
