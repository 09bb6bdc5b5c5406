//! Per-type handlers: validation, persisted form, export projection and
//! change detection.
//!
//! The reconciler looks a handler up once per object type and routes every
//! record of that type through it.

use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDateTime;

use super::scheduler::{self, Interval};
use super::{FieldKind, ObjectType, TypeSchema};
use crate::document::{FieldValue, Fields, Record};
use crate::error::RecordError;
use crate::store::PersistedObject;

/// Prefix of generated subscription keys.
pub const SUB_KEY_PREFIX: &str = "zpsk.";

/// Values handlers need that do not come from the record itself.
#[derive(Debug, Clone, Copy)]
pub struct HandlerContext {
    /// Wall-clock time of the run, in UTC.
    pub now: NaiveDateTime,
}

impl HandlerContext {
    pub fn now() -> Self {
        Self {
            now: chrono::Utc::now().naive_utc(),
        }
    }
}

/// Type-specific behaviour of one object type.
pub trait ObjectHandler: Send + Sync {
    fn object_type(&self) -> ObjectType;

    fn schema(&self) -> &'static TypeSchema {
        self.object_type().schema()
    }

    /// Checks a declared record and returns its normalized form: unknown
    /// fields and explicit nulls dropped.
    fn validate(&self, record: &Record) -> Result<Record, RecordError> {
        validate_fields(self.schema(), record)
    }

    /// Builds the fields to store for a validated record. `existing` is the
    /// current persisted object when this is an update.
    fn to_persisted(
        &self,
        record: &Record,
        existing: Option<&PersistedObject>,
        _ctx: &HandlerContext,
    ) -> Fields {
        let mut fields = record.fields.clone();
        if let Some(existing) = existing {
            carry_internal_fields(self.schema(), &existing.fields, &mut fields);
        }
        fields
    }

    /// Converts a persisted object back into a record as it would be
    /// declared. Internal and unknown fields are omitted.
    fn from_persisted(&self, object: &PersistedObject) -> Record {
        project_public(self.schema(), object)
    }

    /// True when applying `desired` would not change `existing`.
    fn is_unchanged(&self, desired: &Record, existing: &PersistedObject) -> bool {
        self.schema().public_fields().all(|spec| {
            let want = desired.get(spec.name);
            let have = existing.fields.get(spec.name).filter(|v| !v.is_null());
            match (want, have) {
                (None, None) => true,
                (Some(a), Some(b)) => a.semantically_eq(b),
                _ => false,
            }
        })
    }
}

/// Schema-driven behaviour shared by most types.
pub struct DefaultHandler {
    object_type: ObjectType,
}

impl DefaultHandler {
    pub fn new(object_type: ObjectType) -> Self {
        Self { object_type }
    }
}

impl ObjectHandler for DefaultHandler {
    fn object_type(&self) -> ObjectType {
        self.object_type
    }
}

/// Security groups export only their membership, which is a set.
pub struct GroupHandler;

impl GroupHandler {
    fn members(fields: &Fields) -> BTreeSet<&str> {
        fields
            .get("members")
            .and_then(FieldValue::as_list)
            .unwrap_or_default()
            .iter()
            .filter_map(FieldValue::as_str)
            .collect()
    }
}

impl ObjectHandler for GroupHandler {
    fn object_type(&self) -> ObjectType {
        ObjectType::Groups
    }

    fn is_unchanged(&self, desired: &Record, existing: &PersistedObject) -> bool {
        Self::members(&desired.fields) == Self::members(&existing.fields)
    }

    fn from_persisted(&self, object: &PersistedObject) -> Record {
        let mut record = Record::new(object.name.clone());
        if let Some(members) = object.fields.get("members").filter(|v| !v.is_null()) {
            record.fields.insert("members".to_string(), members.clone());
        }
        record
    }
}

/// Scheduler jobs carry a computed `next_run`.
pub struct SchedulerHandler;

impl SchedulerHandler {
    const JOB_TYPES: &'static [&'static str] = &["one_time", "interval_based"];
}

impl ObjectHandler for SchedulerHandler {
    fn object_type(&self) -> ObjectType {
        ObjectType::Scheduler
    }

    fn validate(&self, record: &Record) -> Result<Record, RecordError> {
        let record = validate_fields(self.schema(), record)?;

        let job_type = record.get_str("job_type").unwrap_or_default();
        if !Self::JOB_TYPES.contains(&job_type) {
            return Err(invalid(
                self.object_type(),
                &record.name,
                format!(
                    "job_type must be one of {}, got '{}'",
                    Self::JOB_TYPES.join(", "),
                    job_type
                ),
            ));
        }

        for unit in ["weeks", "days", "hours", "minutes", "seconds"] {
            if record.get(unit).and_then(FieldValue::as_i64).is_some_and(|n| n < 0) {
                return Err(invalid(
                    self.object_type(),
                    &record.name,
                    format!("'{}' must not be negative", unit),
                ));
            }
        }

        Ok(record)
    }

    fn to_persisted(
        &self,
        record: &Record,
        _existing: Option<&PersistedObject>,
        ctx: &HandlerContext,
    ) -> Fields {
        let mut fields = record.fields.clone();
        let start = record.get_str("start_date").and_then(scheduler::parse_datetime);
        if let Some(start) = start {
            let interval = if record.get_str("job_type") == Some("interval_based") {
                Interval::from_record(record)
            } else {
                Interval::default()
            };
            let next = scheduler::next_run(start, interval, ctx.now);
            fields.insert(
                "next_run".to_string(),
                FieldValue::String(scheduler::format_datetime(next)),
            );
        }
        fields
    }
}

/// Pub/sub subscriptions get a stable generated key.
pub struct SubscriptionHandler;

impl SubscriptionHandler {
    fn generate_sub_key() -> String {
        format!("{}{}", SUB_KEY_PREFIX, uuid::Uuid::new_v4().simple())
    }
}

impl ObjectHandler for SubscriptionHandler {
    fn object_type(&self) -> ObjectType {
        ObjectType::PubsubSubscription
    }

    fn validate(&self, record: &Record) -> Result<Record, RecordError> {
        let record = validate_fields(self.schema(), record)?;
        let object_type = self.object_type();

        match record.get_str("delivery_type") {
            Some("pull") => {}
            Some("push") => {
                let endpoints = ["push_rest_endpoint", "push_service"]
                    .iter()
                    .filter(|f| record.get(f).is_some())
                    .count();
                if endpoints != 1 {
                    return Err(invalid(
                        object_type,
                        &record.name,
                        "push delivery needs exactly one of push_rest_endpoint or push_service"
                            .to_string(),
                    ));
                }
            }
            other => {
                return Err(invalid(
                    object_type,
                    &record.name,
                    format!(
                        "delivery_type must be 'pull' or 'push', got '{}'",
                        other.unwrap_or_default()
                    ),
                ))
            }
        }

        Ok(record)
    }

    fn to_persisted(
        &self,
        record: &Record,
        existing: Option<&PersistedObject>,
        _ctx: &HandlerContext,
    ) -> Fields {
        let mut fields = record.fields.clone();
        let sub_key = existing
            .and_then(|e| e.fields.get("sub_key"))
            .filter(|v| !v.is_null())
            .cloned()
            .unwrap_or_else(|| FieldValue::String(Self::generate_sub_key()));
        fields.insert("sub_key".to_string(), sub_key);
        fields
    }
}

/// Handlers for every declarable type.
pub struct HandlerRegistry {
    handlers: HashMap<ObjectType, Box<dyn ObjectHandler>>,
}

impl HandlerRegistry {
    /// Registry with the built-in handler for each declarable type.
    pub fn new() -> Self {
        let mut registry = Self {
            handlers: HashMap::new(),
        };
        for object_type in ObjectType::declarable() {
            registry.register(Box::new(DefaultHandler::new(object_type)));
        }
        registry.register(Box::new(GroupHandler));
        registry.register(Box::new(SchedulerHandler));
        registry.register(Box::new(SubscriptionHandler));
        registry
    }

    /// Installs a handler, replacing any previous one for its type.
    pub fn register(&mut self, handler: Box<dyn ObjectHandler>) {
        self.handlers.insert(handler.object_type(), handler);
    }

    pub fn get(&self, object_type: ObjectType) -> Option<&dyn ObjectHandler> {
        self.handlers.get(&object_type).map(|h| h.as_ref())
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid(object_type: ObjectType, name: &str, message: String) -> RecordError {
    RecordError::Validation {
        object_type,
        name: name.to_string(),
        message,
    }
}

/// Checks field kinds and required fields against the schema.
fn validate_fields(schema: &TypeSchema, record: &Record) -> Result<Record, RecordError> {
    let object_type = schema.object_type;
    let mut out = Record::new(record.name.clone());

    for (key, value) in &record.fields {
        let Some(spec) = schema.field(key) else {
            log::warn!(
                "Ignoring unknown field '{}' on {} '{}'",
                key,
                object_type.display_name(),
                record.name
            );
            continue;
        };
        if spec.internal {
            log::warn!(
                "Ignoring internal field '{}' on {} '{}'",
                key,
                object_type.display_name(),
                record.name
            );
            continue;
        }
        if value.is_null() {
            continue;
        }
        check_kind(spec.kind, value).map_err(|expected| {
            invalid(
                object_type,
                &record.name,
                format!(
                    "field '{}' must be {}, got {}",
                    key,
                    expected,
                    value.kind_name()
                ),
            )
        })?;
        out.fields.insert(key.clone(), value.clone());
    }

    if let Some(missing) = schema
        .fields
        .iter()
        .find(|f| f.required && out.get(f.name).is_none())
    {
        return Err(invalid(
            object_type,
            &record.name,
            format!("missing required field '{}'", missing.name),
        ));
    }

    Ok(out)
}

/// Returns the expected kind description when `value` does not match.
fn check_kind(kind: FieldKind, value: &FieldValue) -> Result<(), &'static str> {
    let is_string_list =
        |v: &FieldValue| v.as_list().is_some_and(|items| items.iter().all(|i| i.as_str().is_some()));
    let is_name = |v: &FieldValue| v.as_str().is_some_and(|s| !s.is_empty());

    let ok = match kind {
        FieldKind::String => value.as_str().is_some(),
        FieldKind::Integer => matches!(value, FieldValue::Int(_)),
        FieldKind::Bool => matches!(value, FieldValue::Bool(_)),
        FieldKind::Mapping => matches!(value, FieldValue::Map(_)),
        FieldKind::StringList => is_string_list(value),
        FieldKind::DateTime => value.as_str().and_then(scheduler::parse_datetime).is_some(),
        FieldKind::Reference(_) => is_name(value),
        FieldKind::ReferenceList(_) => value.as_list().is_some_and(|items| items.iter().all(is_name)),
    };

    if ok {
        return Ok(());
    }
    Err(match kind {
        FieldKind::String => "a string",
        FieldKind::Integer => "an integer",
        FieldKind::Bool => "a boolean",
        FieldKind::Mapping => "a mapping",
        FieldKind::StringList => "a list of strings",
        FieldKind::DateTime => "a date/time string",
        FieldKind::Reference(_) => "a non-empty name",
        FieldKind::ReferenceList(_) => "a list of non-empty names",
    })
}

fn carry_internal_fields(schema: &TypeSchema, existing: &Fields, fields: &mut Fields) {
    for spec in schema.fields.iter().filter(|f| f.internal) {
        if let Some(value) = existing.get(spec.name) {
            fields.insert(spec.name.to_string(), value.clone());
        }
    }
}

fn project_public(schema: &TypeSchema, object: &PersistedObject) -> Record {
    let mut record = Record::new(object.name.clone());
    for spec in schema.public_fields() {
        if let Some(value) = object.fields.get(spec.name).filter(|v| !v.is_null()) {
            record.fields.insert(spec.name.to_string(), value.clone());
        }
    }
    record
}
