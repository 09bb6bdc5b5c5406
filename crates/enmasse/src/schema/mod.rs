//! Closed enumeration of managed object types and their field schemas.
//!
//! Every type a document may declare is listed in [`ObjectType`]. Each type
//! carries a fixed field list describing scalar kinds, references to other
//! types, and internal-only bookkeeping fields that are never compared or
//! exported.

pub mod handler;
pub mod scheduler;

use serde::{Deserialize, Serialize};

pub use handler::{HandlerRegistry, ObjectHandler};

/// A managed object type.
///
/// Variant order is the canonical order used for rendering documents and as
/// the tie-break priority when ordering types for a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Security,
    Groups,
    Cache,
    OutgoingRest,
    Sql,
    Odoo,
    EmailSmtp,
    EmailImap,
    Ldap,
    Confluence,
    Jira,
    #[serde(rename = "microsoft_365")]
    Microsoft365,
    ElasticSearch,
    ChannelRest,
    Scheduler,
    PubsubTopic,
    PubsubPermission,
    PubsubSubscription,
    Service,
}

impl ObjectType {
    /// Returns all object types in canonical order.
    pub fn all() -> &'static [ObjectType] {
        &[
            ObjectType::Security,
            ObjectType::Groups,
            ObjectType::Cache,
            ObjectType::OutgoingRest,
            ObjectType::Sql,
            ObjectType::Odoo,
            ObjectType::EmailSmtp,
            ObjectType::EmailImap,
            ObjectType::Ldap,
            ObjectType::Confluence,
            ObjectType::Jira,
            ObjectType::Microsoft365,
            ObjectType::ElasticSearch,
            ObjectType::ChannelRest,
            ObjectType::Scheduler,
            ObjectType::PubsubTopic,
            ObjectType::PubsubPermission,
            ObjectType::PubsubSubscription,
            ObjectType::Service,
        ]
    }

    /// Returns the types a document may declare, in canonical order.
    pub fn declarable() -> impl Iterator<Item = ObjectType> {
        Self::all().iter().copied().filter(|t| !t.is_external())
    }

    /// The key used for this type in documents and in the store.
    pub fn key(&self) -> &'static str {
        match self {
            ObjectType::Security => "security",
            ObjectType::Groups => "groups",
            ObjectType::Cache => "cache",
            ObjectType::OutgoingRest => "outgoing_rest",
            ObjectType::Sql => "sql",
            ObjectType::Odoo => "odoo",
            ObjectType::EmailSmtp => "email_smtp",
            ObjectType::EmailImap => "email_imap",
            ObjectType::Ldap => "ldap",
            ObjectType::Confluence => "confluence",
            ObjectType::Jira => "jira",
            ObjectType::Microsoft365 => "microsoft_365",
            ObjectType::ElasticSearch => "elastic_search",
            ObjectType::ChannelRest => "channel_rest",
            ObjectType::Scheduler => "scheduler",
            ObjectType::PubsubTopic => "pubsub_topic",
            ObjectType::PubsubPermission => "pubsub_permission",
            ObjectType::PubsubSubscription => "pubsub_subscription",
            ObjectType::Service => "service",
        }
    }

    /// Human-readable name used in log messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            ObjectType::Security => "security definition",
            ObjectType::Groups => "security group",
            ObjectType::Cache => "cache",
            ObjectType::OutgoingRest => "outgoing REST connection",
            ObjectType::Sql => "SQL connection",
            ObjectType::Odoo => "Odoo connection",
            ObjectType::EmailSmtp => "SMTP connection",
            ObjectType::EmailImap => "IMAP connection",
            ObjectType::Ldap => "LDAP connection",
            ObjectType::Confluence => "Confluence connection",
            ObjectType::Jira => "Jira connection",
            ObjectType::Microsoft365 => "Microsoft 365 connection",
            ObjectType::ElasticSearch => "ElasticSearch connection",
            ObjectType::ChannelRest => "REST channel",
            ObjectType::Scheduler => "scheduler job",
            ObjectType::PubsubTopic => "pub/sub topic",
            ObjectType::PubsubPermission => "pub/sub permission",
            ObjectType::PubsubSubscription => "pub/sub subscription",
            ObjectType::Service => "service",
        }
    }

    /// External types are registered by the running server, never declared
    /// in a document and never exported.
    pub fn is_external(&self) -> bool {
        matches!(self, ObjectType::Service)
    }

    /// Returns the field schema for this type.
    pub fn schema(&self) -> &'static TypeSchema {
        schema_for(*self)
    }

    /// Returns the distinct types this type may reference, excluding itself.
    pub fn referenced_types(&self) -> Vec<ObjectType> {
        let mut out = Vec::new();
        for field in self.schema().fields {
            if let Some(target) = field.kind.reference_target() {
                if target != *self && !out.contains(&target) {
                    out.push(target);
                }
            }
        }
        out
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

impl std::str::FromStr for ObjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ObjectType::all()
            .iter()
            .copied()
            .find(|t| t.key() == s)
            .ok_or_else(|| format!("Unknown object type: {}", s))
    }
}

/// The kind of value a field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Integer,
    Bool,
    /// Free-form nested mapping.
    Mapping,
    StringList,
    /// Date/time given as an RFC 3339 or `YYYY-MM-DD HH:MM:SS` string.
    DateTime,
    /// The name of an object of the given type.
    Reference(ObjectType),
    /// A list of names of objects of the given type.
    ReferenceList(ObjectType),
}

impl FieldKind {
    /// Returns the referenced type if this is a reference field.
    pub fn reference_target(&self) -> Option<ObjectType> {
        match self {
            FieldKind::Reference(t) | FieldKind::ReferenceList(t) => Some(*t),
            _ => None,
        }
    }
}

/// Declaration of a single field.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    /// Computed by the handler and stored, but never compared or exported.
    pub internal: bool,
}

const fn field(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required: false,
        internal: false,
    }
}

const fn required(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required: true,
        internal: false,
    }
}

const fn internal(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required: false,
        internal: true,
    }
}

/// Field list for one object type. `name` is implicit and always first.
#[derive(Debug)]
pub struct TypeSchema {
    pub object_type: ObjectType,
    /// Field whose value stands in for `name` when a record omits it.
    pub name_from: Option<&'static str>,
    /// Fields in the order a human author would write them.
    pub fields: &'static [FieldSpec],
}

impl TypeSchema {
    /// Looks up a field by name.
    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields that take part in comparison and export.
    pub fn public_fields(&self) -> impl Iterator<Item = &'static FieldSpec> {
        self.fields.iter().filter(|f| !f.internal)
    }

    /// Reference fields of this type.
    pub fn reference_fields(&self) -> impl Iterator<Item = &'static FieldSpec> {
        self.fields
            .iter()
            .filter(|f| f.kind.reference_target().is_some())
    }
}

use FieldKind::{Bool, DateTime, Integer, Mapping, Reference, ReferenceList, StringList};

const STR: FieldKind = FieldKind::String;

static SECURITY: TypeSchema = TypeSchema {
    object_type: ObjectType::Security,
    name_from: None,
    fields: &[
        required("type", STR),
        field("username", STR),
        field("password", STR),
        field("realm", STR),
        field("header", STR),
        field("auth_server_url", STR),
        field("scopes", StringList),
        field("client_id_field", STR),
        field("client_secret_field", STR),
        field("grant_type", STR),
        field("extra_fields", Mapping),
        field("is_active", Bool),
    ],
};

static GROUPS: TypeSchema = TypeSchema {
    object_type: ObjectType::Groups,
    name_from: None,
    fields: &[field("members", ReferenceList(ObjectType::Security))],
};

static CACHE: TypeSchema = TypeSchema {
    object_type: ObjectType::Cache,
    name_from: None,
    fields: &[
        field("is_default", Bool),
        field("max_size", Integer),
        field("max_item_size", Integer),
        field("extend_expiry_on_get", Bool),
        field("extend_expiry_on_set", Bool),
    ],
};

static OUTGOING_REST: TypeSchema = TypeSchema {
    object_type: ObjectType::OutgoingRest,
    name_from: None,
    fields: &[
        required("host", STR),
        required("url_path", STR),
        field("security", Reference(ObjectType::Security)),
        field("data_format", STR),
        field("timeout", Integer),
        field("ping_method", STR),
        field("pool_size", Integer),
        field("tls_verify", Bool),
        field("is_active", Bool),
    ],
};

static SQL: TypeSchema = TypeSchema {
    object_type: ObjectType::Sql,
    name_from: None,
    fields: &[
        required("type", STR),
        required("host", STR),
        field("port", Integer),
        required("db_name", STR),
        field("username", STR),
        field("password", STR),
        field("pool_size", Integer),
        field("extra", STR),
        field("is_active", Bool),
    ],
};

static ODOO: TypeSchema = TypeSchema {
    object_type: ObjectType::Odoo,
    name_from: None,
    fields: &[
        required("host", STR),
        field("port", Integer),
        field("protocol", STR),
        required("user", STR),
        field("password", STR),
        required("database", STR),
        field("pool_size", Integer),
        field("is_active", Bool),
    ],
};

static EMAIL_SMTP: TypeSchema = TypeSchema {
    object_type: ObjectType::EmailSmtp,
    name_from: None,
    fields: &[
        required("host", STR),
        field("port", Integer),
        field("username", STR),
        field("password", STR),
        field("mode", STR),
        field("timeout", Integer),
        field("ping_address", STR),
        field("is_debug", Bool),
        field("is_active", Bool),
    ],
};

static EMAIL_IMAP: TypeSchema = TypeSchema {
    object_type: ObjectType::EmailImap,
    name_from: None,
    fields: &[
        required("host", STR),
        field("port", Integer),
        field("username", STR),
        field("password", STR),
        field("mode", STR),
        field("timeout", Integer),
        field("get_criteria", STR),
        field("debug_level", Integer),
        field("is_active", Bool),
    ],
};

static LDAP: TypeSchema = TypeSchema {
    object_type: ObjectType::Ldap,
    name_from: None,
    fields: &[
        required("server_list", StringList),
        field("username", STR),
        field("password", STR),
        field("auth_type", STR),
        field("use_tls", Bool),
        field("pool_size", Integer),
        field("connect_timeout", Integer),
        field("is_active", Bool),
    ],
};

static CONFLUENCE: TypeSchema = TypeSchema {
    object_type: ObjectType::Confluence,
    name_from: None,
    fields: &[
        required("address", STR),
        field("username", STR),
        field("password", STR),
        field("is_cloud", Bool),
        field("is_active", Bool),
    ],
};

static JIRA: TypeSchema = TypeSchema {
    object_type: ObjectType::Jira,
    name_from: None,
    fields: &[
        required("address", STR),
        field("username", STR),
        field("password", STR),
        field("is_cloud", Bool),
        field("api_version", STR),
        field("is_active", Bool),
    ],
};

static MICROSOFT_365: TypeSchema = TypeSchema {
    object_type: ObjectType::Microsoft365,
    name_from: None,
    fields: &[
        required("client_id", STR),
        required("tenant_id", STR),
        field("secret_value", STR),
        field("scopes", StringList),
        field("is_active", Bool),
    ],
};

static ELASTIC_SEARCH: TypeSchema = TypeSchema {
    object_type: ObjectType::ElasticSearch,
    name_from: None,
    fields: &[
        required("hosts", StringList),
        field("timeout", Integer),
        field("body_as", STR),
        field("is_active", Bool),
    ],
};

static CHANNEL_REST: TypeSchema = TypeSchema {
    object_type: ObjectType::ChannelRest,
    name_from: None,
    fields: &[
        field("service", Reference(ObjectType::Service)),
        field("url_path", STR),
        field("method", STR),
        field("data_format", STR),
        field("security", Reference(ObjectType::Security)),
        field("groups", ReferenceList(ObjectType::Groups)),
        field("cache", Reference(ObjectType::Cache)),
        field("cache_expiry", Integer),
        field("timeout", Integer),
        field("merge_url_params_req", Bool),
        field("is_active", Bool),
    ],
};

static SCHEDULER: TypeSchema = TypeSchema {
    object_type: ObjectType::Scheduler,
    name_from: None,
    fields: &[
        required("service", Reference(ObjectType::Service)),
        required("job_type", STR),
        required("start_date", DateTime),
        field("weeks", Integer),
        field("days", Integer),
        field("hours", Integer),
        field("minutes", Integer),
        field("seconds", Integer),
        field("repeats", Integer),
        field("extra", STR),
        field("is_active", Bool),
        internal("next_run", STR),
    ],
};

static PUBSUB_TOPIC: TypeSchema = TypeSchema {
    object_type: ObjectType::PubsubTopic,
    name_from: None,
    fields: &[field("description", STR), field("is_active", Bool)],
};

static PUBSUB_PERMISSION: TypeSchema = TypeSchema {
    object_type: ObjectType::PubsubPermission,
    name_from: None,
    fields: &[
        required("security", Reference(ObjectType::Security)),
        field("pub", StringList),
        field("sub", StringList),
        field("is_active", Bool),
    ],
};

static PUBSUB_SUBSCRIPTION: TypeSchema = TypeSchema {
    object_type: ObjectType::PubsubSubscription,
    name_from: Some("security"),
    fields: &[
        required("security", Reference(ObjectType::Security)),
        required("delivery_type", STR),
        field("topic_list", ReferenceList(ObjectType::PubsubTopic)),
        field("push_rest_endpoint", Reference(ObjectType::OutgoingRest)),
        field("push_service", Reference(ObjectType::Service)),
        field("is_delivery_active", Bool),
        internal("sub_key", STR),
    ],
};

static SERVICE: TypeSchema = TypeSchema {
    object_type: ObjectType::Service,
    name_from: None,
    fields: &[field("impl_name", STR), field("is_active", Bool)],
};

fn schema_for(object_type: ObjectType) -> &'static TypeSchema {
    match object_type {
        ObjectType::Security => &SECURITY,
        ObjectType::Groups => &GROUPS,
        ObjectType::Cache => &CACHE,
        ObjectType::OutgoingRest => &OUTGOING_REST,
        ObjectType::Sql => &SQL,
        ObjectType::Odoo => &ODOO,
        ObjectType::EmailSmtp => &EMAIL_SMTP,
        ObjectType::EmailImap => &EMAIL_IMAP,
        ObjectType::Ldap => &LDAP,
        ObjectType::Confluence => &CONFLUENCE,
        ObjectType::Jira => &JIRA,
        ObjectType::Microsoft365 => &MICROSOFT_365,
        ObjectType::ElasticSearch => &ELASTIC_SEARCH,
        ObjectType::ChannelRest => &CHANNEL_REST,
        ObjectType::Scheduler => &SCHEDULER,
        ObjectType::PubsubTopic => &PUBSUB_TOPIC,
        ObjectType::PubsubPermission => &PUBSUB_PERMISSION,
        ObjectType::PubsubSubscription => &PUBSUB_SUBSCRIPTION,
        ObjectType::Service => &SERVICE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_type_round_trips_through_key() {
        for t in ObjectType::all() {
            assert_eq!(t.key().parse::<ObjectType>().unwrap(), *t);
        }
    }

    #[test]
    fn test_serde_names_match_keys() {
        for t in ObjectType::all() {
            let json = serde_json::to_string(t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.key()));
        }
    }

    #[test]
    fn test_unknown_type_key() {
        assert!("channel_soap".parse::<ObjectType>().is_err());
    }

    #[test]
    fn test_canonical_order_matches_all() {
        let mut sorted = ObjectType::all().to_vec();
        sorted.sort();
        assert_eq!(sorted, ObjectType::all());
    }

    #[test]
    fn test_service_is_not_declarable() {
        assert!(ObjectType::declarable().all(|t| t != ObjectType::Service));
        assert_eq!(ObjectType::declarable().count(), ObjectType::all().len() - 1);
    }

    #[test]
    fn test_channel_references() {
        let refs = ObjectType::ChannelRest.referenced_types();
        assert_eq!(
            refs,
            vec![
                ObjectType::Service,
                ObjectType::Security,
                ObjectType::Groups,
                ObjectType::Cache
            ]
        );
    }

    #[test]
    fn test_schema_objects_match_their_type() {
        for t in ObjectType::all() {
            assert_eq!(t.schema().object_type, *t);
            assert!(t.schema().field("name").is_none());
        }
    }

    #[test]
    fn test_internal_fields_are_not_public() {
        let schema = ObjectType::Scheduler.schema();
        assert!(schema.field("next_run").is_some());
        assert!(schema.public_fields().all(|f| f.name != "next_run"));
    }
}
