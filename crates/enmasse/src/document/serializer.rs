//! YAML form of a [`Document`].
//!
//! Rendering is canonical: object types in [`ObjectType`] order, records in
//! the order given, and fields in each type's schema order with `name` first.
//! Repeated exports of unchanged state therefore produce identical bytes.

use std::path::PathBuf;

use serde_yaml::{Mapping, Value};

use super::{Document, FieldValue, Fields, IncludeDirective, Record};
use crate::error::DocumentError;
use crate::schema::ObjectType;

/// Top-level key holding include directives.
pub const INCLUDE_KEY: &str = "include";

/// Options controlling how strictly a document is parsed.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Reject unknown object types instead of skipping them with a warning.
    pub strict_types: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self { strict_types: true }
    }
}

/// Result of parsing a single document.
#[derive(Debug, Clone)]
pub struct Parsed {
    pub document: Document,
    pub diagnostics: Vec<String>,
}

/// Parses a document, rejecting unknown object types.
pub fn parse(bytes: &[u8]) -> Result<Document, DocumentError> {
    parse_with(bytes, &ParseOptions::default()).map(|p| p.document)
}

/// Parses a document with explicit options.
pub fn parse_with(bytes: &[u8], options: &ParseOptions) -> Result<Parsed, DocumentError> {
    let root: Value = serde_yaml::from_slice(bytes)?;
    let mut document = Document::new();
    let mut diagnostics = Vec::new();

    let mapping = match root {
        Value::Null => {
            return Ok(Parsed {
                document,
                diagnostics,
            })
        }
        Value::Mapping(m) => m,
        other => {
            return Err(invalid(format!(
                "top level must be a mapping of object types, got {}",
                value_kind(&other)
            )))
        }
    };

    for (key, value) in mapping {
        let key = match key {
            Value::String(s) => s,
            other => {
                return Err(invalid(format!(
                    "top-level keys must be strings, got {}",
                    value_kind(&other)
                )))
            }
        };

        if key == INCLUDE_KEY {
            document.includes.extend(parse_includes(value)?);
            continue;
        }

        let object_type = match key.parse::<ObjectType>() {
            Ok(t) => t,
            Err(_) if !options.strict_types => {
                let message = format!("Skipping unknown object type '{}'", key);
                log::warn!("{}", message);
                diagnostics.push(message);
                continue;
            }
            Err(_) => {
                return Err(DocumentError::UnknownType {
                    path: PathBuf::new(),
                    key,
                })
            }
        };

        if object_type.is_external() {
            return Err(DocumentError::ExternalType {
                path: PathBuf::new(),
                object_type,
            });
        }

        let items = match value {
            Value::Null => continue,
            Value::Sequence(items) => items,
            other => {
                return Err(invalid(format!(
                    "'{}' must be a list of records, got {}",
                    key,
                    value_kind(&other)
                )))
            }
        };

        for (index, item) in items.into_iter().enumerate() {
            let record = parse_record(object_type, index, item)?;
            document.upsert(object_type, record);
        }
    }

    Ok(Parsed {
        document,
        diagnostics,
    })
}

fn parse_includes(value: Value) -> Result<Vec<IncludeDirective>, DocumentError> {
    let items = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Sequence(items) => items,
        single @ (Value::String(_) | Value::Mapping(_)) => vec![single],
        other => {
            return Err(invalid(format!(
                "'{}' must be a list, got {}",
                INCLUDE_KEY,
                value_kind(&other)
            )))
        }
    };

    items
        .into_iter()
        .map(|item| match item {
            Value::String(path) => Ok(IncludeDirective { path: path.into() }),
            Value::Mapping(m) => match m.get("path") {
                Some(Value::String(path)) => Ok(IncludeDirective {
                    path: path.into(),
                }),
                _ => Err(invalid("include entries need a 'path' string".to_string())),
            },
            other => Err(invalid(format!(
                "include entries must be paths, got {}",
                value_kind(&other)
            ))),
        })
        .collect()
}

fn parse_record(object_type: ObjectType, index: usize, item: Value) -> Result<Record, DocumentError> {
    let mapping = match item {
        Value::Mapping(m) => m,
        other => {
            return Err(invalid(format!(
                "{} #{} must be a mapping, got {}",
                object_type,
                index + 1,
                value_kind(&other)
            )))
        }
    };

    let mut name = None;
    let mut fields = Fields::new();

    for (key, value) in mapping {
        let Value::String(key) = key else {
            return Err(invalid(format!(
                "{} #{} has a non-string field name",
                object_type,
                index + 1
            )));
        };

        if key == "name" {
            match value {
                Value::String(s) if !s.is_empty() => name = Some(s),
                _ => {
                    return Err(invalid(format!(
                        "{} #{}: 'name' must be a non-empty string",
                        object_type,
                        index + 1
                    )))
                }
            }
            continue;
        }

        let value = FieldValue::try_from(value).map_err(|e| {
            invalid(format!(
                "{} #{}: field '{}': {}",
                object_type,
                index + 1,
                key,
                e
            ))
        })?;
        fields.insert(key, value);
    }

    let name = match name {
        Some(n) => n,
        None => object_type
            .schema()
            .name_from
            .and_then(|field| fields.get(field))
            .and_then(FieldValue::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                invalid(format!(
                    "{} #{} is missing 'name'",
                    object_type,
                    index + 1
                ))
            })?,
    };

    Ok(Record { name, fields })
}

/// Renders a document to canonical YAML.
pub fn render(document: &Document) -> Result<Vec<u8>, DocumentError> {
    let mut root = Mapping::new();

    if !document.includes.is_empty() {
        let includes = document
            .includes
            .iter()
            .map(|i| Value::String(i.path.display().to_string()))
            .collect();
        root.insert(Value::String(INCLUDE_KEY.to_string()), Value::Sequence(includes));
    }

    for (object_type, records) in document.sections() {
        let items = records
            .iter()
            .map(|r| Value::Mapping(render_record(object_type, r)))
            .collect();
        root.insert(
            Value::String(object_type.key().to_string()),
            Value::Sequence(items),
        );
    }

    let text = serde_yaml::to_string(&Value::Mapping(root))
        .map_err(|e| DocumentError::SerializeYaml(e.to_string()))?;
    Ok(text.into_bytes())
}

fn render_record(object_type: ObjectType, record: &Record) -> Mapping {
    let mut out = Mapping::new();
    out.insert(
        Value::String("name".to_string()),
        Value::String(record.name.clone()),
    );

    let schema = object_type.schema();
    for spec in schema.fields {
        if let Some(value) = record.fields.get(spec.name) {
            out.insert(Value::String(spec.name.to_string()), Value::from(value));
        }
    }

    // Fields outside the schema go last, alphabetically.
    for (key, value) in &record.fields {
        if schema.field(key).is_none() {
            out.insert(Value::String(key.clone()), Value::from(value));
        }
    }

    out
}

fn invalid(message: String) -> DocumentError {
    DocumentError::InvalidStructure {
        path: PathBuf::new(),
        message,
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "list",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
security:
  - name: sec1
    type: basic_auth
    username: api
    is_active: true
channel_rest:
  - name: chan1
    service: demo.ping
    url_path: /api/ping
    security: sec1
    timeout: 30
"#;

    #[test]
    fn test_parse_sample() {
        let doc = parse(SAMPLE.as_bytes()).unwrap();
        assert_eq!(
            doc.types(),
            vec![ObjectType::Security, ObjectType::ChannelRest]
        );
        let chan = doc.find(ObjectType::ChannelRest, "chan1").unwrap();
        assert_eq!(chan.get_str("security"), Some("sec1"));
        assert_eq!(chan.get("timeout"), Some(&FieldValue::Int(30)));
        let sec = doc.find(ObjectType::Security, "sec1").unwrap();
        assert_eq!(sec.get("is_active"), Some(&FieldValue::Bool(true)));
    }

    #[test]
    fn test_parse_empty_document() {
        let doc = parse(b"").unwrap();
        assert!(doc.is_empty());
    }

    #[test]
    fn test_parse_unknown_type_strict() {
        let result = parse(b"channel_soap:\n  - name: x\n");
        assert!(matches!(result, Err(DocumentError::UnknownType { key, .. }) if key == "channel_soap"));
    }

    #[test]
    fn test_parse_unknown_type_lenient() {
        let options = ParseOptions {
            strict_types: false,
        };
        let parsed = parse_with(b"channel_soap:\n  - name: x\ncache:\n  - name: c\n", &options)
            .unwrap();
        assert_eq!(parsed.document.len(), 1);
        assert_eq!(parsed.diagnostics.len(), 1);
    }

    #[test]
    fn test_parse_rejects_service_declarations() {
        let result = parse(b"service:\n  - name: demo.ping\n");
        assert!(matches!(result, Err(DocumentError::ExternalType { .. })));
    }

    #[test]
    fn test_parse_missing_name() {
        let result = parse(b"security:\n  - type: basic_auth\n");
        assert!(matches!(result, Err(DocumentError::InvalidStructure { .. })));
    }

    #[test]
    fn test_subscription_name_defaults_to_security() {
        let doc = parse(
            b"pubsub_subscription:\n  - security: client1\n    delivery_type: pull\n",
        )
        .unwrap();
        assert!(doc.find(ObjectType::PubsubSubscription, "client1").is_some());
    }

    #[test]
    fn test_parse_includes() {
        let doc = parse(b"include:\n  - base.yaml\n  - path: extra/more.yaml\n").unwrap();
        assert_eq!(
            doc.includes,
            vec![
                IncludeDirective {
                    path: "base.yaml".into()
                },
                IncludeDirective {
                    path: "extra/more.yaml".into()
                }
            ]
        );
    }

    #[test]
    fn test_render_uses_schema_field_order() {
        let doc = Document::new().with_record(
            ObjectType::ChannelRest,
            Record::new("chan1")
                .with("timeout", 30i64)
                .with("url_path", "/api")
                .with("service", "demo.ping"),
        );
        let text = String::from_utf8(render(&doc).unwrap()).unwrap();
        let name = text.find("name:").unwrap();
        let service = text.find("service:").unwrap();
        let url = text.find("url_path:").unwrap();
        let timeout = text.find("timeout:").unwrap();
        assert!(name < service && service < url && url < timeout);
    }

    #[test]
    fn test_render_orders_types_canonically() {
        let doc = Document::new()
            .with_record(ObjectType::Scheduler, Record::new("job"))
            .with_record(ObjectType::Security, Record::new("sec"));
        let text = String::from_utf8(render(&doc).unwrap()).unwrap();
        assert!(text.find("security:").unwrap() < text.find("scheduler:").unwrap());
    }

    #[test]
    fn test_render_then_parse_preserves_types() {
        let doc = Document::new().with_record(
            ObjectType::Cache,
            Record::new("c1")
                .with("is_default", true)
                .with("max_size", 1000i64)
                .with("extra", "true"),
        );
        let back = parse_with(
            &render(&doc).unwrap(),
            &ParseOptions::default(),
        )
        .unwrap()
        .document;
        assert_eq!(back, doc);
        let c1 = back.find(ObjectType::Cache, "c1").unwrap();
        assert_eq!(c1.get("extra"), Some(&FieldValue::from("true")));
    }
}
