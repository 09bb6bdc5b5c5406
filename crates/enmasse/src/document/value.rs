//! Typed field values of object records.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// A single field value.
///
/// Scalars keep their declared type through parsing, storage and rendering:
/// a boolean is never turned into the string `"true"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<FieldValue>),
    Map(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    /// Returns the string slice if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// A short name for the value's kind, used in validation messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Bool(_) => "boolean",
            FieldValue::Int(_) => "integer",
            FieldValue::Float(_) => "float",
            FieldValue::String(_) => "string",
            FieldValue::List(_) => "list",
            FieldValue::Map(_) => "mapping",
        }
    }

    /// Deep comparison where list element order does not matter.
    ///
    /// Mappings are already keyed, so only lists need canonicalizing.
    pub fn semantically_eq(&self, other: &FieldValue) -> bool {
        self.canonical_cmp(other) == Ordering::Equal
    }

    fn rank(&self) -> u8 {
        match self {
            FieldValue::Null => 0,
            FieldValue::Bool(_) => 1,
            FieldValue::Int(_) => 2,
            FieldValue::Float(_) => 3,
            FieldValue::String(_) => 4,
            FieldValue::List(_) => 5,
            FieldValue::Map(_) => 6,
        }
    }

    /// Total order over values with lists compared as sorted multisets.
    fn canonical_cmp(&self, other: &FieldValue) -> Ordering {
        match (self, other) {
            (FieldValue::Null, FieldValue::Null) => Ordering::Equal,
            (FieldValue::Bool(a), FieldValue::Bool(b)) => a.cmp(b),
            (FieldValue::Int(a), FieldValue::Int(b)) => a.cmp(b),
            (FieldValue::Float(a), FieldValue::Float(b)) => a.total_cmp(b),
            (FieldValue::String(a), FieldValue::String(b)) => a.cmp(b),
            (FieldValue::List(a), FieldValue::List(b)) => {
                let mut a: Vec<&FieldValue> = a.iter().collect();
                let mut b: Vec<&FieldValue> = b.iter().collect();
                a.sort_by(|x, y| x.canonical_cmp(y));
                b.sort_by(|x, y| x.canonical_cmp(y));
                a.len().cmp(&b.len()).then_with(|| {
                    a.iter()
                        .zip(b.iter())
                        .map(|(x, y)| x.canonical_cmp(y))
                        .find(|o| *o != Ordering::Equal)
                        .unwrap_or(Ordering::Equal)
                })
            }
            (FieldValue::Map(a), FieldValue::Map(b)) => a.len().cmp(&b.len()).then_with(|| {
                a.iter()
                    .zip(b.iter())
                    .map(|((ka, va), (kb, vb))| ka.cmp(kb).then_with(|| va.canonical_cmp(vb)))
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            }),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        self.semantically_eq(other)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::String(s)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Int(i)
    }
}

impl From<f64> for FieldValue {
    fn from(f: f64) -> Self {
        FieldValue::Float(f)
    }
}

impl<T: Into<FieldValue>> From<Vec<T>> for FieldValue {
    fn from(items: Vec<T>) -> Self {
        FieldValue::List(items.into_iter().map(Into::into).collect())
    }
}

/// Conversion from parsed YAML. Non-string mapping keys are rejected.
impl TryFrom<serde_yaml::Value> for FieldValue {
    type Error = String;

    fn try_from(value: serde_yaml::Value) -> Result<Self, Self::Error> {
        use serde_yaml::Value;

        Ok(match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    FieldValue::Int(i)
                } else if let Some(f) = n.as_f64() {
                    FieldValue::Float(f)
                } else {
                    return Err(format!("number out of range: {}", n));
                }
            }
            Value::String(s) => FieldValue::String(s),
            Value::Sequence(items) => FieldValue::List(
                items
                    .into_iter()
                    .map(FieldValue::try_from)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Value::Mapping(mapping) => {
                let mut out = BTreeMap::new();
                for (k, v) in mapping {
                    let key = match k {
                        Value::String(s) => s,
                        other => return Err(format!("mapping keys must be strings, got {:?}", other)),
                    };
                    out.insert(key, FieldValue::try_from(v)?);
                }
                FieldValue::Map(out)
            }
            Value::Tagged(tagged) => {
                return Err(format!("tagged values are not supported: {}", tagged.tag))
            }
        })
    }
}

impl From<&FieldValue> for serde_yaml::Value {
    fn from(value: &FieldValue) -> Self {
        use serde_yaml::Value;

        match value {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Int(i) => Value::Number((*i).into()),
            FieldValue::Float(f) => Value::Number((*f).into()),
            FieldValue::String(s) => Value::String(s.clone()),
            FieldValue::List(items) => Value::Sequence(items.iter().map(Value::from).collect()),
            FieldValue::Map(map) => {
                let mut mapping = serde_yaml::Mapping::new();
                for (k, v) in map {
                    mapping.insert(Value::String(k.clone()), Value::from(v));
                }
                Value::Mapping(mapping)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_order_is_ignored() {
        let a = FieldValue::from(vec!["a", "b", "c"]);
        let b = FieldValue::from(vec!["c", "a", "b"]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_list_multiplicity_matters() {
        let a = FieldValue::from(vec!["a", "a"]);
        let b = FieldValue::from(vec!["a"]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_nested_maps_compare_deeply() {
        let mut left = BTreeMap::new();
        left.insert("x".to_string(), FieldValue::from(vec![1i64, 2]));
        let mut right = BTreeMap::new();
        right.insert("x".to_string(), FieldValue::from(vec![2i64, 1]));
        assert_eq!(FieldValue::Map(left.clone()), FieldValue::Map(right));

        let mut other = BTreeMap::new();
        other.insert("x".to_string(), FieldValue::from(vec![2i64, 3]));
        assert_ne!(FieldValue::Map(left), FieldValue::Map(other));
    }

    #[test]
    fn test_bool_is_not_equal_to_string() {
        assert_ne!(FieldValue::Bool(true), FieldValue::from("true"));
        assert_ne!(FieldValue::Int(1), FieldValue::Float(1.0));
    }

    #[test]
    fn test_yaml_conversion_keeps_scalar_types() {
        let yaml: serde_yaml::Value =
            serde_yaml::from_str("{a: true, b: 5, c: 1.5, d: '5', e: null}").unwrap();
        let value = FieldValue::try_from(yaml).unwrap();
        let FieldValue::Map(map) = value else {
            panic!("expected a mapping");
        };
        assert_eq!(map["a"], FieldValue::Bool(true));
        assert_eq!(map["b"], FieldValue::Int(5));
        assert_eq!(map["c"], FieldValue::Float(1.5));
        assert_eq!(map["d"], FieldValue::from("5"));
        assert!(map["e"].is_null());
    }

    #[test]
    fn test_json_round_trip_keeps_types() {
        let value = FieldValue::from(vec![
            FieldValue::Bool(false),
            FieldValue::Int(3),
            FieldValue::Float(2.5),
            FieldValue::from("x"),
        ]);
        let json = serde_json::to_string(&value).unwrap();
        let back: FieldValue = serde_json::from_str(&json).unwrap();
        let items = back.as_list().unwrap();
        assert_eq!(items[0], FieldValue::Bool(false));
        assert_eq!(items[1], FieldValue::Int(3));
        assert_eq!(items[2], FieldValue::Float(2.5));
        assert_eq!(items[3], FieldValue::from("x"));
    }
}
