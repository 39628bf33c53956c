//! Identifiers: type tags, model ids, placeholders and internal entity keys.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Names the schema of a model (e.g. `"person"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeTag(String);

impl TypeTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TypeTag {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

impl From<String> for TypeTag {
    fn from(tag: String) -> Self {
        Self(tag)
    }
}

impl From<&TypeTag> for TypeTag {
    fn from(tag: &TypeTag) -> Self {
        tag.clone()
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A model identifier, unique per (collection, type).
///
/// Negative integers are local ids handed out to models that the server has
/// not seen yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Int(i64),
    Str(String),
}

static NEXT_LOCAL_ID: AtomicI64 = AtomicI64::new(-1);

impl Id {
    /// Generates a fresh local id.
    pub fn local() -> Self {
        Id::Int(NEXT_LOCAL_ID.fetch_sub(1, Ordering::SeqCst))
    }

    /// True for ids generated by [`Id::local`].
    pub fn is_local(&self) -> bool {
        matches!(self, Id::Int(n) if *n < 0)
    }

    /// Reads an id from a JSON number or string.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Id::Int),
            Value::String(s) => Some(Id::Str(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Id::Int(n) => json!(n),
            Id::Str(s) => json!(s),
        }
    }
}

impl From<i64> for Id {
    fn from(n: i64) -> Self {
        Id::Int(n)
    }
}

impl From<i32> for Id {
    fn from(n: i32) -> Self {
        Id::Int(n.into())
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id::Str(s.to_string())
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Id::Str(s)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Int(n) => write!(f, "{}", n),
            Id::Str(s) => f.write_str(s),
        }
    }
}

/// A `{type, id}` pair. Used as a placeholder for references whose target
/// is not (yet) in the collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RefId {
    pub id: Id,
    #[serde(rename = "type")]
    pub type_tag: TypeTag,
}

impl RefId {
    pub fn new(type_tag: impl Into<TypeTag>, id: impl Into<Id>) -> Self {
        Self {
            id: id.into(),
            type_tag: type_tag.into(),
        }
    }

    /// Parses an object holding exactly `id` and `type`.
    pub fn from_json(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        if object.len() != 2 {
            return None;
        }
        let id = Id::from_json(object.get("id")?)?;
        let type_tag = object.get("type")?.as_str()?;
        Some(Self::new(type_tag, id))
    }

    pub fn to_json(&self) -> Value {
        json!({ "id": self.id.to_json(), "type": self.type_tag.as_str() })
    }
}

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.type_tag, self.id)
    }
}

/// Stable internal identity of a model. Survives renames; never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct EntityKey(u64);

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

impl EntityKey {
    pub(crate) fn next() -> Self {
        Self(NEXT_KEY.fetch_add(1, Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_ids_are_negative_and_distinct() {
        let a = Id::local();
        let b = Id::local();
        assert!(a.is_local());
        assert!(b.is_local());
        assert_ne!(a, b);
        assert!(!Id::from(7).is_local());
        assert!(!Id::from("abc").is_local());
    }

    #[test]
    fn ref_id_requires_exactly_type_and_id() {
        let parsed = RefId::from_json(&json!({"id": 1, "type": "pet"}));
        assert_eq!(parsed, Some(RefId::new("pet", 1)));
        assert_eq!(RefId::from_json(&json!({"id": 1, "type": "pet", "name": "x"})), None);
        assert_eq!(RefId::from_json(&json!({"id": 1})), None);
    }

    #[test]
    fn ids_serialize_untagged() {
        assert_eq!(serde_json::to_value(Id::from(3)).unwrap(), json!(3));
        assert_eq!(serde_json::to_value(Id::from("a")).unwrap(), json!("a"));
        let r: RefId = serde_json::from_value(json!({"id": "x", "type": "t"})).unwrap();
        assert_eq!(r, RefId::new("t", "x"));
    }
}
