//! Parsing raw records and the snapshot `meta` block.

use super::{Id, TypeTag};
use crate::error::GraphError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Non-field metadata of a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub id: Id,
    #[serde(rename = "type")]
    pub type_tag: TypeTag,
    #[serde(rename = "originalId", default, skip_serializing_if = "Option::is_none")]
    pub original_id: Option<Id>,
    /// Fields upgraded to references at runtime, with their target type.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub refs: BTreeMap<String, TypeTag>,
}

impl Meta {
    pub fn to_json(&self) -> Value {
        let mut meta = Map::new();
        meta.insert("id".into(), self.id.to_json());
        meta.insert("type".into(), Value::String(self.type_tag.to_string()));
        if let Some(original) = &self.original_id {
            meta.insert("originalId".into(), original.to_json());
        }
        if !self.refs.is_empty() {
            let refs = self
                .refs
                .iter()
                .map(|(field, tag)| (field.clone(), Value::String(tag.to_string())))
                .collect();
            meta.insert("refs".into(), Value::Object(refs));
        }
        Value::Object(meta)
    }
}

/// A raw record split into identity and fields.
///
/// Accepts the flat form `{id, type, ...fields}` and the snapshot form
/// `{meta: {id, type, originalId, refs}, ...fields}`.
#[derive(Debug, Default)]
pub(crate) struct RawRecord {
    pub id: Option<Id>,
    pub type_tag: Option<TypeTag>,
    pub original_id: Option<Id>,
    pub refs: BTreeMap<String, TypeTag>,
    pub fields: Map<String, Value>,
}

impl RawRecord {
    pub(crate) fn parse(raw: Value) -> Result<Self, GraphError> {
        let Value::Object(mut fields) = raw else {
            return Err(GraphError::InvalidRaw(format!(
                "expected an object, got {}",
                raw
            )));
        };

        let mut record = RawRecord::default();
        match fields.remove("meta") {
            Some(Value::Object(meta)) => {
                record.id = parse_id(meta.get("id"))?;
                record.type_tag = meta.get("type").and_then(Value::as_str).map(TypeTag::from);
                record.original_id = parse_id(meta.get("originalId"))?;
                if let Some(Value::Object(refs)) = meta.get("refs") {
                    record.refs = refs
                        .iter()
                        .filter_map(|(field, tag)| Some((field.clone(), TypeTag::from(tag.as_str()?))))
                        .collect();
                }
            }
            Some(other) => {
                return Err(GraphError::InvalidRaw(format!("`meta` must be an object, got {}", other)))
            }
            None => {}
        }
        if let Some(id) = fields.remove("id") {
            if record.id.is_none() {
                record.id = parse_id(Some(&id))?;
            }
        }
        if matches!(fields.get("type"), Some(Value::String(_))) {
            if let Some(Value::String(tag)) = fields.remove("type") {
                record.type_tag.get_or_insert(TypeTag::from(tag));
            }
        }
        record.fields = fields;
        Ok(record)
    }
}

/// Null or absent ids are `None`; anything but an integer or a string is
/// rejected.
fn parse_id(value: Option<&Value>) -> Result<Option<Id>, GraphError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => Id::from_json(v)
            .map(Some)
            .ok_or_else(|| GraphError::InvalidRaw(format!("invalid id {}", v))),
    }
}
