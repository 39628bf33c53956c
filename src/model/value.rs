//! Values going into and coming out of model fields.

use super::{Id, Model, RefId, TypeTag};
use serde_json::Value;

/// One raw reference item, before resolution.
#[derive(Debug, Clone)]
pub enum RefInput {
    Null,
    Id(Id),
    Ref(RefId),
    /// Inline record, added to the collection on resolution.
    Raw(Value),
    Model(Model),
}

impl RefInput {
    /// Classifies a raw JSON item.
    pub fn from_json(value: Value) -> Self {
        if value.is_null() {
            return RefInput::Null;
        }
        if let Some(r) = RefId::from_json(&value) {
            return RefInput::Ref(r);
        }
        if value.is_object() {
            return RefInput::Raw(value);
        }
        match Id::from_json(&value) {
            Some(id) => RefInput::Id(id),
            None => RefInput::Raw(value),
        }
    }

    /// The type the item names on its own, if any.
    pub(crate) fn own_type(&self) -> Option<TypeTag> {
        match self {
            RefInput::Ref(r) => Some(r.type_tag.clone()),
            RefInput::Model(m) => Some(m.type_tag()),
            RefInput::Raw(v) => v.get("type").and_then(Value::as_str).map(TypeTag::from),
            RefInput::Null | RefInput::Id(_) => None,
        }
    }

    /// JSON view handed to computed target types.
    pub(crate) fn to_json(&self) -> Value {
        match self {
            RefInput::Null => Value::Null,
            RefInput::Id(id) => id.to_json(),
            RefInput::Ref(r) => r.to_json(),
            RefInput::Raw(v) => v.clone(),
            RefInput::Model(m) => m.ref_id().to_json(),
        }
    }

    fn is_entity(&self) -> bool {
        matches!(self, RefInput::Ref(_) | RefInput::Model(_))
    }
}

impl From<Model> for RefInput {
    fn from(model: Model) -> Self {
        RefInput::Model(model)
    }
}

impl From<&Link> for RefInput {
    fn from(link: &Link) -> Self {
        match link {
            Link::Model(m) => RefInput::Model(m.clone()),
            Link::Placeholder(r) => RefInput::Ref(r.clone()),
        }
    }
}

/// A value assigned through [`Model::assign`].
#[derive(Debug, Clone)]
pub enum FieldValue {
    /// Raw JSON. Reference fields parse it into reference items.
    Plain(Value),
    One(RefInput),
    Many(Vec<RefInput>),
}

impl FieldValue {
    /// True when the value holds models or placeholders.
    pub(crate) fn is_entity_shaped(&self) -> bool {
        match self {
            FieldValue::Plain(_) => false,
            FieldValue::One(item) => item.is_entity(),
            FieldValue::Many(items) => items.iter().any(RefInput::is_entity),
        }
    }

    /// Converts back to plain JSON; fails on models and placeholders.
    pub(crate) fn into_plain(self) -> Option<Value> {
        match self {
            FieldValue::Plain(v) => Some(v),
            FieldValue::One(item) => plain_item(item),
            FieldValue::Many(items) => items
                .into_iter()
                .map(plain_item)
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
        }
    }

    /// Splits into reference items, remembering whether a list was given.
    pub(crate) fn into_items(self) -> (Vec<RefInput>, bool) {
        match self {
            FieldValue::Plain(Value::Null) => (Vec::new(), false),
            FieldValue::Plain(Value::Array(items)) => {
                (items.into_iter().map(RefInput::from_json).collect(), true)
            }
            FieldValue::Plain(v) => (vec![RefInput::from_json(v)], false),
            FieldValue::One(RefInput::Null) => (Vec::new(), false),
            FieldValue::One(item) => (vec![item], false),
            FieldValue::Many(items) => (items, true),
        }
    }
}

fn plain_item(item: RefInput) -> Option<Value> {
    match item {
        RefInput::Null => Some(Value::Null),
        RefInput::Id(id) => Some(id.to_json()),
        RefInput::Raw(v) => Some(v),
        RefInput::Ref(_) | RefInput::Model(_) => None,
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::Plain(value)
    }
}

impl From<Model> for FieldValue {
    fn from(model: Model) -> Self {
        FieldValue::One(RefInput::Model(model))
    }
}

impl From<&Model> for FieldValue {
    fn from(model: &Model) -> Self {
        FieldValue::One(RefInput::Model(model.clone()))
    }
}

impl From<Option<Model>> for FieldValue {
    fn from(model: Option<Model>) -> Self {
        match model {
            Some(m) => m.into(),
            None => FieldValue::One(RefInput::Null),
        }
    }
}

impl From<Vec<Model>> for FieldValue {
    fn from(models: Vec<Model>) -> Self {
        FieldValue::Many(models.into_iter().map(RefInput::Model).collect())
    }
}

impl From<RefId> for FieldValue {
    fn from(r: RefId) -> Self {
        FieldValue::One(RefInput::Ref(r))
    }
}

impl From<Vec<Link>> for FieldValue {
    fn from(links: Vec<Link>) -> Self {
        FieldValue::Many(links.iter().map(RefInput::from).collect())
    }
}

/// A reference as read back: the live model, or a placeholder when the
/// target isn't in the collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Link {
    Model(Model),
    Placeholder(RefId),
}

impl Link {
    pub fn model(&self) -> Option<&Model> {
        match self {
            Link::Model(m) => Some(m),
            Link::Placeholder(_) => None,
        }
    }

    pub fn into_model(self) -> Option<Model> {
        match self {
            Link::Model(m) => Some(m),
            Link::Placeholder(_) => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Link::Placeholder(_))
    }

    pub fn ref_id(&self) -> RefId {
        match self {
            Link::Model(m) => m.ref_id(),
            Link::Placeholder(r) => r.clone(),
        }
    }
}

/// The full content of a reference field.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkValue {
    Empty,
    One(Link),
    Many(Vec<Link>),
}

impl LinkValue {
    pub fn into_vec(self) -> Vec<Link> {
        match self {
            LinkValue::Empty => Vec::new(),
            LinkValue::One(link) => vec![link],
            LinkValue::Many(links) => links,
        }
    }

    pub fn first(self) -> Option<Link> {
        self.into_vec().into_iter().next()
    }

    pub fn is_many(&self) -> bool {
        matches!(self, LinkValue::Many(_))
    }
}
