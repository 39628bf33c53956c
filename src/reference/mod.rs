//! # Reference Buckets
//!
//! A [`Bucket`] stores the content of one reference field. Items are either
//! resolved (an [`EntityKey`] looked up in the owning collection, never an
//! owned model) or pending placeholders. Resolution is lazy: pending items
//! are looked up again on every read, and resolved items whose target left
//! the collection degrade to their `{type, id}` placeholder.

use crate::collection::Collection;
use crate::error::GraphError;
use crate::model::{EntityKey, Link, LinkValue, RefId, RefInput, TypeTag};
use crate::schema::Arity;
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Slot {
    Resolved { key: EntityKey, last: RefId },
    Pending(RefId),
}

impl Slot {
    /// Current `{type, id}` of the target.
    pub(crate) fn ref_id(&self, collection: Option<&Collection>) -> RefId {
        match self {
            Slot::Resolved { key, last } => collection
                .and_then(|c| c.ref_of_key(*key))
                .unwrap_or_else(|| last.clone()),
            Slot::Pending(r) => r.clone(),
        }
    }

    fn read(&self, collection: Option<&Collection>) -> Link {
        let Some(collection) = collection else {
            return Link::Placeholder(self.ref_id(None));
        };
        if let Slot::Resolved { key, .. } = self {
            if let Some(model) = collection.model_by_key(*key) {
                return Link::Model(model);
            }
        }
        let r = self.ref_id(Some(collection));
        match collection.find(&r) {
            Some(model) => Link::Model(model),
            None => Link::Placeholder(r),
        }
    }

    /// Forgets the resolved key, keeping the current placeholder.
    fn unresolve(&self, collection: Option<&Collection>) -> Slot {
        Slot::Pending(self.ref_id(collection))
    }

    fn reresolve(&self, collection: &Collection) -> Slot {
        let r = self.ref_id(None);
        match collection.key_of(&r) {
            Some(key) => Slot::Resolved { key, last: r },
            None => Slot::Pending(r),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Shape {
    Empty,
    One(Slot),
    Many(Vec<Slot>),
}

/// Storage of one forward reference field.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Bucket {
    arity: Arity,
    shape: Shape,
}

impl Bucket {
    pub(crate) fn new(arity: Arity) -> Self {
        let shape = match arity {
            Arity::Many => Shape::Many(Vec::new()),
            Arity::One | Arity::OneOrMany => Shape::Empty,
        };
        Self { arity, shape }
    }

    /// Replaces the content, enforcing the arity. Returns whether anything
    /// changed.
    pub(crate) fn replace(
        &mut self,
        field: &str,
        slots: Vec<Slot>,
        as_list: bool,
    ) -> Result<bool, GraphError> {
        let shape = match self.arity {
            Arity::One => match slots.len() {
                0 => Shape::Empty,
                1 => Shape::One(first(slots)),
                count => {
                    return Err(GraphError::ArityMismatch {
                        field: field.to_string(),
                        count,
                    })
                }
            },
            Arity::Many => Shape::Many(slots),
            Arity::OneOrMany if as_list => Shape::Many(slots),
            Arity::OneOrMany => match slots.len() {
                0 => Shape::Empty,
                _ => Shape::One(first(slots)),
            },
        };
        let changed = self.shape != shape;
        self.shape = shape;
        Ok(changed)
    }

    pub(crate) fn slots(&self) -> Vec<Slot> {
        match &self.shape {
            Shape::Empty => Vec::new(),
            Shape::One(slot) => vec![slot.clone()],
            Shape::Many(slots) => slots.clone(),
        }
    }

    /// Live view of the references.
    pub(crate) fn read(&self, collection: Option<&Collection>) -> LinkValue {
        match &self.shape {
            Shape::Empty => LinkValue::Empty,
            Shape::One(slot) => LinkValue::One(slot.read(collection)),
            Shape::Many(slots) => {
                LinkValue::Many(slots.iter().map(|s| s.read(collection)).collect())
            }
        }
    }

    /// Data-only view: `{id, type}`, a list of those, or null.
    pub(crate) fn snapshot(&self, collection: Option<&Collection>) -> Value {
        match &self.shape {
            Shape::Empty => Value::Null,
            Shape::One(slot) => slot.ref_id(collection).to_json(),
            Shape::Many(slots) => Value::Array(
                slots
                    .iter()
                    .map(|s| s.ref_id(collection).to_json())
                    .collect(),
            ),
        }
    }

    pub(crate) fn targets(&self, collection: Option<&Collection>) -> Vec<RefId> {
        self.slots().iter().map(|s| s.ref_id(collection)).collect()
    }

    /// Drops every resolved key; used when the owner leaves its collection.
    pub(crate) fn unresolve(&mut self, collection: Option<&Collection>) {
        self.map_slots(|s| s.unresolve(collection));
    }

    /// Re-targets lookups at a new collection.
    pub(crate) fn reresolve(&mut self, collection: &Collection) {
        self.map_slots(|s| s.reresolve(collection));
    }

    /// Updates the last known id of slots resolved to `target`.
    pub(crate) fn retarget(&mut self, target: EntityKey, r: &RefId) {
        self.map_slots(|s| match s {
            Slot::Resolved { key, .. } if *key == target => Slot::Resolved {
                key: *key,
                last: r.clone(),
            },
            other => other.clone(),
        });
    }

    fn map_slots(&mut self, f: impl Fn(&Slot) -> Slot) {
        self.shape = match &self.shape {
            Shape::Empty => Shape::Empty,
            Shape::One(slot) => Shape::One(f(slot)),
            Shape::Many(slots) => Shape::Many(slots.iter().map(f).collect()),
        };
    }
}

fn first(slots: Vec<Slot>) -> Slot {
    let mut slots = slots;
    slots.swap_remove(0)
}

/// Resolves one incoming item against the owner's collection.
///
/// `target` is the declared or computed type for items that don't carry
/// their own.
pub(crate) fn resolve_item(
    item: RefInput,
    target: TypeTag,
    collection: Option<&Collection>,
) -> Result<Option<Slot>, GraphError> {
    let slot = match item {
        RefInput::Null => return Ok(None),
        RefInput::Model(model) => {
            let r = model.ref_id();
            match collection {
                Some(c) if c.contains(&model) => Slot::Resolved {
                    key: model.key(),
                    last: r,
                },
                _ => Slot::Pending(r),
            }
        }
        RefInput::Ref(r) => lookup(r, collection),
        RefInput::Id(id) => lookup(RefId::new(target, id), collection),
        RefInput::Raw(raw) => match collection {
            Some(c) => {
                let model = c.upsert(raw, target)?;
                debug!(target = %model.ref_id(), "Resolved inline record");
                Slot::Resolved {
                    key: model.key(),
                    last: model.ref_id(),
                }
            }
            None => {
                let id = raw
                    .get("id")
                    .and_then(crate::model::Id::from_json)
                    .ok_or_else(|| {
                        GraphError::InvalidRaw("inline record without id needs a collection".into())
                    })?;
                Slot::Pending(RefId::new(target, id))
            }
        },
    };
    Ok(Some(slot))
}

fn lookup(r: RefId, collection: Option<&Collection>) -> Slot {
    match collection.and_then(|c| c.key_of(&r)) {
        Some(key) => Slot::Resolved { key, last: r },
        None => Slot::Pending(r),
    }
}
