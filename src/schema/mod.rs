//! # Field Schema
//!
//! A [`Schema`] is the per-type table of field definitions consumed by
//! models and reference buckets. How a schema gets declared is up to the
//! caller; the core only reads the resulting table.
//!
//! ```rust
//! use resource_graph::schema::{FieldDef, Schema};
//!
//! let person = Schema::new("person")
//!     .field("name", FieldDef::plain())
//!     .field("age", FieldDef::plain_with_default(serde_json::json!(0)))
//!     .field("pets", FieldDef::to_many("pet"));
//!
//! assert!(person.get("pets").unwrap().is_reference());
//! ```

use crate::collection::Collection;
use crate::model::{Model, TypeTag};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// How many targets a reference field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    One,
    Many,
    /// Keeps whichever shape was assigned last.
    OneOrMany,
}

/// Inputs available to a computed target type.
pub struct TargetContext<'a> {
    /// The raw item being resolved.
    pub value: &'a Value,
    pub owner: &'a Model,
    pub key: &'a str,
    pub collection: Option<&'a Collection>,
}

pub type TargetFn = Arc<dyn Fn(&TargetContext<'_>) -> TypeTag + Send + Sync>;

/// The type a reference points at.
#[derive(Clone)]
pub enum TargetType {
    Static(TypeTag),
    Dynamic(TargetFn),
}

impl TargetType {
    pub fn resolve(&self, ctx: &TargetContext<'_>) -> TypeTag {
        match self {
            TargetType::Static(tag) => tag.clone(),
            TargetType::Dynamic(f) => f(ctx),
        }
    }

    pub fn as_static(&self) -> Option<&TypeTag> {
        match self {
            TargetType::Static(tag) => Some(tag),
            TargetType::Dynamic(_) => None,
        }
    }
}

impl fmt::Debug for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetType::Static(tag) => f.debug_tuple("Static").field(tag).finish(),
            TargetType::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Definition of a reference field.
#[derive(Debug, Clone)]
pub struct RefDef {
    pub arity: Arity,
    pub target: TargetType,
    /// Set on back-references: the forward field on the target type that
    /// lists this model.
    pub back_ref_of: Option<String>,
}

/// Definition of one field.
#[derive(Debug, Clone)]
pub enum FieldDef {
    Plain { default: Value },
    Reference(RefDef),
    /// Undeclared field. Stays plain until it's first assigned a model, at
    /// which point it's upgraded to a reference for good.
    Dynamic,
}

impl FieldDef {
    pub fn plain() -> Self {
        FieldDef::Plain {
            default: Value::Null,
        }
    }

    pub fn plain_with_default(default: Value) -> Self {
        FieldDef::Plain { default }
    }

    pub fn to_one(target: impl Into<TypeTag>) -> Self {
        Self::reference(Arity::One, TargetType::Static(target.into()))
    }

    pub fn to_many(target: impl Into<TypeTag>) -> Self {
        Self::reference(Arity::Many, TargetType::Static(target.into()))
    }

    pub fn to_one_or_many(target: impl Into<TypeTag>) -> Self {
        Self::reference(Arity::OneOrMany, TargetType::Static(target.into()))
    }

    /// A reference whose target type is computed per item.
    pub fn computed<F>(arity: Arity, target: F) -> Self
    where
        F: Fn(&TargetContext<'_>) -> TypeTag + Send + Sync + 'static,
    {
        Self::reference(arity, TargetType::Dynamic(Arc::new(target)))
    }

    /// A field listing every `target` whose `field` references this model.
    pub fn back_ref(target: impl Into<TypeTag>, field: impl Into<String>, arity: Arity) -> Self {
        FieldDef::Reference(RefDef {
            arity,
            target: TargetType::Static(target.into()),
            back_ref_of: Some(field.into()),
        })
    }

    fn reference(arity: Arity, target: TargetType) -> Self {
        FieldDef::Reference(RefDef {
            arity,
            target,
            back_ref_of: None,
        })
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, FieldDef::Reference(_))
    }

    pub fn as_reference(&self) -> Option<&RefDef> {
        match self {
            FieldDef::Reference(def) => Some(def),
            _ => None,
        }
    }
}

/// The field table of one type.
#[derive(Debug, Clone)]
pub struct Schema {
    type_tag: TypeTag,
    fields: BTreeMap<String, FieldDef>,
}

impl Schema {
    pub fn new(type_tag: impl Into<TypeTag>) -> Self {
        Self {
            type_tag: type_tag.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn field(mut self, key: impl Into<String>, def: FieldDef) -> Self {
        self.fields.insert(key.into(), def);
        self
    }

    pub fn type_tag(&self) -> &TypeTag {
        &self.type_tag
    }

    pub fn get(&self, key: &str) -> Option<&FieldDef> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &FieldDef)> {
        self.fields.iter()
    }

    /// Records a field seen at runtime but never declared.
    pub(crate) fn declare_dynamic(&mut self, key: &str) {
        self.fields
            .entry(key.to_string())
            .or_insert(FieldDef::Dynamic);
    }

    /// Upgrades a dynamic (or unknown) field to a reference.
    ///
    /// Check-then-set: a field that's already a reference keeps its
    /// definition, a declared plain field refuses the upgrade.
    pub(crate) fn upgrade(&mut self, key: &str, def: RefDef) -> Result<RefDef, ()> {
        match self.fields.get(key) {
            Some(FieldDef::Reference(existing)) => Ok(existing.clone()),
            Some(FieldDef::Plain { .. }) => Err(()),
            Some(FieldDef::Dynamic) | None => {
                self.fields
                    .insert(key.to_string(), FieldDef::Reference(def.clone()));
                Ok(def)
            }
        }
    }
}
