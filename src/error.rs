//! # Graph Errors
//!
//! Misuse of the entity graph fails synchronously with a [`GraphError`].
//! None of these are retried; unresolved references are not errors and
//! degrade to placeholders instead.

use crate::model::{Id, RefId, TypeTag};

/// Errors raised by the collection, models and reference buckets.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum GraphError {
    #[error("Model {0} already exists; update it instead")]
    AlreadyExists(RefId),
    #[error("Field `{0}` should be saved as a reference")]
    NotAReference(String),
    #[error("Field `{0}` is read-only")]
    ReadOnlyField(String),
    #[error("Unknown field `{0}`")]
    UnknownField(String),
    #[error("Model {0} is not attached to a collection")]
    Detached(RefId),
    #[error("Model {0} already belongs to another collection")]
    AlreadyAttached(RefId),
    #[error("Model {0} is not a clone")]
    NotAClone(RefId),
    #[error("Invalid raw data: {0}")]
    InvalidRaw(String),
    #[error("Field `{field}` is a to-one reference and can't hold {count} items")]
    ArityMismatch { field: String, count: usize },
    #[error("Back-reference `{0}` needs a static target type")]
    MissingTargetType(String),
}

impl GraphError {
    pub(crate) fn detached(type_tag: &TypeTag, id: &Id) -> Self {
        GraphError::Detached(RefId::new(type_tag.clone(), id.clone()))
    }
}
