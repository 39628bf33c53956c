//! # Models
//!
//! A [`Model`] is one entity in the graph: identity metadata, plain fields
//! and reference fields, all described by the model's [`Schema`].
//!
//! `Model` is a cheap handle (`Arc` inside). The [`Collection`] owns the
//! registration; reference buckets never hold models, only keys resolved
//! through the collection on read.
//!
//! ## Locking
//!
//! A model's state sits behind its own `RwLock`. Model code may take the
//! collection lock briefly while holding its own, never the reverse, and no
//! lock is held while patch listeners run.

mod action;
mod ids;
mod raw;
mod value;

pub use action::{Patch, PatchListener, PatchListenerId};
pub(crate) use ids::EntityKey;
pub use ids::{Id, RefId, TypeTag};
pub use raw::Meta;
pub(crate) use raw::RawRecord;
pub use value::{FieldValue, Link, LinkValue, RefInput};

use crate::collection::{Collection, WeakCollection};
use crate::error::GraphError;
use crate::reference::{resolve_item, Bucket};
use crate::schema::{Arity, FieldDef, RefDef, Schema, TargetContext, TargetType};
use action::{Flush, PatchTracker};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Keys that never reach the field table.
const IDENTITY_KEYS: [&str; 3] = ["id", "type", "meta"];

/// Handle to one entity.
#[derive(Clone)]
pub struct Model {
    inner: Arc<ModelInner>,
}

struct ModelInner {
    key: EntityKey,
    state: RwLock<ModelState>,
    tracker: PatchTracker,
}

struct ModelState {
    meta: Meta,
    schema: Schema,
    fields: BTreeMap<String, Value>,
    refs: BTreeMap<String, Bucket>,
    collection: Option<WeakCollection>,
}

impl Model {
    /// Builds a detached model with an empty schema. Every field starts
    /// dynamic.
    pub fn new(raw: Value, type_tag: impl Into<TypeTag>) -> Result<Self, GraphError> {
        Self::with_schema(raw, Schema::new(type_tag))
    }

    /// Builds a detached model. Reference fields given as ids stay
    /// placeholders until the model joins a collection holding the targets.
    pub fn with_schema(raw: Value, schema: Schema) -> Result<Self, GraphError> {
        let (model, refs) = Self::build(RawRecord::parse(raw)?, schema);
        model.init_references(refs)?;
        Ok(model)
    }

    /// Creates the model and its plain fields. Reference values are handed
    /// back so they can be assigned once the model is registered.
    pub(crate) fn build(record: RawRecord, mut schema: Schema) -> (Self, Vec<(String, Value)>) {
        let mut raw_fields = record.fields;

        // Runtime upgrades carried over from a snapshot.
        let mut upgraded = BTreeMap::new();
        for (key, target) in record.refs {
            let arity = match raw_fields.get(&key) {
                Some(Value::Array(_)) => Arity::Many,
                _ => Arity::One,
            };
            let def = RefDef {
                arity,
                target: TargetType::Static(target.clone()),
                back_ref_of: None,
            };
            if matches!(schema.get(&key), None | Some(FieldDef::Dynamic)) && schema.upgrade(&key, def).is_ok() {
                upgraded.insert(key, target);
            }
        }

        let meta = Meta {
            id: record.id.unwrap_or_else(Id::local),
            type_tag: schema.type_tag().clone(),
            original_id: record.original_id,
            refs: upgraded,
        };

        let mut fields = BTreeMap::new();
        let mut refs = BTreeMap::new();
        let mut pending = Vec::new();

        let declared: Vec<(String, FieldDef)> = schema
            .fields()
            .map(|(k, d)| (k.clone(), d.clone()))
            .collect();
        for (key, def) in declared {
            let value = raw_fields.remove(&key);
            match def {
                FieldDef::Plain { default } => {
                    fields.insert(key, value.unwrap_or(default));
                }
                FieldDef::Reference(def) => {
                    if def.back_ref_of.is_none() {
                        refs.insert(key.clone(), Bucket::new(def.arity));
                    }
                    if let Some(value) = value.filter(|v| !v.is_null()) {
                        pending.push((key, value));
                    }
                }
                FieldDef::Dynamic => {
                    if let Some(value) = value {
                        fields.insert(key, value);
                    }
                }
            }
        }
        for (key, value) in raw_fields {
            schema.declare_dynamic(&key);
            fields.insert(key, value);
        }

        let model = Model {
            inner: Arc::new(ModelInner {
                key: EntityKey::next(),
                state: RwLock::new(ModelState {
                    meta,
                    schema,
                    fields,
                    refs,
                    collection: None,
                }),
                tracker: PatchTracker::new(),
            }),
        };
        (model, pending)
    }

    /// Assigns the reference values of a fresh model without notifying.
    pub(crate) fn init_references(&self, refs: Vec<(String, Value)>) -> Result<(), GraphError> {
        self.inner.tracker.begin();
        let result = refs
            .into_iter()
            .try_for_each(|(key, value)| self.assign_field(&key, FieldValue::Plain(value)));
        let _ = self.inner.tracker.end();
        result
    }

    pub(crate) fn key(&self) -> EntityKey {
        self.inner.key
    }

    pub fn meta(&self) -> Meta {
        self.inner.state.read().meta.clone()
    }

    pub fn id(&self) -> Id {
        self.inner.state.read().meta.id.clone()
    }

    pub fn type_tag(&self) -> TypeTag {
        self.inner.state.read().meta.type_tag.clone()
    }

    /// Id of the model this one was cloned from.
    pub fn original_id(&self) -> Option<Id> {
        self.inner.state.read().meta.original_id.clone()
    }

    pub fn ref_id(&self) -> RefId {
        let state = self.inner.state.read();
        RefId::new(state.meta.type_tag.clone(), state.meta.id.clone())
    }

    /// The owning collection, if any.
    pub fn collection(&self) -> Option<Collection> {
        self.inner
            .state
            .read()
            .collection
            .as_ref()
            .and_then(WeakCollection::upgrade)
    }

    pub fn is_attached(&self) -> bool {
        self.collection().is_some_and(|c| c.contains(self))
    }

    pub fn field_def(&self, key: &str) -> Option<FieldDef> {
        self.inner.state.read().schema.get(key).cloned()
    }

    /// Reads a plain field.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.state.read().fields.get(key).cloned()
    }

    /// True when both handles point at the same model.
    pub fn ptr_eq(&self, other: &Model) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Assigns a field.
    ///
    /// Plain fields take JSON. Reference fields take models, placeholders,
    /// ids or inline records (single or list). Undeclared fields assigned a
    /// model are upgraded to references, with the arity taken from the shape
    /// of the value.
    pub fn assign(&self, key: &str, value: impl Into<FieldValue>) -> Result<(), GraphError> {
        let value = value.into();
        check_writable(key)?;
        self.action(|m| m.assign_field(key, value))
    }

    /// Assigns a field, declaring it a reference to `target` if it was
    /// dynamic. A list value declares a to-many reference.
    pub fn assign_ref(
        &self,
        key: &str,
        value: impl Into<FieldValue>,
        target: impl Into<TypeTag>,
    ) -> Result<(), GraphError> {
        let value = value.into();
        check_writable(key)?;
        let arity = match &value {
            FieldValue::Many(_) | FieldValue::Plain(Value::Array(_)) => Arity::Many,
            _ => Arity::One,
        };
        let def = RefDef {
            arity,
            target: TargetType::Static(target.into()),
            back_ref_of: None,
        };
        self.action(|m| {
            let def = m.upgrade(key, def)?;
            m.write_reference(key, &def, value)
        })
    }

    /// Mutates a plain field in place. `f` runs under the model's lock and
    /// must not call back into the model.
    pub fn modify<R>(&self, key: &str, f: impl FnOnce(&mut Value) -> R) -> Result<R, GraphError> {
        check_writable(key)?;
        if let Some(FieldDef::Reference(_)) = self.field_def(key) {
            return Err(GraphError::NotAReference(key.to_string()));
        }
        self.action(|m| {
            let mut state = m.inner.state.write();
            state.schema.declare_dynamic(key);
            let slot = state.fields.entry(key.to_string()).or_insert(Value::Null);
            let before = slot.clone();
            let result = f(slot);
            if *slot != before {
                m.inner.tracker.mark_changed();
            }
            Ok(result)
        })
    }

    /// Applies new raw data as one action. Identity keys are ignored.
    pub fn update(&self, raw: Value) -> Result<(), GraphError> {
        let record = RawRecord::parse(raw)?;
        self.action(|m| {
            record
                .fields
                .into_iter()
                .try_for_each(|(key, value)| m.assign_field(&key, FieldValue::Plain(value)))
        })
    }

    /// Runs `f` as one action: observers get a single notification and at
    /// most one [`Patch`] when it returns, however many fields it touched.
    pub fn action<R>(&self, f: impl FnOnce(&Model) -> Result<R, GraphError>) -> Result<R, GraphError> {
        if self.inner.tracker.begin() && self.inner.tracker.wants_patches() {
            self.inner.tracker.set_before(self.to_snapshot());
        }
        let result = f(self);
        if let Flush::Notify { before } = self.inner.tracker.end() {
            let patch = before.map(|old| Patch {
                model: self.ref_id(),
                old,
                new: self.to_snapshot(),
            });
            self.inner.tracker.notify(patch);
        }
        result
    }

    fn assign_field(&self, key: &str, value: FieldValue) -> Result<(), GraphError> {
        if IDENTITY_KEYS.contains(&key) {
            return Ok(());
        }
        match self.field_def(key) {
            Some(FieldDef::Reference(def)) => self.write_reference(key, &def, value),
            Some(FieldDef::Plain { .. }) => {
                let value = value
                    .into_plain()
                    .ok_or_else(|| GraphError::NotAReference(key.to_string()))?;
                self.write_plain(key, value);
                Ok(())
            }
            Some(FieldDef::Dynamic) | None if value.is_entity_shaped() => {
                let def = self.upgrade_from_value(key, &value)?;
                self.write_reference(key, &def, value)
            }
            Some(FieldDef::Dynamic) | None => {
                let value = value
                    .into_plain()
                    .ok_or_else(|| GraphError::NotAReference(key.to_string()))?;
                self.write_plain(key, value);
                Ok(())
            }
        }
    }

    fn write_plain(&self, key: &str, value: Value) {
        let mut state = self.inner.state.write();
        state.schema.declare_dynamic(key);
        if state.fields.get(key) != Some(&value) {
            state.fields.insert(key.to_string(), value);
            self.inner.tracker.mark_changed();
        }
    }

    fn upgrade_from_value(&self, key: &str, value: &FieldValue) -> Result<RefDef, GraphError> {
        let (arity, target) = match value {
            FieldValue::One(item) => (Arity::One, item.own_type()),
            FieldValue::Many(items) => (Arity::Many, items.iter().find_map(RefInput::own_type)),
            FieldValue::Plain(_) => (Arity::One, None),
        };
        let target = target.ok_or_else(|| GraphError::NotAReference(key.to_string()))?;
        self.upgrade(
            key,
            RefDef {
                arity,
                target: TargetType::Static(target),
                back_ref_of: None,
            },
        )
    }

    fn upgrade(&self, key: &str, def: RefDef) -> Result<RefDef, GraphError> {
        let mut state = self.inner.state.write();
        let def = state
            .schema
            .upgrade(key, def)
            .map_err(|_| GraphError::NotAReference(key.to_string()))?;
        if def.back_ref_of.is_none() && !state.refs.contains_key(key) {
            if state.fields.remove(key).is_some() {
                self.inner.tracker.mark_changed();
            }
            state.refs.insert(key.to_string(), Bucket::new(def.arity));
            if let Some(target) = def.target.as_static() {
                state.meta.refs.insert(key.to_string(), target.clone());
            }
            debug!(field = key, model = %state.meta.id, "Upgraded field to a reference");
        }
        Ok(def)
    }

    fn write_reference(&self, key: &str, def: &RefDef, value: FieldValue) -> Result<(), GraphError> {
        if let Some(field) = &def.back_ref_of {
            return self.write_back_reference(key, field, def, value);
        }

        let collection = self.collection();
        let (items, as_list) = value.into_items();
        let mut slots = Vec::with_capacity(items.len());
        for item in items {
            let target = match item.own_type() {
                Some(tag) => tag,
                None => {
                    let raw = item.to_json();
                    def.target.resolve(&TargetContext {
                        value: &raw,
                        owner: self,
                        key,
                        collection: collection.as_ref(),
                    })
                }
            };
            if let Some(slot) = resolve_item(item, target, collection.as_ref())? {
                slots.push(slot);
            }
        }

        let (owner_type, targets) = {
            let mut state = self.inner.state.write();
            let bucket = state
                .refs
                .entry(key.to_string())
                .or_insert_with(|| Bucket::new(def.arity));
            if bucket.replace(key, slots, as_list)? {
                self.inner.tracker.mark_changed();
            }
            let targets = bucket.targets(collection.as_ref());
            (state.meta.type_tag.clone(), targets)
        };
        if let Some(c) = &collection {
            c.index_forward(self.key(), &owner_type, key, targets);
        }
        Ok(())
    }

    /// Writing a back-reference rewrites the forward field on each added or
    /// removed target.
    fn write_back_reference(
        &self,
        key: &str,
        field: &str,
        def: &RefDef,
        value: FieldValue,
    ) -> Result<(), GraphError> {
        let target_type = def
            .target
            .as_static()
            .ok_or_else(|| GraphError::MissingTargetType(key.to_string()))?
            .clone();
        let me = self.ref_id();
        let collection = self
            .collection()
            .ok_or_else(|| GraphError::Detached(me.clone()))?;

        let current = collection.back_references(&target_type, field, &me);
        let (items, _) = value.into_items();
        let mut wanted: Vec<Model> = Vec::new();
        for item in items {
            let found = match item {
                RefInput::Null => None,
                RefInput::Model(m) => collection.contains(&m).then_some(m),
                RefInput::Ref(r) => collection.find(&r),
                RefInput::Id(id) => collection.find(&RefId::new(target_type.clone(), id)),
                RefInput::Raw(raw) => Some(collection.upsert(raw, target_type.clone())?),
            };
            if let Some(m) = found {
                if !wanted.iter().any(|w| w.ptr_eq(&m)) {
                    wanted.push(m);
                }
            }
        }

        for added in wanted.iter().filter(|m| !current.iter().any(|c| c.ptr_eq(m))) {
            added.link_to(field, self)?;
        }
        for removed in current.iter().filter(|m| !wanted.iter().any(|w| w.ptr_eq(m))) {
            removed.unlink_from(field, self)?;
        }
        Ok(())
    }

    /// Adds `target` to this model's forward `field`. Lists grow, a to-one
    /// field is replaced, and a one-or-many field holding someone else turns
    /// into a list.
    fn link_to(&self, field: &str, target: &Model) -> Result<(), GraphError> {
        let r = target.ref_id();
        let arity = self
            .field_def(field)
            .and_then(|d| d.as_reference().map(|d| d.arity));
        let current = match self.reference(field) {
            Ok(current) => current,
            // Not a reference yet: the assignment below upgrades it.
            Err(GraphError::UnknownField(_) | GraphError::NotAReference(_)) => LinkValue::Empty,
            Err(e) => return Err(e),
        };
        match current {
            LinkValue::Many(mut links) => {
                if !links.iter().any(|l| l.ref_id() == r) {
                    links.push(Link::Model(target.clone()));
                    self.assign(field, links)?;
                }
                Ok(())
            }
            LinkValue::One(link) if link.ref_id() == r => Ok(()),
            LinkValue::One(link) if arity == Some(Arity::OneOrMany) => {
                self.assign(field, vec![link, Link::Model(target.clone())])
            }
            LinkValue::One(_) | LinkValue::Empty => self.assign(field, target),
        }
    }

    /// Removes `target` from this model's forward `field`.
    fn unlink_from(&self, field: &str, target: &Model) -> Result<(), GraphError> {
        let r = target.ref_id();
        match self.reference(field)? {
            LinkValue::Empty => Ok(()),
            LinkValue::One(link) if link.ref_id() == r => self.assign(field, FieldValue::One(RefInput::Null)),
            LinkValue::One(_) => Ok(()),
            LinkValue::Many(links) => {
                let kept: Vec<Link> = links.into_iter().filter(|l| l.ref_id() != r).collect();
                self.assign(field, kept)
            }
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Reads a reference field. Targets missing from the collection come
    /// back as placeholders.
    pub fn reference(&self, key: &str) -> Result<LinkValue, GraphError> {
        let (def, bucket, collection) = {
            let state = self.inner.state.read();
            match state.schema.get(key) {
                Some(FieldDef::Reference(def)) => (
                    def.clone(),
                    state.refs.get(key).cloned(),
                    state.collection.as_ref().and_then(WeakCollection::upgrade),
                ),
                Some(_) => return Err(GraphError::NotAReference(key.to_string())),
                None => return Err(GraphError::UnknownField(key.to_string())),
            }
        };

        if let Some(field) = &def.back_ref_of {
            let target_type = def
                .target
                .as_static()
                .ok_or_else(|| GraphError::MissingTargetType(key.to_string()))?;
            let models = match &collection {
                Some(c) => c.back_references(target_type, field, &self.ref_id()),
                None => Vec::new(),
            };
            let mut links = models.into_iter().map(Link::Model);
            return Ok(match def.arity {
                Arity::One => links.next().map_or(LinkValue::Empty, LinkValue::One),
                Arity::Many | Arity::OneOrMany => LinkValue::Many(links.collect()),
            });
        }

        Ok(bucket.map_or(LinkValue::Empty, |b| b.read(collection.as_ref())))
    }

    /// The single target of a reference field, if resolved.
    pub fn link(&self, key: &str) -> Result<Option<Model>, GraphError> {
        Ok(self.reference(key)?.first().and_then(Link::into_model))
    }

    /// Every item of a reference field, resolved or placeholder.
    pub fn links(&self, key: &str) -> Result<Vec<Link>, GraphError> {
        Ok(self.reference(key)?.into_vec())
    }

    /// Data-only view: `meta`, plain fields, and forward references as
    /// `{id, type}` objects. Back-references are derived and left out.
    pub fn to_snapshot(&self) -> Value {
        let (meta, fields, refs, collection) = {
            let state = self.inner.state.read();
            (
                state.meta.to_json(),
                state.fields.clone(),
                state.refs.clone(),
                state.collection.clone(),
            )
        };
        let collection = collection.as_ref().and_then(WeakCollection::upgrade);

        let mut out = Map::new();
        out.insert("meta".into(), meta);
        out.extend(fields);
        for (key, bucket) in refs {
            out.insert(key, bucket.snapshot(collection.as_ref()));
        }
        Value::Object(out)
    }

    // =========================================================================
    // Clones
    // =========================================================================

    /// Adds a copy of this model to the same collection under a fresh local
    /// id, remembering this model's id as the original.
    pub fn clone_model(&self) -> Result<Model, GraphError> {
        let collection = self
            .collection()
            .ok_or_else(|| GraphError::Detached(self.ref_id()))?;
        let mut snapshot = self.to_snapshot();
        if let Some(meta) = snapshot.get_mut("meta").and_then(Value::as_object_mut) {
            meta.remove("id");
            meta.insert("originalId".into(), self.id().to_json());
        }
        let clone = collection.add(snapshot, self.type_tag())?;
        debug!(original = %self.ref_id(), clone = %clone.ref_id(), "Cloned");
        Ok(clone)
    }

    /// The model this one was cloned from, if it's still in the collection.
    pub fn original(&self) -> Result<Option<Model>, GraphError> {
        let meta = self.meta();
        let original = meta
            .original_id
            .ok_or_else(|| GraphError::NotAClone(self.ref_id()))?;
        let collection = self
            .collection()
            .ok_or_else(|| GraphError::detached(&meta.type_tag, &meta.id))?;
        Ok(collection.find(&RefId::new(meta.type_tag, original)))
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Revision counter, bumped once per completed action that changed
    /// something.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.tracker.subscribe()
    }

    pub fn on_patch<F>(&self, listener: F) -> PatchListenerId
    where
        F: Fn(&Patch) + Send + Sync + 'static,
    {
        self.inner.tracker.add_listener(Arc::new(listener))
    }

    pub fn off_patch(&self, id: PatchListenerId) -> bool {
        self.inner.tracker.remove_listener(id)
    }

    // =========================================================================
    // Collection plumbing
    // =========================================================================

    pub(crate) fn set_id(&self, id: Id) {
        let _ = self.action(|m| {
            let mut state = m.inner.state.write();
            if state.meta.id != id {
                state.meta.id = id;
                m.inner.tracker.mark_changed();
            }
            Ok(())
        });
    }

    pub(crate) fn set_collection(&self, collection: Option<WeakCollection>) {
        self.inner.state.write().collection = collection;
    }

    /// Points the buckets at `collection` and indexes the forward
    /// references.
    pub(crate) fn reattach(&self, collection: &Collection) {
        let (owner_type, forward) = {
            let mut state = self.inner.state.write();
            state.collection = Some(collection.downgrade());
            let mut forward = Vec::with_capacity(state.refs.len());
            for (key, bucket) in state.refs.iter_mut() {
                bucket.reresolve(collection);
                forward.push((key.clone(), bucket.targets(Some(collection))));
            }
            (state.meta.type_tag.clone(), forward)
        };
        for (field, targets) in forward {
            collection.index_forward(self.key(), &owner_type, &field, targets);
        }
    }

    /// Records the new id of a renamed target in every slot resolved to it.
    pub(crate) fn retarget(&self, target: EntityKey, r: &RefId) {
        for bucket in self.inner.state.write().refs.values_mut() {
            bucket.retarget(target, r);
        }
    }

    /// Freezes every reference to its current placeholder and forgets the
    /// collection. Must run while `from` still knows the targets' ids.
    pub(crate) fn detach(&self, from: &Collection) {
        let mut state = self.inner.state.write();
        for bucket in state.refs.values_mut() {
            bucket.unresolve(Some(from));
        }
        state.collection = None;
    }
}

fn check_writable(key: &str) -> Result<(), GraphError> {
    if IDENTITY_KEYS.contains(&key) {
        return Err(GraphError::ReadOnlyField(key.to_string()));
    }
    Ok(())
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Model {}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.state.try_read() {
            Some(state) => f
                .debug_struct("Model")
                .field("type", &state.meta.type_tag)
                .field("id", &state.meta.id)
                .finish(),
            None => f.write_str("Model(<locked>)"),
        }
    }
}
