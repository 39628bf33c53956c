//! # Collection
//!
//! The identity registry. A [`Collection`] holds at most one [`Model`] per
//! `(type, id)` and is the only owner of model registrations: reference
//! buckets store keys and ask the collection on every read, so removing or
//! renaming a model is immediately visible to everything pointing at it.
//!
//! The collection also owns the [`CacheStore`] used by the network layer and
//! the reverse index backing back-reference fields.
//!
//! ```rust
//! use resource_graph::collection::Collection;
//! use resource_graph::schema::{FieldDef, Schema};
//! use serde_json::json;
//!
//! let collection = Collection::with_schemas([
//!     Schema::new("person").field("pet", FieldDef::to_one("pet")),
//!     Schema::new("pet"),
//! ]);
//! let person = collection.add(json!({"id": 1, "pet": 7}), "person").unwrap();
//! assert!(person.link("pet").unwrap().is_none());
//!
//! collection.add(json!({"id": 7, "name": "Rex"}), "pet").unwrap();
//! assert!(person.link("pet").unwrap().is_some());
//! ```

mod backref;

use crate::cache::CacheStore;
use crate::error::GraphError;
use crate::model::{EntityKey, Id, Link, Model, RawRecord, RefId, TypeTag};
use crate::schema::Schema;
use backref::BackRefIndex;
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Shared handle to an identity registry.
#[derive(Clone, Default)]
pub struct Collection {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: RwLock<State>,
    cache: Mutex<CacheStore>,
}

#[derive(Default)]
struct State {
    schemas: HashMap<TypeTag, Schema>,
    /// Keys grow monotonically, so this iterates in insertion order.
    models: BTreeMap<EntityKey, Model>,
    ids: HashMap<EntityKey, RefId>,
    lookup: HashMap<RefId, EntityKey>,
    backrefs: BackRefIndex,
}

/// Non-owning link from a model back to its collection.
#[derive(Clone)]
pub(crate) struct WeakCollection(Weak<Shared>);

impl WeakCollection {
    pub(crate) fn upgrade(&self) -> Option<Collection> {
        self.0.upgrade().map(|shared| Collection { shared })
    }
}

/// Anything [`Collection::find`] can look up.
#[derive(Debug, Clone)]
pub struct Lookup(Target);

#[derive(Debug, Clone)]
enum Target {
    Ref(RefId),
    Model(Model),
}

impl From<RefId> for Lookup {
    fn from(r: RefId) -> Self {
        Lookup(Target::Ref(r))
    }
}

impl From<&RefId> for Lookup {
    fn from(r: &RefId) -> Self {
        Lookup(Target::Ref(r.clone()))
    }
}

impl From<&Model> for Lookup {
    fn from(model: &Model) -> Self {
        Lookup(Target::Model(model.clone()))
    }
}

impl From<Model> for Lookup {
    fn from(model: Model) -> Self {
        Lookup(Target::Model(model))
    }
}

impl From<&Link> for Lookup {
    fn from(link: &Link) -> Self {
        match link {
            Link::Model(m) => m.into(),
            Link::Placeholder(r) => r.into(),
        }
    }
}

impl<T: Into<TypeTag>, I: Into<Id>> From<(T, I)> for Lookup {
    fn from((type_tag, id): (T, I)) -> Self {
        Lookup(Target::Ref(RefId::new(type_tag, id)))
    }
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schemas(schemas: impl IntoIterator<Item = Schema>) -> Self {
        let collection = Self::new();
        for schema in schemas {
            collection.register(schema);
        }
        collection
    }

    /// Registers (or replaces) the schema used for new models of its type.
    pub fn register(&self, schema: Schema) {
        debug!(entity_type = %schema.type_tag(), "Schema registered");
        self.shared
            .state
            .write()
            .schemas
            .insert(schema.type_tag().clone(), schema);
    }

    /// The registered schema, or an empty one.
    pub fn schema(&self, type_tag: &TypeTag) -> Schema {
        self.shared
            .state
            .read()
            .schemas
            .get(type_tag)
            .cloned()
            .unwrap_or_else(|| Schema::new(type_tag.clone()))
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Builds a model from raw data and registers it.
    ///
    /// Fails with [`GraphError::AlreadyExists`] if `(type, id)` is taken.
    /// Records without an id get a local one.
    pub fn add(&self, raw: Value, type_tag: impl Into<TypeTag>) -> Result<Model, GraphError> {
        let type_tag = type_tag.into();
        let record = RawRecord::parse(raw)?;
        if let Some(id) = &record.id {
            let r = RefId::new(type_tag.clone(), id.clone());
            if self.shared.state.read().lookup.contains_key(&r) {
                return Err(GraphError::AlreadyExists(r));
            }
        }

        let (model, refs) = Model::build(record, self.schema(&type_tag));
        self.insert(&model)?;
        model.reattach(self);
        if let Err(e) = model.init_references(refs) {
            warn!(entity_type = %type_tag, id = %model.id(), error = %e, "Add failed");
            self.remove(&model);
            return Err(e);
        }
        Ok(model)
    }

    /// Registers an existing model, re-pointing its references at this
    /// collection.
    pub fn add_model(&self, model: &Model) -> Result<(), GraphError> {
        if let Some(current) = model.collection() {
            if current.contains(model) {
                if current.ptr_eq(self) {
                    return Ok(());
                }
                return Err(GraphError::AlreadyAttached(model.ref_id()));
            }
        }
        self.insert(model)?;
        model.reattach(self);
        Ok(())
    }

    /// Updates the model with the record's id in place, or adds a new one.
    pub fn upsert(&self, raw: Value, type_tag: impl Into<TypeTag>) -> Result<Model, GraphError> {
        let type_tag = type_tag.into();
        let id = RawRecord::parse(raw.clone())?.id;
        if let Some(existing) = id.and_then(|id| self.find((type_tag.clone(), id))) {
            existing.update(raw)?;
            debug!(entity_type = %type_tag, id = %existing.id(), "Updated in place");
            return Ok(existing);
        }
        self.add(raw, type_tag)
    }

    fn insert(&self, model: &Model) -> Result<(), GraphError> {
        let r = model.ref_id();
        let key = model.key();
        let size = {
            let mut state = self.shared.state.write();
            if state.lookup.contains_key(&r) {
                return Err(GraphError::AlreadyExists(r));
            }
            state.lookup.insert(r.clone(), key);
            state.ids.insert(key, r.clone());
            state.models.insert(key, model.clone());
            state.models.len()
        };
        info!(entity_type = %r.type_tag, id = %r.id, size, "Added");
        Ok(())
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Finds a model by `(type, id)`, placeholder, link or model handle.
    pub fn find(&self, lookup: impl Into<Lookup>) -> Option<Model> {
        let state = self.shared.state.read();
        match lookup.into().0 {
            Target::Ref(r) => state
                .lookup
                .get(&r)
                .and_then(|key| state.models.get(key))
                .cloned(),
            Target::Model(m) => state
                .models
                .get(&m.key())
                .filter(|found| found.ptr_eq(&m))
                .cloned(),
        }
    }

    /// Every model of a type, in insertion order.
    pub fn find_all(&self, type_tag: impl Into<TypeTag>) -> Vec<Model> {
        let type_tag = type_tag.into();
        let state = self.shared.state.read();
        state
            .models
            .iter()
            .filter(|(key, _)| state.ids.get(key).is_some_and(|r| r.type_tag == type_tag))
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.shared.state.read().models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, model: &Model) -> bool {
        self.shared
            .state
            .read()
            .models
            .get(&model.key())
            .is_some_and(|m| m.ptr_eq(model))
    }

    // =========================================================================
    // Removal
    // =========================================================================

    /// Unregisters a model. References to it degrade to placeholders and
    /// its own references are frozen as placeholders.
    pub fn remove(&self, lookup: impl Into<Lookup>) -> Option<Model> {
        let model = self.find(lookup)?;
        model.detach(self);
        let key = model.key();
        let fallback = model.ref_id();
        let (r, size) = {
            let mut state = self.shared.state.write();
            state.models.remove(&key);
            let r = state.ids.remove(&key).unwrap_or(fallback);
            state.lookup.remove(&r);
            state.backrefs.remove_owner(key);
            (r, state.models.len())
        };
        info!(entity_type = %r.type_tag, id = %r.id, size, "Removed");
        Some(model)
    }

    /// Removes every model of a type and drops that type's cached
    /// responses.
    pub fn remove_all(&self, type_tag: impl Into<TypeTag>) -> Vec<Model> {
        let type_tag = type_tag.into();
        let removed: Vec<Model> = self
            .find_all(type_tag.clone())
            .iter()
            .filter_map(|m| self.remove(m))
            .collect();
        let invalidated = self.cache().invalidate_type(&type_tag);
        info!(entity_type = %type_tag, removed = removed.len(), invalidated, "Removed all");
        removed
    }

    /// Drops every model and cached response. Schemas stay.
    pub fn reset(&self) {
        let models: Vec<Model> = self.shared.state.read().models.values().cloned().collect();
        for model in &models {
            model.detach(self);
        }
        {
            let mut state = self.shared.state.write();
            state.models.clear();
            state.ids.clear();
            state.lookup.clear();
            state.backrefs.clear();
        }
        self.cache().clear();
        info!(removed = models.len(), "Reset");
    }

    // =========================================================================
    // Rename
    // =========================================================================

    /// Changes a model's id, keeping its identity: every reference to it
    /// follows, and lookups by the old id stop matching.
    pub fn rename(&self, model: &Model, new_id: impl Into<Id>) -> Result<(), GraphError> {
        let new_id = new_id.into();
        let key = model.key();
        let current = model.ref_id();
        let (old, new, referrers) = {
            let mut state = self.shared.state.write();
            let old = match state.models.get(&key) {
                Some(m) if m.ptr_eq(model) => state.ids.get(&key).cloned(),
                _ => None,
            }
            .ok_or(GraphError::Detached(current))?;
            let new = RefId::new(old.type_tag.clone(), new_id.clone());
            if new == old {
                return Ok(());
            }
            if state.lookup.contains_key(&new) {
                return Err(GraphError::AlreadyExists(new));
            }
            state.lookup.remove(&old);
            state.lookup.insert(new.clone(), key);
            state.ids.insert(key, new.clone());
            state.backrefs.rename_target(&old, &new);
            let referrers: Vec<Model> = state
                .backrefs
                .owners_of(&new)
                .iter()
                .filter_map(|k| state.models.get(k).cloned())
                .collect();
            (old, new, referrers)
        };
        for referrer in &referrers {
            referrer.retarget(key, &new);
        }
        model.set_id(new_id);
        info!(entity_type = %new.type_tag, old = %old.id, new = %new.id, "Renamed");
        Ok(())
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// `{"models": [...]}` with every model's snapshot, in insertion order.
    pub fn snapshot(&self) -> Value {
        let models: Vec<Model> = self.shared.state.read().models.values().cloned().collect();
        json!({ "models": models.iter().map(Model::to_snapshot).collect::<Vec<_>>() })
    }

    /// Rebuilds a collection from [`Collection::snapshot`] output.
    pub fn from_snapshot(
        snapshot: Value,
        schemas: impl IntoIterator<Item = Schema>,
    ) -> Result<Self, GraphError> {
        let collection = Self::with_schemas(schemas);
        let Some(Value::Array(models)) = snapshot.get("models").cloned() else {
            return Err(GraphError::InvalidRaw("snapshot without `models`".into()));
        };
        for raw in models {
            let type_tag = raw
                .get("meta")
                .and_then(|meta| meta.get("type"))
                .and_then(Value::as_str)
                .map(TypeTag::from)
                .ok_or_else(|| GraphError::InvalidRaw("model snapshot without `meta.type`".into()))?;
            collection.add(raw, type_tag)?;
        }
        Ok(collection)
    }

    // =========================================================================
    // Cache
    // =========================================================================

    /// The response cache. Don't hold the guard across an `.await`.
    pub fn cache(&self) -> MutexGuard<'_, CacheStore> {
        self.shared.cache.lock()
    }

    // =========================================================================
    // Crate internals
    // =========================================================================

    pub fn ptr_eq(&self, other: &Collection) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn downgrade(&self) -> WeakCollection {
        WeakCollection(Arc::downgrade(&self.shared))
    }

    pub(crate) fn key_of(&self, r: &RefId) -> Option<EntityKey> {
        self.shared.state.read().lookup.get(r).copied()
    }

    pub(crate) fn model_by_key(&self, key: EntityKey) -> Option<Model> {
        self.shared.state.read().models.get(&key).cloned()
    }

    /// Current id of a registered model.
    pub(crate) fn ref_of_key(&self, key: EntityKey) -> Option<RefId> {
        self.shared.state.read().ids.get(&key).cloned()
    }

    /// Records what `owner.field` points at. Ignored for unregistered
    /// owners.
    pub(crate) fn index_forward(
        &self,
        owner: EntityKey,
        owner_type: &TypeTag,
        field: &str,
        targets: Vec<RefId>,
    ) {
        let mut state = self.shared.state.write();
        if state.models.contains_key(&owner) {
            state.backrefs.set(owner, owner_type, field, targets);
        }
    }

    /// Registered models of `owner_type` whose `field` points at `target`.
    pub(crate) fn back_references(&self, owner_type: &TypeTag, field: &str, target: &RefId) -> Vec<Model> {
        let state = self.shared.state.read();
        state
            .backrefs
            .referencing(owner_type, field, target)
            .iter()
            .filter_map(|key| state.models.get(key).cloned())
            .collect()
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LinkValue;
    use crate::schema::{Arity, FieldDef};
    use pretty_assertions::assert_eq;

    fn collection() -> Collection {
        Collection::with_schemas([
            Schema::new("person")
                .field("name", FieldDef::plain())
                .field("pets", FieldDef::to_many("pet"))
                .field("spouse", FieldDef::to_one("person")),
            Schema::new("pet")
                .field("name", FieldDef::plain())
                .field("owner", FieldDef::to_one("person")),
        ])
    }

    #[test]
    fn add_rejects_duplicates() {
        let c = collection();
        c.add(json!({"id": 1}), "person").unwrap();
        assert_eq!(
            c.add(json!({"id": 1}), "person").unwrap_err(),
            GraphError::AlreadyExists(RefId::new("person", 1))
        );
        // Same id under another type is fine.
        c.add(json!({"id": 1}), "pet").unwrap();
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn find_returns_the_same_model() {
        let c = collection();
        let added = c.add(json!({"id": 1, "name": "Ann"}), "person").unwrap();
        let found = c.find(("person", 1)).unwrap();
        assert!(found.ptr_eq(&added));
        assert!(c.find(&added).is_some());
        assert!(c.find(("person", 2)).is_none());
    }

    #[test]
    fn upsert_updates_in_place() {
        let c = collection();
        let first = c.upsert(json!({"id": 1, "name": "a"}), "person").unwrap();
        let second = c.upsert(json!({"id": 1, "name": "b"}), "person").unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(first.get("name"), Some(json!("b")));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn inline_records_are_added() {
        let c = collection();
        let person = c
            .add(json!({"id": 1, "pets": [{"id": 5, "name": "Rex"}]}), "person")
            .unwrap();
        let pet = c.find(("pet", 5)).unwrap();
        assert_eq!(pet.get("name"), Some(json!("Rex")));
        assert_eq!(person.links("pets").unwrap(), vec![Link::Model(pet)]);
    }

    #[test]
    fn removal_degrades_references_to_placeholders() {
        let c = collection();
        let pet = c.add(json!({"id": 5}), "pet").unwrap();
        let person = c.add(json!({"id": 1, "pets": [5]}), "person").unwrap();

        c.remove(&pet).unwrap();

        assert_eq!(
            person.reference("pets").unwrap(),
            LinkValue::Many(vec![Link::Placeholder(RefId::new("pet", 5))])
        );
        assert!(pet.collection().is_none());

        // Re-adding a record with the same id resolves the placeholder again.
        let again = c.add(json!({"id": 5}), "pet").unwrap();
        assert_eq!(person.links("pets").unwrap(), vec![Link::Model(again)]);
    }

    #[test]
    fn rename_keeps_identity() {
        let c = collection();
        let pet = c.add(json!({"name": "Rex"}), "pet").unwrap();
        let local = pet.id();
        let person = c.add(json!({"id": 1}), "person").unwrap();
        person.assign("pets", vec![pet.clone()]).unwrap();

        c.rename(&pet, 42).unwrap();

        assert_eq!(pet.id(), Id::Int(42));
        assert!(c.find(("pet", local)).is_none());
        assert!(c.find(("pet", 42)).unwrap().ptr_eq(&pet));
        assert_eq!(person.to_snapshot()["pets"], json!([{"id": 42, "type": "pet"}]));
    }

    #[test]
    fn rename_rejects_taken_ids() {
        let c = collection();
        let a = c.add(json!({"id": 1}), "pet").unwrap();
        c.add(json!({"id": 2}), "pet").unwrap();
        assert_eq!(
            c.rename(&a, 2),
            Err(GraphError::AlreadyExists(RefId::new("pet", 2)))
        );
    }

    #[test]
    fn back_references_follow_forward_fields() {
        let c = Collection::with_schemas([
            Schema::new("person").field("pets", FieldDef::back_ref("pet", "owner", Arity::Many)),
            Schema::new("pet").field("owner", FieldDef::to_one("person")),
        ]);
        let person = c.add(json!({"id": 1}), "person").unwrap();
        let rex = c.add(json!({"id": 5, "owner": 1}), "pet").unwrap();
        let tom = c.add(json!({"id": 6}), "pet").unwrap();

        assert_eq!(person.links("pets").unwrap(), vec![Link::Model(rex.clone())]);

        person.assign("pets", vec![tom.clone()]).unwrap();
        assert_eq!(person.links("pets").unwrap(), vec![Link::Model(tom.clone())]);
        assert!(rex.link("owner").unwrap().is_none());
        assert!(tom.link("owner").unwrap().unwrap().ptr_eq(&person));
    }

    #[test]
    fn add_model_moves_detached_models_in() {
        let c = collection();
        let model = Model::new(json!({"id": 3, "name": "x"}), "pet").unwrap();
        c.add_model(&model).unwrap();
        assert!(model.is_attached());
        c.add_model(&model).unwrap();

        let other = collection();
        assert_eq!(
            other.add_model(&model),
            Err(GraphError::AlreadyAttached(RefId::new("pet", 3)))
        );
    }

    #[test]
    fn remove_all_only_touches_one_type() {
        let c = collection();
        c.add(json!({"id": 1}), "pet").unwrap();
        c.add(json!({"id": 2}), "pet").unwrap();
        c.add(json!({"id": 1}), "person").unwrap();

        assert_eq!(c.remove_all("pet").len(), 2);
        assert!(c.find_all("pet").is_empty());
        assert_eq!(c.find_all("person").len(), 1);
    }

    #[test]
    fn snapshot_round_trip_preserves_links() {
        let c = collection();
        c.add(json!({"id": 1, "name": "Ann", "pets": [{"id": 5, "name": "Rex"}]}), "person")
            .unwrap();

        let restored = Collection::from_snapshot(c.snapshot(), [
            Schema::new("person").field("pets", FieldDef::to_many("pet")),
            Schema::new("pet"),
        ])
        .unwrap();

        assert_eq!(restored.snapshot(), c.snapshot());
        let person = restored.find(("person", 1)).unwrap();
        let pet = restored.find(("pet", 5)).unwrap();
        assert_eq!(person.links("pets").unwrap(), vec![Link::Model(pet)]);
    }

    #[test]
    fn removal_after_rename_keeps_the_new_id_and_forgets_the_model() {
        let c = collection();
        let ann = c.add(json!({"name": "Ann"}), "person").unwrap();
        let rex = c.add(json!({"id": 5, "owner": ann.id().to_json()}), "pet").unwrap();
        let key = ann.key();

        c.rename(&ann, 10).unwrap();
        c.remove(&ann);

        assert_eq!(c.ref_of_key(key), None);
        assert_eq!(
            rex.reference("owner").unwrap(),
            LinkValue::One(Link::Placeholder(RefId::new("person", 10)))
        );
        assert_eq!(rex.to_snapshot()["owner"], json!({"id": 10, "type": "person"}));
    }

    #[test]
    fn reset_clears_models() {
        let c = collection();
        let pet = c.add(json!({"id": 1}), "pet").unwrap();
        c.reset();
        assert!(c.is_empty());
        assert!(!pet.is_attached());
    }
}
