use pretty_assertions::assert_eq;
use resource_graph::collection::Collection;
use resource_graph::error::GraphError;
use resource_graph::model::{FieldValue, Id, Link, LinkValue, Model, RefId, TypeTag};
use resource_graph::schema::{Arity, FieldDef, Schema};
use serde_json::{json, Value};
use std::sync::Arc;

fn schemas() -> Vec<Schema> {
    vec![
        Schema::new("person")
            .field("name", FieldDef::plain())
            .field("spouse", FieldDef::to_one("person"))
            .field("pets", FieldDef::back_ref("pet", "owner", Arity::Many))
            .field("tags", FieldDef::to_one_or_many("tag")),
        Schema::new("pet")
            .field("name", FieldDef::plain())
            .field("owner", FieldDef::to_one("person")),
        Schema::new("tag").field("label", FieldDef::plain()),
    ]
}

fn without_meta(mut snapshot: Value) -> Value {
    if let Some(map) = snapshot.as_object_mut() {
        map.remove("meta");
    }
    snapshot
}

/// Every added model is found again, as the same handle, until removed.
#[test]
fn test_find_returns_the_added_model() {
    let collection = Collection::with_schemas(schemas());
    let models: Vec<Model> = (1..=5)
        .map(|i| collection.add(json!({"id": i, "name": format!("p{}", i)}), "person").unwrap())
        .collect();

    for model in &models {
        let found = collection.find((model.type_tag(), model.id())).expect("Model not found");
        assert!(found.ptr_eq(model));
    }

    collection.remove(&models[0]);
    assert!(collection.find(("person", 1)).is_none());
    assert!(collection.find(("person", 2)).unwrap().ptr_eq(&models[1]));
}

#[test]
fn test_clone_keeps_fields_and_tracks_original() {
    let collection = Collection::with_schemas(schemas());
    let ann = collection.add(json!({"id": 1, "name": "Ann"}), "person").unwrap();
    let bob = collection
        .add(json!({"id": 2, "name": "Bob", "spouse": 1, "tags": [{"id": 3, "label": "x"}]}), "person")
        .unwrap();

    let copy = bob.clone_model().unwrap();

    assert_ne!(copy.id(), bob.id());
    assert!(copy.id().is_local());
    assert_eq!(copy.original_id(), Some(bob.id()));
    assert_eq!(without_meta(copy.to_snapshot()), without_meta(bob.to_snapshot()));
    assert!(copy.original().unwrap().unwrap().ptr_eq(&bob));
    assert!(copy.link("spouse").unwrap().unwrap().ptr_eq(&ann));

    assert_eq!(bob.original(), Err(GraphError::NotAClone(RefId::new("person", 2))));
}

#[test]
fn test_rename_preserves_references() {
    let collection = Collection::with_schemas(schemas());
    let ann = collection.add(json!({"name": "Ann"}), "person").unwrap();
    let local = ann.id();
    let bob = collection.add(json!({"id": 2, "name": "Bob"}), "person").unwrap();
    bob.assign("spouse", &ann).unwrap();
    let rex = collection.add(json!({"id": 5, "owner": {"id": local.to_json(), "type": "person"}}), "pet").unwrap();

    collection.rename(&ann, 100).unwrap();

    assert!(bob.link("spouse").unwrap().unwrap().ptr_eq(&ann));
    assert!(rex.link("owner").unwrap().unwrap().ptr_eq(&ann));
    assert_eq!(bob.to_snapshot()["spouse"], json!({"id": 100, "type": "person"}));
    assert_eq!(ann.links("pets").unwrap(), vec![Link::Model(rex)]);
    assert!(collection.find(("person", local)).is_none());
}

#[test]
fn test_removed_targets_become_placeholders() {
    let collection = Collection::with_schemas(schemas());
    let ann = collection.add(json!({"id": 1}), "person").unwrap();
    let bob = collection.add(json!({"id": 2, "spouse": 1}), "person").unwrap();
    let tag = collection.add(json!({"id": 9}), "tag").unwrap();
    bob.assign("tags", vec![tag.clone()]).unwrap();

    collection.remove(&ann);
    collection.remove(&tag);

    assert_eq!(
        bob.reference("spouse").unwrap(),
        LinkValue::One(Link::Placeholder(RefId::new("person", 1)))
    );
    assert_eq!(
        bob.reference("tags").unwrap(),
        LinkValue::Many(vec![Link::Placeholder(RefId::new("tag", 9))])
    );
    assert_eq!(bob.link("spouse").unwrap(), None);
}

#[test]
fn test_references_resolve_lazily() {
    let collection = Collection::with_schemas(schemas());
    let rex = collection.add(json!({"id": 5, "owner": 1}), "pet").unwrap();
    assert!(rex.reference("owner").unwrap().first().unwrap().is_placeholder());

    let ann = collection.add(json!({"id": 1}), "person").unwrap();
    assert!(rex.link("owner").unwrap().unwrap().ptr_eq(&ann));
    assert_eq!(ann.links("pets").unwrap(), vec![Link::Model(rex)]);
}

#[test]
fn test_cyclic_references_snapshot_flat() {
    let collection = Collection::with_schemas(schemas());
    let ann = collection.add(json!({"id": 1, "spouse": 2}), "person").unwrap();
    let bob = collection.add(json!({"id": 2, "spouse": 1}), "person").unwrap();

    assert!(ann.link("spouse").unwrap().unwrap().ptr_eq(&bob));
    assert!(bob.link("spouse").unwrap().unwrap().ptr_eq(&ann));
    assert_eq!(ann.to_snapshot()["spouse"], json!({"id": 2, "type": "person"}));
}

#[test]
fn test_back_reference_writes_update_forward_fields() {
    let collection = Collection::with_schemas(schemas());
    let ann = collection.add(json!({"id": 1}), "person").unwrap();
    let rex = collection.add(json!({"id": 5}), "pet").unwrap();
    let tom = collection.add(json!({"id": 6}), "pet").unwrap();

    ann.assign("pets", vec![rex.clone(), tom.clone()]).unwrap();
    assert!(rex.link("owner").unwrap().unwrap().ptr_eq(&ann));
    assert!(tom.link("owner").unwrap().unwrap().ptr_eq(&ann));

    ann.assign("pets", FieldValue::Plain(json!([6]))).unwrap();
    assert_eq!(rex.link("owner").unwrap(), None);
    assert_eq!(ann.links("pets").unwrap(), vec![Link::Model(tom)]);
}

#[test]
fn test_to_one_rejects_lists() {
    let collection = Collection::with_schemas(schemas());
    let ann = collection.add(json!({"id": 1}), "person").unwrap();
    let err = ann
        .assign("spouse", FieldValue::Plain(json!([2, 3])))
        .unwrap_err();
    assert_eq!(
        err,
        GraphError::ArityMismatch {
            field: "spouse".into(),
            count: 2
        }
    );
}

#[test]
fn test_one_or_many_keeps_the_assigned_shape() {
    let collection = Collection::with_schemas(schemas());
    let ann = collection.add(json!({"id": 1}), "person").unwrap();
    let tag = collection.add(json!({"id": 3}), "tag").unwrap();

    ann.assign("tags", &tag).unwrap();
    assert_eq!(ann.reference("tags").unwrap(), LinkValue::One(Link::Model(tag.clone())));

    ann.assign("tags", vec![tag.clone()]).unwrap();
    assert_eq!(ann.reference("tags").unwrap(), LinkValue::Many(vec![Link::Model(tag)]));
}

#[test]
fn test_dynamic_fields_upgrade_once() {
    let collection = Collection::new();
    let ann = collection.add(json!({"id": 1, "friend": "none"}), "person").unwrap();
    let bob = collection.add(json!({"id": 2}), "person").unwrap();

    ann.assign("friend", &bob).unwrap();
    assert!(ann.field_def("friend").unwrap().is_reference());
    assert!(ann.link("friend").unwrap().unwrap().ptr_eq(&bob));

    // Upgraded fields keep resolving ids against the recorded target type.
    ann.assign("friend", json!(1)).unwrap();
    assert!(ann.link("friend").unwrap().unwrap().ptr_eq(&ann));

    // The upgrade is per instance.
    assert!(bob.field_def("friend").is_none());
}

#[test]
fn test_computed_target_type() {
    let schema = Schema::new("comment")
        .field("kind", FieldDef::plain())
        .field(
            "subject",
            FieldDef::computed(Arity::One, |ctx| {
                let kind = ctx.owner.get("kind");
                TypeTag::from(kind.as_ref().and_then(Value::as_str).unwrap_or("post"))
            }),
        );
    let collection = Collection::with_schemas([schema]);
    let photo = collection.add(json!({"id": 4}), "photo").unwrap();

    let comment = collection
        .add(json!({"id": 1, "kind": "photo", "subject": 4}), "comment")
        .unwrap();
    assert!(comment.link("subject").unwrap().unwrap().ptr_eq(&photo));
}

#[test]
fn test_patch_listener_sees_one_patch_per_action() {
    let collection = Collection::with_schemas(schemas());
    let ann = collection.add(json!({"id": 1, "name": "Ann"}), "person").unwrap();
    let bob = collection.add(json!({"id": 2}), "person").unwrap();
    let patches = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = patches.clone();
    ann.on_patch(move |p| sink.lock().push(p.clone()));

    ann.action(|m| {
        m.assign("name", json!("Anne"))?;
        m.assign("spouse", &bob)
    })
    .unwrap();

    let patches = patches.lock();
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].old["name"], json!("Ann"));
    assert_eq!(patches[0].old["spouse"], Value::Null);
    assert_eq!(patches[0].new["name"], json!("Anne"));
    assert_eq!(patches[0].new["spouse"], json!({"id": 2, "type": "person"}));
}

#[test]
fn test_snapshot_round_trip() {
    let collection = Collection::with_schemas(schemas());
    collection.add(json!({"id": 1, "name": "Ann", "spouse": 2}), "person").unwrap();
    collection.add(json!({"id": 2, "name": "Bob", "spouse": 1}), "person").unwrap();
    collection.add(json!({"id": 5, "name": "Rex", "owner": 1}), "pet").unwrap();

    let restored = Collection::from_snapshot(collection.snapshot(), schemas()).unwrap();

    assert_eq!(restored.snapshot(), collection.snapshot());
    let ann = restored.find(("person", 1)).unwrap();
    assert_eq!(ann.links("pets").unwrap().len(), 1);
    assert_eq!(
        ann.link("spouse").unwrap().unwrap().id(),
        Id::from(2)
    );
}

#[test]
fn test_detached_models_resolve_nothing() {
    let collection = Collection::with_schemas(schemas());
    let ann = collection.add(json!({"id": 1}), "person").unwrap();
    let bob = collection.add(json!({"id": 2, "spouse": 1}), "person").unwrap();

    collection.remove(&bob);

    assert!(!bob.is_attached());
    assert_eq!(
        bob.reference("spouse").unwrap(),
        LinkValue::One(Link::Placeholder(RefId::new("person", 1)))
    );
    assert_eq!(bob.clone_model(), Err(GraphError::Detached(RefId::new("person", 2))));
    assert!(ann.is_attached());
}

#[test]
fn test_runtime_references_survive_clone_and_snapshot() {
    let collection = Collection::with_schemas(schemas());
    let ann = collection.add(json!({"id": 1, "name": "Ann"}), "person").unwrap();
    let bob = collection.add(json!({"id": 2, "name": "Bob"}), "person").unwrap();
    ann.assign("friend", &bob).unwrap();

    let copy = ann.clone_model().unwrap();
    assert!(copy.field_def("friend").unwrap().is_reference());
    assert!(copy.link("friend").unwrap().unwrap().ptr_eq(&bob));

    let restored = Collection::from_snapshot(collection.snapshot(), schemas()).unwrap();
    assert_eq!(restored.snapshot(), collection.snapshot());
    let restored_ann = restored.find(("person", 1)).unwrap();
    assert!(restored_ann.field_def("friend").unwrap().is_reference());
    assert_eq!(restored_ann.link("friend").unwrap().unwrap().id(), Id::from(2));

    collection.remove(&bob);
    assert_eq!(
        copy.reference("friend").unwrap(),
        LinkValue::One(Link::Placeholder(RefId::new("person", 2)))
    );
}

#[test]
fn test_back_reference_adds_join_one_or_many_fields() {
    let collection = Collection::with_schemas([
        Schema::new("person").field("tagged", FieldDef::back_ref("photo", "people", Arity::Many)),
        Schema::new("photo").field("people", FieldDef::to_one_or_many("person")),
    ]);
    let ann = collection.add(json!({"id": 1}), "person").unwrap();
    let bob = collection.add(json!({"id": 2}), "person").unwrap();
    let beach = collection.add(json!({"id": 9, "people": [1]}), "photo").unwrap();
    let selfie = collection.add(json!({"id": 10, "people": 1}), "photo").unwrap();

    bob.assign("tagged", vec![beach.clone()]).unwrap();
    assert_eq!(
        beach.links("people").unwrap(),
        vec![Link::Model(ann.clone()), Link::Model(bob.clone())]
    );
    assert_eq!(ann.links("tagged").unwrap().len(), 2);

    bob.assign("tagged", vec![beach.clone(), selfie.clone()]).unwrap();
    assert_eq!(
        selfie.reference("people").unwrap(),
        LinkValue::Many(vec![Link::Model(ann), Link::Model(bob)])
    );
}
