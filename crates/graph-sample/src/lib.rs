//! # Graph Sample
//!
//! Schemas, canned server responses and the demo flow used by the
//! `graph-sample` binary.
//!
//! ## 📚 Quick Start
//!
//! [`run_demo`] walks through the interesting parts:
//! 1. Fetching a list with sideloaded records.
//! 2. Serving it again from the cache, then revalidating in the background.
//! 3. Creating a record locally and saving it, which swaps its local id for
//!    the server's.

use resource_graph::cache::CachingStrategy;
use resource_graph::collection::Collection;
use resource_graph::error::GraphError;
use resource_graph::model::{Id, Model};
use resource_graph::network::{Client, FetchOptions, Method, MockTransport, NetworkConfig, NetworkError};
use resource_graph::schema::{Arity, FieldDef, Schema};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, info_span, Instrument};

pub const BASE_URL: &str = "https://pets.example";

#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error("Missing record: {0}")]
    Missing(String),
}

pub fn schemas() -> Vec<Schema> {
    vec![
        Schema::new("people")
            .field("name", FieldDef::plain())
            .field("age", FieldDef::plain_with_default(json!(0)))
            .field("best_friend", FieldDef::to_one("people"))
            .field("pets", FieldDef::back_ref("pets", "owner", Arity::Many)),
        Schema::new("pets")
            .field("name", FieldDef::plain())
            .field("species", FieldDef::plain())
            .field("owner", FieldDef::to_one("people")),
    ]
}

/// A transport answering the requests [`run_demo`] makes, in order.
pub fn demo_transport() -> MockTransport {
    let mock = MockTransport::new();
    mock.expect(Method::Get, format!("{}/people?include=pets", BASE_URL))
        .return_ok(json!({
            "data": [
                {"id": 1, "name": "Alice", "age": 34, "best_friend": 2},
                {"id": 2, "name": "Bob", "age": 29, "best_friend": 1}
            ],
            "included": [
                {"id": 10, "type": "pets", "name": "Rex", "species": "dog", "owner": 1},
                {"id": 11, "type": "pets", "name": "Tom", "species": "cat", "owner": 2}
            ]
        }));
    mock.expect(Method::Get, format!("{}/people?include=pets", BASE_URL))
        .return_ok(json!({
            "data": [
                {"id": 1, "name": "Alice", "age": 35, "best_friend": 2},
                {"id": 2, "name": "Bob", "age": 29, "best_friend": 1}
            ]
        }));
    mock.expect(Method::Post, format!("{}/pets", BASE_URL))
        .return_ok(json!({"data": {"id": 12, "name": "Kiwi", "species": "bird", "owner": {"id": 2, "type": "people"}}}));
    mock
}

pub fn demo_client(transport: MockTransport) -> Result<Client, SampleError> {
    let config = NetworkConfig {
        base_url: BASE_URL.to_string(),
        cache: CachingStrategy::StaleWhileRevalidate.into(),
        max_age_secs: Some(0),
        ..NetworkConfig::default()
    };
    Ok(Client::new(
        Collection::with_schemas(schemas()),
        Arc::new(transport),
        config,
    )?)
}

/// What the demo ended with.
#[derive(Debug)]
pub struct DemoSummary {
    pub people: usize,
    pub pets: usize,
    pub alice_age: serde_json::Value,
    pub saved_pet: Model,
}

pub async fn run_demo(client: &Client) -> Result<DemoSummary, SampleError> {
    let options = FetchOptions::new().param("include", "pets");

    let people = client
        .fetch("people", None, options.clone())
        .instrument(info_span!("initial_fetch"))
        .await?;
    info!(people = people.models().len(), "Fetched people");

    let alice = client
        .collection()
        .find(("people", 1))
        .ok_or_else(|| SampleError::Missing("people:1".into()))?;
    let bob = client
        .collection()
        .find(("people", 2))
        .ok_or_else(|| SampleError::Missing("people:2".into()))?;
    for pet in alice.links("pets")? {
        info!(owner = %alice.id(), pet = %pet.ref_id(), "Owns");
    }

    let span = info_span!("revalidation");
    let cached = async {
        let response = client.fetch("people", None, options.clone()).await?;
        info!(from_cache = response.from_cache(), "Second fetch");
        let mut updates = response.subscribe();
        updates.changed().await.map_err(|_| SampleError::Missing("revalidation".into()))?;
        info!(revision = response.revision(), "Revalidated in place");
        Ok::<_, SampleError>(response)
    }
    .instrument(span)
    .await?;
    info!(from_cache = cached.from_cache(), "Response updated");

    let kiwi = client
        .collection()
        .add(json!({"name": "Kiwi", "species": "bird"}), "pets")?;
    kiwi.assign("owner", &bob)?;
    info!(local_id = %kiwi.id(), "Created locally");
    client
        .save(&kiwi)
        .instrument(info_span!("save"))
        .await?;
    info!(id = %kiwi.id(), "Saved");

    Ok(DemoSummary {
        people: client.collection().find_all("people").len(),
        pets: client.collection().find_all("pets").len(),
        alice_age: alice.get("age").unwrap_or_default(),
        saved_pet: kiwi,
    })
}

/// Id the server hands out for the saved pet in [`demo_transport`].
pub fn saved_pet_id() -> Id {
    Id::from(12)
}
