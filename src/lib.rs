//! # Resource Graph
//!
//! > **A normalized, in-memory entity graph for resource APIs.**
//!
//! Records fetched from a remote API land in a [`Collection`](collection::Collection):
//! one live [`Model`](model::Model) per `(type, id)`, wired together by typed
//! references. A caching layer decides per call whether to answer from a
//! previous response, go to the network, or both.
//!
//! ## 🏗️ Design
//!
//! ### Arena ownership
//! The collection is the only owner of model registrations. Reference fields
//! store keys and placeholders, never models, so cycles are free and a
//! removed model simply turns into a `{type, id}` placeholder for whoever
//! pointed at it.
//!
//! ### Identity
//! A model keeps its identity across renames: when a local id (negative,
//! generated) is replaced by the server's id, every reference follows.
//!
//! ### Batching
//! Every public mutation runs as an action. Observers get one notification
//! and one [`Patch`](model::Patch) per action, never a half-applied state.
//!
//! ### Explicit configuration
//! The caching strategy, base url and friends live in a
//! [`NetworkConfig`](network::NetworkConfig) handed to the
//! [`Client`](network::Client). Per-call [`FetchOptions`](network::FetchOptions)
//! override it.
//!
//! ## 🗺️ Module Tour
//!
//! ### 1. The Graph ([`schema`], [`model`], `reference`, [`collection`])
//! - **Role**: Schemas describe fields, models hold them, buckets resolve
//!   references, the collection maps identities.
//! - **Key items**: [`Schema`](schema::Schema), [`Model`](model::Model),
//!   [`Collection`](collection::Collection).
//!
//! ### 2. The Cache ([`cache`])
//! - **Role**: Request fingerprints, the cache store and the strategy
//!   decision table.
//! - **Key items**: [`CachingStrategy`](cache::CachingStrategy),
//!   [`CacheStore`](cache::CacheStore).
//!
//! ### 3. The Network ([`network`])
//! - **Role**: Applies strategies around a pluggable [`Transport`](network::Transport).
//! - **Key items**: [`Client`](network::Client), [`Response`](network::Response),
//!   [`MockTransport`](network::MockTransport).
//!
//! ## 🚀 Quick Start
//!
//! ```rust
//! use resource_graph::collection::Collection;
//! use resource_graph::schema::{Arity, FieldDef, Schema};
//! use serde_json::json;
//!
//! let collection = Collection::with_schemas([
//!     Schema::new("person")
//!         .field("name", FieldDef::plain())
//!         .field("pets", FieldDef::back_ref("pet", "owner", Arity::Many)),
//!     Schema::new("pet")
//!         .field("name", FieldDef::plain())
//!         .field("owner", FieldDef::to_one("person")),
//! ]);
//!
//! let ann = collection.add(json!({"id": 1, "name": "Ann"}), "person").unwrap();
//! let rex = collection.add(json!({"id": 7, "name": "Rex", "owner": 1}), "pet").unwrap();
//!
//! assert!(rex.link("owner").unwrap().unwrap().ptr_eq(&ann));
//! assert_eq!(ann.links("pets").unwrap().len(), 1);
//! ```
//!
//! ### Running the Demo
//!
//! ```bash
//! RUST_LOG=info cargo run -p graph-sample
//! ```

pub mod cache;
pub mod collection;
pub mod error;
pub mod model;
pub mod network;
pub(crate) mod reference;
pub mod runtime;
pub mod schema;

pub use collection::Collection;
pub use error::GraphError;
pub use model::Model;
