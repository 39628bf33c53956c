//! # Response Cache
//!
//! Everything the network layer needs to decide between the wire and a
//! previous response:
//!
//! - [`CacheKey`]: the request fingerprint (method plus normalized url).
//! - [`CacheStore`]: successful responses by fingerprint, owned by a
//!   [`Collection`](crate::collection::Collection).
//! - [`strategy`]: the caching strategies and the decision table.

mod key;
mod store;
pub mod strategy;

pub use key::CacheKey;
pub use store::{CacheEntry, CacheStore, CachedPayload};
pub use strategy::{decide, CachingStrategy, Decision, InvalidStrategy, Staleness, StrategyName};
