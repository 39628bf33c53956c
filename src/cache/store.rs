//! The Cache Store: successful responses keyed by fingerprint.

use super::CacheKey;
use crate::model::TypeTag;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tracing::debug;

/// What the transport returned for a request.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPayload {
    pub status: u16,
    pub body: Value,
    pub headers: BTreeMap<String, String>,
}

impl CachedPayload {
    /// 2xx without an `errors` member.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status) && self.body.get("errors").is_none()
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub resource_type: TypeTag,
    pub payload: CachedPayload,
    pub fetched_at: Instant,
}

impl CacheEntry {
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

/// Last writer wins: overlapping fetches of one fingerprint each store
/// their response.
#[derive(Debug, Default)]
pub struct CacheStore {
    entries: HashMap<CacheKey, CacheEntry>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn put(&mut self, entry: CacheEntry) {
        debug!(key = %entry.key, entity_type = %entry.resource_type, "Cached");
        self.entries.insert(entry.key.clone(), entry);
    }

    /// Stores a response if it's a success. Returns whether it was stored.
    pub fn store_response(&mut self, key: CacheKey, resource_type: TypeTag, payload: CachedPayload) -> bool {
        if !payload.is_success() {
            debug!(%key, status = payload.status, "Not caching failed response");
            return false;
        }
        self.put(CacheEntry {
            key,
            resource_type,
            payload,
            fetched_at: Instant::now(),
        });
        true
    }

    /// Drops every entry fetched for `resource_type`. Returns how many.
    pub fn invalidate_type(&mut self, resource_type: &TypeTag) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| &e.resource_type != resource_type);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(status: u16, body: Value) -> CachedPayload {
        CachedPayload {
            status,
            body,
            headers: BTreeMap::new(),
        }
    }

    #[test]
    fn failures_are_never_stored() {
        let mut store = CacheStore::new();
        let key = CacheKey::fingerprint("GET", "/pets", true);

        assert!(!store.store_response(key.clone(), "pet".into(), payload(500, json!({}))));
        assert!(!store.store_response(
            key.clone(),
            "pet".into(),
            payload(200, json!({"errors": [{"detail": "nope"}]}))
        ));
        assert!(store.is_empty());

        assert!(store.store_response(key.clone(), "pet".into(), payload(200, json!({"data": []}))));
        assert_eq!(store.get(&key).unwrap().payload.body, json!({"data": []}));
    }

    #[test]
    fn invalidation_is_per_type() {
        let mut store = CacheStore::new();
        store.store_response(CacheKey::fingerprint("GET", "/pets", true), "pet".into(), payload(200, json!({})));
        store.store_response(CacheKey::fingerprint("GET", "/pets/1", true), "pet".into(), payload(200, json!({})));
        store.store_response(CacheKey::fingerprint("GET", "/people", true), "person".into(), payload(200, json!({})));

        assert_eq!(store.invalidate_type(&"pet".into()), 2);
        assert_eq!(store.len(), 1);
    }
}
