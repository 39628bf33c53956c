//! # Live Responses
//!
//! A [`Response`] is shared and observable. When a strategy serves a cached
//! payload and revalidates in the background, the network result replaces
//! the state of the same `Response`, so whoever holds it sees the update
//! through [`Response::subscribe`].

use crate::cache::{CacheKey, CachedPayload};
use crate::collection::Collection;
use crate::error::GraphError;
use crate::model::{Model, TypeTag};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

/// Records a payload resolved to.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ResponseData {
    #[default]
    None,
    One(Model),
    Many(Vec<Model>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseState {
    pub status: u16,
    pub payload: Value,
    pub headers: BTreeMap<String, String>,
    pub data: ResponseData,
    pub from_cache: bool,
    /// Bumped every time the state is replaced.
    pub revision: u64,
}

#[derive(Clone)]
pub struct Response {
    inner: Arc<ResponseInner>,
}

struct ResponseInner {
    key: CacheKey,
    url: String,
    state: watch::Sender<ResponseState>,
}

impl Response {
    pub(crate) fn new(key: CacheKey, url: String, payload: CachedPayload, data: ResponseData, from_cache: bool) -> Self {
        let (state, _) = watch::channel(ResponseState {
            status: payload.status,
            payload: payload.body,
            headers: payload.headers,
            data,
            from_cache,
            revision: 0,
        });
        Self {
            inner: Arc::new(ResponseInner { key, url, state }),
        }
    }

    pub(crate) fn replace(&self, payload: CachedPayload, data: ResponseData, from_cache: bool) {
        self.inner.state.send_modify(|state| {
            state.status = payload.status;
            state.payload = payload.body;
            state.headers = payload.headers;
            state.data = data;
            state.from_cache = from_cache;
            state.revision += 1;
        });
    }

    pub fn key(&self) -> &CacheKey {
        &self.inner.key
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Current state.
    pub fn state(&self) -> ResponseState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ResponseState> {
        self.inner.state.subscribe()
    }

    pub fn status(&self) -> u16 {
        self.inner.state.borrow().status
    }

    pub fn payload(&self) -> Value {
        self.inner.state.borrow().payload.clone()
    }

    pub fn from_cache(&self) -> bool {
        self.inner.state.borrow().from_cache
    }

    pub fn revision(&self) -> u64 {
        self.inner.state.borrow().revision
    }

    /// The single record of the payload.
    pub fn model(&self) -> Option<Model> {
        match &self.inner.state.borrow().data {
            ResponseData::One(model) => Some(model.clone()),
            ResponseData::Many(_) | ResponseData::None => None,
        }
    }

    /// Every record of the payload.
    pub fn models(&self) -> Vec<Model> {
        match &self.inner.state.borrow().data {
            ResponseData::None => Vec::new(),
            ResponseData::One(model) => vec![model.clone()],
            ResponseData::Many(models) => models.clone(),
        }
    }

    /// `links.next` of the payload, for paginated lists.
    pub fn next_url(&self) -> Option<String> {
        self.inner
            .state
            .borrow()
            .payload
            .pointer("/links/next")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("key", &self.inner.key)
            .field("revision", &self.revision())
            .finish()
    }
}

/// Upserts the records of a payload body into the collection.
///
/// Records sit under `data_key` (or are the body itself), one object or a
/// list. Records under `included` are upserted too but not returned.
pub(crate) fn load_payload(
    collection: &Collection,
    body: &Value,
    data_key: &str,
    default_type: &TypeTag,
) -> Result<ResponseData, GraphError> {
    if let Some(Value::Array(included)) = body.get("included") {
        for raw in included {
            upsert_record(collection, raw, default_type)?;
        }
    }

    let data = match body {
        Value::Object(map) if map.contains_key(data_key) => &map[data_key],
        _ => body,
    };
    Ok(match data {
        Value::Array(records) => ResponseData::Many(
            records
                .iter()
                .map(|raw| upsert_record(collection, raw, default_type))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(_) => ResponseData::One(upsert_record(collection, data, default_type)?),
        _ => ResponseData::None,
    })
}

pub(crate) fn upsert_record(collection: &Collection, raw: &Value, default_type: &TypeTag) -> Result<Model, GraphError> {
    let type_tag = raw
        .get("type")
        .and_then(Value::as_str)
        .map(TypeTag::from)
        .unwrap_or_else(|| default_type.clone());
    collection.upsert(raw.clone(), type_tag)
}
