//! # Client
//!
//! Ties the graph to a [`Transport`]: builds urls, applies the caching
//! strategy, stores successful responses and upserts their records into
//! the [`Collection`].

use super::response::load_payload;
use super::{
    DefaultUrlBuilder, FetchOptions, Method, NetworkConfig, NetworkError, Request, Response,
    ResponseData, Transport, UrlBuilder,
};
use crate::cache::{decide, CacheEntry, CacheKey, CachedPayload, Decision, Staleness};
use crate::collection::Collection;
use crate::model::{Id, Model, TypeTag};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn, Instrument};

#[derive(Clone)]
pub struct Client {
    collection: Collection,
    transport: Arc<dyn Transport>,
    urls: Arc<dyn UrlBuilder>,
    config: Arc<NetworkConfig>,
}

impl Client {
    pub fn new(
        collection: Collection,
        transport: Arc<dyn Transport>,
        config: NetworkConfig,
    ) -> Result<Self, NetworkError> {
        config.validate()?;
        Ok(Self {
            collection,
            transport,
            urls: Arc::new(DefaultUrlBuilder::new(config.base_url.clone())),
            config: Arc::new(config),
        })
    }

    pub fn with_url_builder(mut self, urls: Arc<dyn UrlBuilder>) -> Self {
        self.urls = urls;
        self
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Fetches one record (`id` given) or a list.
    pub async fn fetch(
        &self,
        resource_type: impl Into<TypeTag>,
        id: Option<Id>,
        options: FetchOptions,
    ) -> Result<Response, NetworkError> {
        let resource_type = resource_type.into();
        let url = match &options.url {
            Some(url) => url.clone(),
            None => self.urls.build(&resource_type, id.as_ref(), &options.query),
        };
        self.request(Method::Get, &resource_type, url, None, options).await
    }

    /// Fetches a list and follows `links.next`, issuing at most
    /// `max_requests` requests.
    pub async fn fetch_all(
        &self,
        resource_type: impl Into<TypeTag>,
        options: FetchOptions,
        max_requests: usize,
    ) -> Result<Vec<Model>, NetworkError> {
        if max_requests == 0 {
            return Err(NetworkError::InvalidConfig("max_requests must be positive".into()));
        }
        let resource_type = resource_type.into();
        let mut response = self.fetch(resource_type.clone(), None, options.clone()).await?;
        let mut models = Vec::new();
        let mut requests = 1;
        loop {
            models.extend(response.models());
            match response.next_url() {
                Some(next) if requests < max_requests => {
                    requests += 1;
                    response = self
                        .request(Method::Get, &resource_type, next, None, options.clone())
                        .await?;
                }
                Some(_) => {
                    debug!(entity_type = %resource_type, requests, "Stopped paging at max_requests");
                    break;
                }
                None => break,
            }
        }
        Ok(models)
    }

    /// Issues a request. Only `GET` goes through the caching strategy.
    #[instrument(skip(self, body, options), fields(entity_type = %resource_type))]
    pub async fn request(
        &self,
        method: Method,
        resource_type: &TypeTag,
        url: String,
        body: Option<Value>,
        options: FetchOptions,
    ) -> Result<Response, NetworkError> {
        let strategy = options
            .cache
            .as_ref()
            .unwrap_or(&self.config.cache)
            .resolve()?;
        let key = CacheKey::fingerprint(method.as_str(), &url, self.config.sort_params);
        let request = Request {
            method,
            url: url.clone(),
            body,
            headers: self.headers(&options),
        };

        if method != Method::Get {
            return self.from_network(request, key, resource_type).await;
        }

        let cached = if strategy.reads_cache() {
            self.collection.cache().get(&key).cloned()
        } else {
            None
        };
        let max_age = options.max_age.or_else(|| self.config.max_age());
        let staleness = Staleness::of(cached.as_ref().map(CacheEntry::age), max_age);
        let decision = decide(strategy, staleness);
        debug!(%key, %strategy, ?staleness, ?decision, "Caching decision");

        match (decision, cached) {
            (Decision::NoCache, _) => Err(NetworkError::NoCache),
            (Decision::Network, _) | (_, None) => self.from_network(request, key, resource_type).await,
            (Decision::NetworkWithFallback, Some(entry)) => {
                match self.from_network(request, key, resource_type).await {
                    Err(NetworkError::Transport(e)) => {
                        warn!(key = %entry.key, error = %e, "Network failed, serving cache");
                        self.from_cache(entry, &url)
                    }
                    other => other,
                }
            }
            (Decision::Cache, Some(entry)) => self.from_cache(entry, &url),
            (Decision::CacheThenRevalidate, Some(entry)) => {
                let response = self.from_cache(entry, &url)?;
                self.revalidate(response.clone(), request, resource_type.clone());
                Ok(response)
            }
        }
    }

    /// Creates (local id) or updates the record on the server. A local id
    /// is replaced by the one the server assigned.
    #[instrument(skip(self, model), fields(model = %model.ref_id()))]
    pub async fn save(&self, model: &Model) -> Result<Model, NetworkError> {
        let r = model.ref_id();
        let (method, url) = if r.id.is_local() {
            (Method::Post, self.urls.build(&r.type_tag, None, &[]))
        } else {
            (Method::Patch, self.urls.build(&r.type_tag, Some(&r.id), &[]))
        };
        let mut wrapped = Map::new();
        wrapped.insert(self.config.data_key.clone(), to_record(model));
        let request = Request {
            method,
            url,
            body: Some(Value::Object(wrapped)),
            headers: self.headers(&FetchOptions::default()),
        };

        let payload = self.perform(&request).await?.body;
        let record = payload.get(&self.config.data_key).unwrap_or(&payload);
        if let Some(id) = record.get("id").and_then(Id::from_json) {
            if id != model.id() {
                match model.collection() {
                    Some(collection) if collection.contains(model) => collection.rename(model, id)?,
                    _ => model.set_id(id),
                }
            }
        }
        if record.is_object() {
            model.update(record.clone())?;
        }
        self.collection.cache().invalidate_type(&r.type_tag);
        info!(entity_type = %r.type_tag, id = %model.id(), "Saved");
        Ok(model.clone())
    }

    /// Deletes the record on the server and removes it from the
    /// collection. Records never saved are only removed locally.
    #[instrument(skip(self, model), fields(model = %model.ref_id()))]
    pub async fn destroy(&self, model: &Model) -> Result<(), NetworkError> {
        let r = model.ref_id();
        if !r.id.is_local() {
            let url = self.urls.build(&r.type_tag, Some(&r.id), &[]);
            let request = Request {
                method: Method::Delete,
                url,
                body: None,
                headers: self.headers(&FetchOptions::default()),
            };
            self.perform(&request).await?;
        }
        self.collection.remove(model);
        self.collection.cache().invalidate_type(&r.type_tag);
        info!(entity_type = %r.type_tag, id = %r.id, "Destroyed");
        Ok(())
    }

    fn headers(&self, options: &FetchOptions) -> BTreeMap<String, String> {
        let mut headers = self.config.default_headers.clone();
        headers.extend(options.headers.clone());
        headers
    }

    async fn from_network(
        &self,
        request: Request,
        key: CacheKey,
        resource_type: &TypeTag,
    ) -> Result<Response, NetworkError> {
        let payload = self.perform(&request).await?;
        if request.method == Method::Get {
            self.collection
                .cache()
                .store_response(key.clone(), resource_type.clone(), payload.clone());
        }
        let data = self.load(&payload, resource_type)?;
        Ok(Response::new(key, request.url, payload, data, false))
    }

    fn from_cache(&self, entry: CacheEntry, url: &str) -> Result<Response, NetworkError> {
        debug!(key = %entry.key, age_ms = entry.age().as_millis() as u64, "Serving cache");
        let data = self.load(&entry.payload, &entry.resource_type)?;
        Ok(Response::new(entry.key, url.to_string(), entry.payload, data, true))
    }

    /// Performs the request; non-success responses become
    /// [`NetworkError::Server`].
    async fn perform(&self, request: &Request) -> Result<CachedPayload, NetworkError> {
        debug!(method = %request.method, url = %request.url, "Sending request");
        let payload = CachedPayload::from(self.transport.perform(request).await?);
        if !payload.is_success() {
            warn!(method = %request.method, url = %request.url, status = payload.status, "Server error");
            return Err(NetworkError::Server {
                status: payload.status,
                body: payload.body,
            });
        }
        Ok(payload)
    }

    fn load(&self, payload: &CachedPayload, resource_type: &TypeTag) -> Result<ResponseData, NetworkError> {
        if payload.status == 204 {
            return Ok(ResponseData::None);
        }
        Ok(load_payload(
            &self.collection,
            &payload.body,
            &self.config.data_key,
            resource_type,
        )?)
    }

    /// Refreshes `response` in the background.
    fn revalidate(&self, response: Response, request: Request, resource_type: TypeTag) {
        let client = self.clone();
        let key = response.key().clone();
        tokio::spawn(
            async move {
                let payload = match client.perform(&request).await {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(%key, error = %e, "Revalidation failed");
                        return;
                    }
                };
                client
                    .collection
                    .cache()
                    .store_response(key.clone(), resource_type.clone(), payload.clone());
                match client.load(&payload, &resource_type) {
                    Ok(data) => {
                        response.replace(payload, data, false);
                        debug!(%key, "Revalidated");
                    }
                    Err(e) => warn!(%key, error = %e, "Revalidated payload rejected"),
                }
            }
            .in_current_span(),
        );
    }
}

/// Flat `{id?, type, ...fields}` body for writes. Local ids are left out.
fn to_record(model: &Model) -> Value {
    let mut record = match model.to_snapshot() {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    record.remove("meta");
    let r = model.ref_id();
    if !r.id.is_local() {
        record.insert("id".into(), r.id.to_json());
    }
    record.insert("type".into(), Value::String(r.type_tag.to_string()));
    Value::Object(record)
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("collection", &self.collection)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachingStrategy;
    use crate::network::{MockTransport, TransportError};
    use serde_json::json;

    fn client(mock: &MockTransport, cache: CachingStrategy) -> Client {
        let config = NetworkConfig {
            cache: cache.into(),
            ..NetworkConfig::default()
        };
        Client::new(Collection::new(), Arc::new(mock.clone()), config).unwrap()
    }

    #[tokio::test]
    async fn network_first_falls_back_on_transport_failure() {
        let mock = MockTransport::new();
        mock.expect(Method::Get, "/pets/1").return_ok(json!({"data": {"id": 1, "name": "Rex"}}));
        mock.expect(Method::Get, "/pets/1").return_err(TransportError::Unavailable);
        let client = client(&mock, CachingStrategy::NetworkFirst);

        client.fetch("pets", Some(Id::from(1)), FetchOptions::new()).await.unwrap();
        let response = client.fetch("pets", Some(Id::from(1)), FetchOptions::new()).await.unwrap();

        assert!(response.from_cache());
        assert_eq!(response.model().unwrap().get("name"), Some(json!("Rex")));
        mock.verify();
    }

    #[tokio::test]
    async fn network_first_propagates_server_errors() {
        let mock = MockTransport::new();
        mock.expect(Method::Get, "/pets/1").return_ok(json!({"data": {"id": 1}}));
        mock.expect(Method::Get, "/pets/1").return_status(500, json!({"errors": ["boom"]}));
        let client = client(&mock, CachingStrategy::NetworkFirst);

        client.fetch("pets", Some(Id::from(1)), FetchOptions::new()).await.unwrap();
        let err = client
            .fetch("pets", Some(Id::from(1)), FetchOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::Server { status: 500, .. }));
    }

    #[tokio::test]
    async fn server_errors_are_not_cached() {
        let mock = MockTransport::new();
        mock.expect(Method::Get, "/pets").return_ok(json!({"errors": [{"detail": "bad"}]}));
        let client = client(&mock, CachingStrategy::CacheFirst);

        let err = client.fetch("pets", None, FetchOptions::new()).await.unwrap_err();
        assert!(matches!(err, NetworkError::Server { status: 200, .. }));
        assert!(client.collection().cache().is_empty());
    }

    #[tokio::test]
    async fn fetch_all_follows_next_links() {
        let mock = MockTransport::new();
        mock.expect(Method::Get, "/pets").return_ok(json!({
            "data": [{"id": 1}],
            "links": {"next": "/pets?page=2"}
        }));
        mock.expect(Method::Get, "/pets?page=2").return_ok(json!({
            "data": [{"id": 2}],
            "links": {"next": "/pets?page=3"}
        }));
        let client = client(&mock, CachingStrategy::NetworkOnly);

        let models = client.fetch_all("pets", FetchOptions::new(), 2).await.unwrap();
        assert_eq!(models.len(), 2);
        mock.verify();

        let err = client.fetch_all("pets", FetchOptions::new(), 0).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid configuration: max_requests must be positive");
    }

    #[tokio::test]
    async fn save_renames_local_ids() {
        let mock = MockTransport::new();
        mock.expect(Method::Post, "/pets")
            .return_ok(json!({"data": {"id": 77, "name": "Rex"}}));
        let client = client(&mock, CachingStrategy::NetworkOnly);
        let person = client.collection().add(json!({"id": 1}), "person").unwrap();
        let pet = client.collection().add(json!({"name": "Rex"}), "pets").unwrap();
        person.assign("pet", &pet).unwrap();

        client.save(&pet).await.unwrap();

        assert_eq!(pet.id(), Id::from(77));
        assert!(person.link("pet").unwrap().unwrap().ptr_eq(&pet));
        let sent = &mock.calls()[0];
        assert_eq!(sent.body, Some(json!({"data": {"type": "pets", "name": "Rex"}})));
    }

    #[tokio::test]
    async fn destroy_removes_and_invalidates() {
        let mock = MockTransport::new();
        mock.expect(Method::Get, "/pets").return_ok(json!({"data": [{"id": 1}]}));
        mock.expect(Method::Delete, "/pets/1").return_status(204, Value::Null);
        let client = client(&mock, CachingStrategy::CacheFirst);

        let response = client.fetch("pets", None, FetchOptions::new()).await.unwrap();
        let pet = response.models().remove(0);
        client.destroy(&pet).await.unwrap();

        assert!(client.collection().is_empty());
        assert!(client.collection().cache().is_empty());
        mock.verify();
    }
}
