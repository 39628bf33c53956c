//! # Network Configuration
//!
//! [`NetworkConfig`] is the process-wide fallback layer, handed explicitly to
//! the [`Client`](super::Client). [`FetchOptions`] overrides it per call.
//!
//! ```rust
//! use resource_graph::network::NetworkConfig;
//!
//! let config: NetworkConfig = serde_json::from_value(serde_json::json!({
//!     "base_url": "https://api.test",
//!     "cache": "stale-while-revalidate",
//!     "max_age_secs": 60
//! }))
//! .unwrap();
//! assert!(config.sort_params);
//! assert_eq!(config.data_key, "data");
//! ```

use super::NetworkError;
use crate::cache::StrategyName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Prefix for built urls. Empty means relative urls.
    pub base_url: String,
    /// Default caching strategy, checked when a call is made.
    pub cache: StrategyName,
    /// Cache entries older than this are stale. `None` never expires.
    pub max_age_secs: Option<u64>,
    /// Fingerprint equivalent query strings identically.
    pub sort_params: bool,
    pub default_headers: BTreeMap<String, String>,
    /// Member of the response body holding the records.
    pub data_key: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            cache: StrategyName::default(),
            max_age_secs: None,
            sort_params: true,
            default_headers: BTreeMap::new(),
            data_key: "data".to_string(),
        }
    }
}

impl NetworkConfig {
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_secs.map(Duration::from_secs)
    }

    /// Checks what can be checked up front. Strategy names are not among
    /// them.
    pub fn validate(&self) -> Result<(), NetworkError> {
        if !self.base_url.is_empty() {
            url::Url::parse(&self.base_url)
                .map_err(|e| NetworkError::InvalidConfig(format!("base_url: {}", e)))?;
        }
        if self.data_key.is_empty() {
            return Err(NetworkError::InvalidConfig("data_key must not be empty".into()));
        }
        Ok(())
    }
}

/// Per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub cache: Option<StrategyName>,
    pub max_age: Option<Duration>,
    pub query: Vec<(String, String)>,
    pub headers: BTreeMap<String, String>,
    /// Use this url instead of building one.
    pub url: Option<String>,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache(mut self, strategy: impl Into<StrategyName>) -> Self {
        self.cache = Some(strategy.into());
        self
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}
