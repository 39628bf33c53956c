//! # Caching Strategies
//!
//! Each request is in one of three states: no cache entry, a fresh entry
//! (age <= max age) or a stale one. [`decide`] maps a strategy and a state
//! to what the client does:
//!
//! | Strategy | no entry | fresh | stale |
//! |---|---|---|---|
//! | `network-only` | network | network | network |
//! | `network-first` | network | network, cache on failure | network, cache on failure |
//! | `cache-only` | fail | cache | cache |
//! | `cache-first` | network | cache | cache |
//! | `stale-while-revalidate` | network | cache | cache, then revalidate |
//! | `stale-and-update` | network | cache | cache, then revalidate |
//!
//! Strategy names are plain strings in configuration and only checked when
//! a call is made.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachingStrategy {
    NetworkOnly,
    NetworkFirst,
    CacheOnly,
    CacheFirst,
    StaleWhileRevalidate,
    StaleAndUpdate,
}

impl CachingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CachingStrategy::NetworkOnly => "network-only",
            CachingStrategy::NetworkFirst => "network-first",
            CachingStrategy::CacheOnly => "cache-only",
            CachingStrategy::CacheFirst => "cache-first",
            CachingStrategy::StaleWhileRevalidate => "stale-while-revalidate",
            CachingStrategy::StaleAndUpdate => "stale-and-update",
        }
    }

    /// Whether the strategy ever reads the cache store.
    pub fn reads_cache(&self) -> bool {
        !matches!(self, CachingStrategy::NetworkOnly)
    }
}

impl fmt::Display for CachingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid caching strategy: {0}")]
pub struct InvalidStrategy(pub String);

impl FromStr for CachingStrategy {
    type Err = InvalidStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "network-only" => CachingStrategy::NetworkOnly,
            "network-first" => CachingStrategy::NetworkFirst,
            "cache-only" => CachingStrategy::CacheOnly,
            "cache-first" => CachingStrategy::CacheFirst,
            "stale-while-revalidate" => CachingStrategy::StaleWhileRevalidate,
            "stale-and-update" => CachingStrategy::StaleAndUpdate,
            other => return Err(InvalidStrategy(other.to_string())),
        })
    }
}

/// An unchecked strategy name, as found in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrategyName(String);

impl StrategyName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn resolve(&self) -> Result<CachingStrategy, InvalidStrategy> {
        self.0.parse()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for StrategyName {
    fn default() -> Self {
        CachingStrategy::NetworkOnly.into()
    }
}

impl From<&str> for StrategyName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for StrategyName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl From<CachingStrategy> for StrategyName {
    fn from(strategy: CachingStrategy) -> Self {
        Self::new(strategy.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    NoEntry,
    Fresh,
    Stale,
}

impl Staleness {
    /// `max_age` of `None` never expires; zero is always stale.
    pub fn of(age: Option<Duration>, max_age: Option<Duration>) -> Self {
        match (age, max_age) {
            (None, _) => Staleness::NoEntry,
            (Some(_), None) => Staleness::Fresh,
            (Some(_), Some(max)) if max.is_zero() => Staleness::Stale,
            (Some(age), Some(max)) if age <= max => Staleness::Fresh,
            (Some(_), Some(_)) => Staleness::Stale,
        }
    }
}

/// What to do for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Network,
    /// Network; on a transport failure serve the cached entry.
    NetworkWithFallback,
    Cache,
    /// Serve the cached entry now and refresh it in the background.
    CacheThenRevalidate,
    /// Fail with "no cache for this request".
    NoCache,
}

pub fn decide(strategy: CachingStrategy, staleness: Staleness) -> Decision {
    use CachingStrategy::*;
    use Staleness::*;

    match (strategy, staleness) {
        (NetworkOnly, _) => Decision::Network,
        (NetworkFirst, NoEntry) => Decision::Network,
        (NetworkFirst, _) => Decision::NetworkWithFallback,
        (CacheOnly, NoEntry) => Decision::NoCache,
        (CacheOnly, _) => Decision::Cache,
        (CacheFirst, NoEntry) => Decision::Network,
        (CacheFirst, _) => Decision::Cache,
        (StaleWhileRevalidate | StaleAndUpdate, NoEntry) => Decision::Network,
        (StaleWhileRevalidate | StaleAndUpdate, Fresh) => Decision::Cache,
        (StaleWhileRevalidate | StaleAndUpdate, Stale) => Decision::CacheThenRevalidate,
    }
}
