//! # Network
//!
//! The outer layer: turns `(type, id, options)` into a url, decides between
//! the cache store and the [`Transport`] according to the caching strategy,
//! and upserts the returned records into the collection.
//!
//! - [`Client`]: `fetch`, `fetch_all`, `request`, `save`, `destroy`.
//! - [`Response`]: live result of a call, replaced in place by background
//!   revalidation.
//! - [`NetworkConfig`] / [`FetchOptions`]: configuration and per-call
//!   overrides.
//! - [`MockTransport`]: expectation-driven transport for tests.

mod client;
mod config;
mod error;
mod mock;
mod response;
mod transport;
mod urls;

pub use client::Client;
pub use config::{FetchOptions, NetworkConfig};
pub use error::{NetworkError, TransportError};
pub use mock::{ExpectationBuilder, MockTransport};
pub use response::{Response, ResponseData, ResponseState};
pub use transport::{Method, RawResponse, Request, Transport};
pub use urls::{DefaultUrlBuilder, QueryParams, UrlBuilder};
