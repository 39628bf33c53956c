//! # Mock Transport
//!
//! A [`Transport`] that answers from a queue of expectations, for testing
//! clients and caching strategies without a server.
//!
//! ```rust
//! use resource_graph::network::{Method, MockTransport, TransportError};
//! use serde_json::json;
//!
//! let mock = MockTransport::new();
//! mock.expect(Method::Get, "/pets/1").return_ok(json!({"data": {"id": 1}}));
//! mock.expect_any().return_err(TransportError::Unavailable);
//! // hand `mock.clone()` to a client, run the test...
//! // mock.verify(); // every expectation was consumed
//! ```
//!
//! Expectations are consumed in order. A request that doesn't match the
//! next expectation panics.

use super::{Method, RawResponse, Request, Transport, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;

struct Expectation {
    method: Option<Method>,
    url: Option<String>,
    response: Result<RawResponse, TransportError>,
}

impl Expectation {
    fn matches(&self, request: &Request) -> bool {
        self.method.map_or(true, |m| m == request.method)
            && self.url.as_deref().map_or(true, |u| u == request.url)
    }
}

/// Shared handle; clones see the same expectations and call log.
#[derive(Clone, Default)]
pub struct MockTransport {
    expectations: Arc<Mutex<VecDeque<Expectation>>>,
    calls: Arc<Mutex<Vec<Request>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expects a request with this method and exact url.
    pub fn expect(&self, method: Method, url: impl Into<String>) -> ExpectationBuilder {
        ExpectationBuilder {
            method: Some(method),
            url: Some(url.into()),
            expectations: self.expectations.clone(),
        }
    }

    /// Expects any request.
    pub fn expect_any(&self) -> ExpectationBuilder {
        ExpectationBuilder {
            method: None,
            url: None,
            expectations: self.expectations.clone(),
        }
    }

    /// Every request performed so far.
    pub fn calls(&self) -> Vec<Request> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Verifies that all expectations were met.
    pub fn verify(&self) {
        let remaining = self.expectations.lock().len();
        if remaining > 0 {
            panic!("Not all expectations were met. {} remaining", remaining);
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn perform(&self, request: &Request) -> Result<RawResponse, TransportError> {
        self.calls.lock().push(request.clone());
        let expectation = self.expectations.lock().pop_front();
        match expectation {
            Some(expectation) if expectation.matches(request) => expectation.response,
            _ => panic!(
                "Unexpected request or expectation mismatch: {} {}",
                request.method, request.url
            ),
        }
    }
}

/// Builder returned by [`MockTransport::expect`].
pub struct ExpectationBuilder {
    method: Option<Method>,
    url: Option<String>,
    expectations: Arc<Mutex<VecDeque<Expectation>>>,
}

impl ExpectationBuilder {
    /// Responds `200` with this body.
    pub fn return_ok(self, body: Value) {
        self.return_response(RawResponse::ok(body));
    }

    pub fn return_status(self, status: u16, body: Value) {
        self.return_response(RawResponse::with_status(status, body));
    }

    pub fn return_response(self, response: RawResponse) {
        self.push(Ok(response));
    }

    /// Fails without a response.
    pub fn return_err(self, error: TransportError) {
        self.push(Err(error));
    }

    fn push(self, response: Result<RawResponse, TransportError>) {
        self.expectations.lock().push_back(Expectation {
            method: self.method,
            url: self.url,
            response,
        });
    }
}
