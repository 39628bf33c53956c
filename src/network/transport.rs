//! The HTTP seam. The crate never opens a connection itself; callers plug
//! in a [`Transport`] (or the [`MockTransport`](super::MockTransport) in
//! tests).

use super::TransportError;
use crate::cache::CachedPayload;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Patch,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Value,
    pub headers: BTreeMap<String, String>,
}

impl RawResponse {
    pub fn ok(body: Value) -> Self {
        Self::with_status(200, body)
    }

    pub fn with_status(status: u16, body: Value) -> Self {
        Self {
            status,
            body,
            headers: BTreeMap::new(),
        }
    }
}

impl From<RawResponse> for CachedPayload {
    fn from(raw: RawResponse) -> Self {
        CachedPayload {
            status: raw.status,
            body: raw.body,
            headers: raw.headers,
        }
    }
}

/// Performs one HTTP call.
///
/// Any status is a successful `perform`; `Err` means no response arrived.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn perform(&self, request: &Request) -> Result<RawResponse, TransportError>;
}
