//! # Network Errors
//!
//! [`TransportError`] is what a [`Transport`](super::Transport) reports when
//! no response came back at all. [`NetworkError`] is what client calls fail
//! with: configuration mistakes, missing cache entries, transport failures
//! that no strategy could absorb, and server-reported errors.

use crate::cache::InvalidStrategy;
use crate::error::GraphError;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("network not available")]
    Unavailable,
    #[error("Transport failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NetworkError {
    #[error(transparent)]
    InvalidStrategy(#[from] InvalidStrategy),
    #[error("no cache for this request")]
    NoCache,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Server responded with {status}")]
    Server { status: u16, body: Value },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Graph(#[from] GraphError),
}
