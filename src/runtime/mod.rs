//! Runtime helpers shared by binaries and tests.
//!
//! - [`setup_tracing`] - Initializes the tracing/logging infrastructure

pub mod tracing;

pub use self::tracing::setup_tracing;
