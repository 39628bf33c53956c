use tracing_subscriber::EnvFilter;

/// Initializes the tracing/logging infrastructure.
///
/// Structured logs go through the `tracing` crate; verbosity comes from the
/// `RUST_LOG` environment variable:
/// - `RUST_LOG=info` - Collection changes (added, removed, renamed) and saves
/// - `RUST_LOG=debug` - Caching decisions, cache hits, sent requests
/// - `RUST_LOG=resource_graph=debug` - Debug only for this crate
///
/// Calling it again is a no-op, so tests can call it freely.
///
/// # Example
///
/// ```ignore
/// setup_tracing();
/// tracing::info!("Application started");
/// ```
pub fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();
}
