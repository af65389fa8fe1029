use std::sync::Once;

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

/// Guards against installing the test subscriber more than once.
///
/// Tests within one binary share the global subscriber, and installing it a
/// second time panics, so initialization must be idempotent.
static TEST_TRACING: Once = Once::new();

/// Initializes tracing for a service binary.
///
/// The filter is read from `RUST_LOG`, defaulting to `info` for the whole
/// process. The service name is attached as a top-level field on every event.
pub fn init_tracing(service_name: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    tracing::info!(service = service_name, "tracing initialized");
}

/// Initializes tracing for tests.
///
/// Safe to call from every test; only the first call installs the subscriber.
/// Output is routed through the test writer so it interleaves correctly with
/// `cargo test` capture.
pub fn init_test_tracing() {
    TEST_TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .init();
    });
}
