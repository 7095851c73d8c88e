//! Testing utilities for code driving the engine.
//!
//! This module provides:
//! - Tracing initialisation for tests
//! - An in-memory tag facility for exercising the tag bridge

mod recording;

pub use recording::{RecordingTagBridge, TagEvent};

/// Initialises a tracing subscriber that writes to the test-harness writer
/// and respects `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs a subscriber.
#[cfg(feature = "testing")]
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}
