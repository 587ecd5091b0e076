//! Shared test utilities for the moqtail workspace.

#![forbid(unsafe_code)]

pub mod fixtures;
pub mod relay;
pub mod transport;

pub use fixtures::*;
pub use relay::{FakeRelay, FakeRelayBuilder, LiveTrack, TrackContent};
pub use transport::MemoryTransport;
use tracing_subscriber::EnvFilter;

/// Install a test-writer subscriber once. Honours `RUST_LOG`, defaults to
/// `warn`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}
