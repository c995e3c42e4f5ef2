//! Public SDK surface for Kairos.
//!
//! This crate re-exports the building blocks and provides a small
//! initialization helper to keep consumer setup consistent.

/// Re-export for convenience.
pub use kairos_rs_config as config;
pub use kairos_rs_core as core;
/// Re-export for convenience.
pub use kairos_rs_protocol as protocol;
pub use kairos_rs_server as server;
/// Re-export for convenience.
pub use kairos_rs_store as store;

#[inline]
/// Initialize `env_logger` with millisecond timestamps, honouring `RUST_LOG`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    let _ = env_logger::builder()
        .format_timestamp_millis()
        .parse_default_env()
        .try_init();
}
