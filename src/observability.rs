//! Optional tracing subscriber setup for binaries and tests.
//!
//! This crate never installs a global subscriber on its own; library code
//! must not have that side effect. Callers that want a sane default
//! (binaries, integration tests, examples) can call [`init_tracing`].

use tracing_subscriber::EnvFilter;

/// Install a `tracing-subscriber` formatting layer driven by `RUST_LOG`,
/// falling back to `info` if unset. Safe to call more than once; later
/// calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
