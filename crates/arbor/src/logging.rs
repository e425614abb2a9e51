//! # Logging
//!
//! The runtime reports everything through `tracing` with structured fields; it
//! never installs a subscriber on its own. Applications call [`setup_tracing`]
//! once at startup (or install their own subscriber).
//!
//! ## Levels
//!
//! | Level | Events |
//! |-------|--------|
//! | `error` | teardown hook failures, transport failures, root failures |
//! | `warn` | child failures, name collisions, dead letters, timeouts |
//! | `info` | system start/stop, restarts, listener and pool lifecycle |
//! | `debug` | every dispatched message, resolution misses, actor start/stop |
//!
//! ## Usage
//!
//! ```bash
//! # Lifecycle only
//! RUST_LOG=info cargo run -p arbor-demo
//!
//! # Every message the runtime dispatches
//! RUST_LOG=arbor=debug cargo run -p arbor-demo
//! ```
//!
//! Typical fields are `path` (the actor), `child`, `parent`, `host` and `error`,
//! so a single actor can be followed with a filter on its path.

/// Installs a compact `fmt` subscriber filtered by `RUST_LOG`.
///
/// Panics if a global subscriber is already set, like any `init()`.
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();
}
