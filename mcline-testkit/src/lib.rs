//! # McLine Test Kit
//!
//! Purpose: Give integration tests a real TCP peer that speaks the memcached
//! text protocol, without an external server.
//!
//! ## Notes
//! - `MockServer` runs a tokio runtime on its own thread, so blocking client
//!   code can drive it from ordinary `#[test]` functions.
//! - The stand-in keeps items in a single mutex-guarded map with second
//!   granularity expiry. It exists for tests only.

mod server;
mod store;

pub use server::MockServer;

/// Installs a `tracing` subscriber honouring `RUST_LOG`, once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
