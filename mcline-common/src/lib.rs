// mcline-common - Shared types for the McLine memcached client
//
// This crate defines node identities, status codes, operation results and the
// client error taxonomy.

pub mod error;
pub mod results;
pub mod types;

// Re-export for convenience
pub use error::*;
pub use results::*;
pub use types::*;
