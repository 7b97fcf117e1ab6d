//! # McLine Client
//!
//! Purpose: Provide a synchronous memcached text-protocol client that routes
//! keys over a consistent-hash ring and reuses pooled TCP connections.
//!
//! ## Design Principles
//! 1. **Consistent Hashing**: Node membership changes move only neighbouring keys.
//! 2. **Object Pool Pattern**: Per-node socket pools avoid a handshake per call.
//! 3. **Byte-Exact Framing**: The codec reads replies byte by byte and caps
//!    line length.
//! 4. **Typed Outcomes**: Server refusals are results; faults are errors.
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use mcline_client::McClient;
//!
//! let client = McClient::connect(["10.0.0.1:11211", "10.0.0.2:11211"])?;
//! let hits = client.increment("page:hits", 1, 1)?;
//! println!("hits = {}", hits.value());
//! client.touch("session:42", Duration::from_secs(600))?;
//! # Ok::<(), mcline_client::ClientError>(())
//! ```

mod client;
mod config;
pub mod locator;
pub mod ops;
pub mod pool;
pub mod socket;
pub mod text;

pub use client::McClient;
pub use config::ClientConfig;
pub use locator::{NodeLocator, SharedLocator};
pub use ops::{MutationMode, StoreMode};
pub use pool::{PoolOptions, PoolStats, ServerPool, SocketGuard, SocketPool};
pub use socket::{PooledSocket, SocketIo, SocketOptions, SocketState};
pub use text::Response;

pub use mcline_common::{
    ClientError, ClientResult, GetResult, MutateResult, ServerNode, StatusCode, StoreResult,
    TouchResult,
};
