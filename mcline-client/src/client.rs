//! # Client API
//!
//! Purpose: Expose a compact, blocking API over the locator, the per-node
//! socket pools and the text protocol.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `McClient` hides routing, pooling and framing.
//! 2. **Share Freely**: The client is `Send + Sync`; callers on many threads
//!    use one instance.
//! 3. **Fail Fast**: Bad keys and an empty ring fail before any I/O.
//! 4. **Typed Outcomes**: Server refusals come back as failed results; only
//!    faults are `Err`.

use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use mcline_common::{
    ClientResult, GetResult, MutateResult, ServerNode, StoreResult, TouchResult,
};

use crate::config::ClientConfig;
use crate::locator::{NodeLocator, SharedLocator};
use crate::ops::{self, MutationMode, StoreMode};
use crate::pool::{PoolStats, ServerPool};
use crate::socket::{PooledSocket, SocketIo};

/// Memcached text-protocol client with consistent-hash routing.
///
/// Each call validates the key, resolves the owning node, borrows a socket
/// from that node's pool, runs one exchange and hands the socket back.
pub struct McClient {
    locator: SharedLocator,
    pools: ServerPool,
    mutations: usize,
}

impl McClient {
    /// Creates a client for the given endpoints with default settings.
    pub fn connect<I, S>(servers: I) -> ClientResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_config(ClientConfig::with_servers(servers))
    }

    /// Creates a client from a full configuration.
    ///
    /// Sockets are opened lazily unless `min_pool_size` asks for warm pools;
    /// a node that cannot be reached during warm-up is only logged, since
    /// its pool will keep failing fast until the dead timeout passes.
    pub fn with_config(config: ClientConfig) -> ClientResult<Self> {
        config.validate()?;
        let nodes = config.nodes()?;
        let locator = NodeLocator::new(nodes, config.node_locator_mutations);
        info!(
            nodes = locator.nodes().len(),
            ring = locator.ring_len(),
            "client initialized"
        );

        let client = McClient {
            pools: ServerPool::new(config.pool_options()),
            mutations: config.node_locator_mutations,
            locator: SharedLocator::new(locator),
        };

        if config.min_pool_size > 0 {
            let ring = client.locator.snapshot();
            for node in ring.nodes() {
                if let Err(err) = client.pools.pool_for(node).warm_up() {
                    warn!(node = %node, error = %err, "pool warm-up failed");
                }
            }
        }
        Ok(client)
    }

    /// Increments a counter, creating it with `initial` if absent.
    pub fn increment(&self, key: &str, initial: u64, delta: u64) -> ClientResult<MutateResult> {
        self.increment_with_expiry(key, initial, delta, Duration::ZERO)
    }

    /// Decrements a counter, creating it with `initial` if absent.
    ///
    /// The server clamps at zero; the value is reported as received.
    pub fn decrement(&self, key: &str, initial: u64, delta: u64) -> ClientResult<MutateResult> {
        self.decrement_with_expiry(key, initial, delta, Duration::ZERO)
    }

    /// `increment`, with `expiry` applied when the counter is created.
    pub fn increment_with_expiry(
        &self,
        key: &str,
        initial: u64,
        delta: u64,
        expiry: Duration,
    ) -> ClientResult<MutateResult> {
        self.with_socket(key, |socket| {
            ops::mutate(socket, MutationMode::Increment, key, initial, delta, expiry)
        })
    }

    /// `decrement`, with `expiry` applied when the counter is created.
    pub fn decrement_with_expiry(
        &self,
        key: &str,
        initial: u64,
        delta: u64,
        expiry: Duration,
    ) -> ClientResult<MutateResult> {
        self.with_socket(key, |socket| {
            ops::mutate(socket, MutationMode::Decrement, key, initial, delta, expiry)
        })
    }

    /// Replaces the expiry of `key`; the stored value is left alone.
    pub fn touch(&self, key: &str, expiry: Duration) -> ClientResult<TouchResult> {
        self.with_socket(key, |socket| ops::touch(socket, key, expiry))
    }

    /// Fetches a value.
    pub fn get(&self, key: &str) -> ClientResult<GetResult> {
        self.with_socket(key, |socket| ops::get(socket, key))
    }

    /// Convenience wrapper returning only the payload.
    pub fn get_value(&self, key: &str) -> ClientResult<Option<Bytes>> {
        Ok(self.get(key)?.into_value())
    }

    /// Stores a value unconditionally. A zero expiry never expires.
    pub fn set(&self, key: &str, value: &[u8], expiry: Duration) -> ClientResult<StoreResult> {
        self.store(StoreMode::Set, key, 0, value, expiry)
    }

    /// Stores a value only if the key is absent.
    pub fn add(&self, key: &str, value: &[u8], expiry: Duration) -> ClientResult<StoreResult> {
        self.store(StoreMode::Add, key, 0, value, expiry)
    }

    /// Stores a value only if the key exists.
    pub fn replace(&self, key: &str, value: &[u8], expiry: Duration) -> ClientResult<StoreResult> {
        self.store(StoreMode::Replace, key, 0, value, expiry)
    }

    /// Stores a value with explicit mode and client flags.
    pub fn store(
        &self,
        mode: StoreMode,
        key: &str,
        flags: u32,
        value: &[u8],
        expiry: Duration,
    ) -> ClientResult<StoreResult> {
        self.with_socket(key, |socket| {
            ops::store(socket, mode, key, flags, value, expiry)
        })
    }

    /// Removes a key.
    pub fn delete(&self, key: &str) -> ClientResult<StoreResult> {
        self.with_socket(key, |socket| ops::delete(socket, key))
    }

    /// Node that currently owns `key`.
    pub fn locate(&self, key: &str) -> ClientResult<ServerNode> {
        ops::validate_key(key)?;
        self.locator.locate(key.as_bytes())
    }

    /// Swaps in a new server list.
    ///
    /// Lookups in flight finish against the old ring; pools of removed nodes
    /// are dropped once their checked-out sockets come back.
    pub fn rebuild_nodes(&self, nodes: Vec<ServerNode>) {
        self.locator.rebuild(nodes.clone(), self.mutations);
        self.pools.retain(&nodes);
    }

    /// Pool counters per node that has been used so far.
    pub fn pool_stats(&self) -> Vec<(ServerNode, PoolStats)> {
        self.pools.stats()
    }

    fn with_socket<T>(
        &self,
        key: &str,
        op: impl FnOnce(&mut PooledSocket) -> ClientResult<T>,
    ) -> ClientResult<T> {
        ops::validate_key(key)?;
        let pool = loop {
            let node = self.locator.locate(key.as_bytes())?;
            let current = |node: &ServerNode| self.locator.snapshot().nodes().contains(node);
            if let Some(pool) = self.pools.member_pool(&node, current) {
                break pool;
            }
            debug!(node = %node, "node removed during lookup, locating again");
        };
        let mut socket = pool.checkout()?;

        let result = op(&mut socket);
        if let Err(err) = &result {
            if err.is_fatal_to_socket() {
                socket.mark_dead(&err.to_string());
            }
        }
        result
    }
}
