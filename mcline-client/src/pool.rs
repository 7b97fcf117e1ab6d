//! # Socket Pool
//!
//! Purpose: Reuse TCP connections per cache node to avoid a handshake per
//! operation, while keeping the number of connections bounded.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable sockets per node.
//! 2. **Minimal Locking**: Hold the mutex only while moving idle sockets; never
//!    across a connect or any socket I/O.
//! 3. **Bounded Waiting**: A full pool makes callers wait on a condition
//!    variable up to `queue_timeout`, then fail.
//! 4. **RAII Checkin**: Dropping a `SocketGuard` returns a usable socket and
//!    discards a dead one.
//! 5. **Node Health**: A failed connect parks the whole node for
//!    `dead_timeout` so callers fail fast instead of piling onto it.

use std::collections::{HashMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use mcline_common::{ClientError, ClientResult, ServerNode};

use crate::socket::{PooledSocket, SocketIo, SocketOptions};

/// Sizing and timing for every node's pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    /// Sockets opened eagerly by `warm_up`.
    pub min_size: usize,
    /// Maximum sockets (idle + checked out) per node.
    pub max_size: usize,
    /// How long `checkout` waits for a free slot.
    pub queue_timeout: Duration,
    /// How long a node is skipped after a failed connect.
    pub dead_timeout: Duration,
    pub socket: SocketOptions,
}

impl Default for PoolOptions {
    fn default() -> Self {
        PoolOptions {
            min_size: 0,
            max_size: 20,
            queue_timeout: Duration::from_millis(100),
            dead_timeout: Duration::from_secs(10),
            socket: SocketOptions::default(),
        }
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub total: usize,
    pub node_dead: bool,
}

struct PoolState {
    idle: VecDeque<PooledSocket>,
    total: usize,
    next_id: u64,
    dead_until: Option<Instant>,
}

struct PoolInner {
    node: ServerNode,
    options: PoolOptions,
    state: Mutex<PoolState>,
    available: Condvar,
}

/// Connection pool for a single node.
#[derive(Clone)]
pub struct SocketPool {
    inner: Arc<PoolInner>,
}

impl SocketPool {
    pub fn new(node: ServerNode, options: PoolOptions) -> Self {
        let state = PoolState {
            idle: VecDeque::with_capacity(options.max_size),
            total: 0,
            next_id: 1,
            dead_until: None,
        };
        SocketPool {
            inner: Arc::new(PoolInner {
                node,
                options,
                state: Mutex::new(state),
                available: Condvar::new(),
            }),
        }
    }

    #[inline]
    pub fn node(&self) -> &ServerNode {
        &self.inner.node
    }

    /// Borrows a socket, connecting a new one when the pool has room.
    ///
    /// # Errors
    /// - `NodeDead` while the node is inside its dead timeout.
    /// - `PoolTimeout` when every slot stays busy for `queue_timeout`.
    /// - `Transport` when connecting fails (the node is then parked).
    pub fn checkout(&self) -> ClientResult<SocketGuard> {
        let deadline = Instant::now() + self.inner.options.queue_timeout;
        let mut state = self.lock();

        loop {
            if let Some(until) = state.dead_until {
                if Instant::now() < until {
                    return Err(ClientError::NodeDead {
                        node: self.inner.node.to_string(),
                    });
                }
                state.dead_until = None;
                info!(node = %self.inner.node, "dead timeout elapsed, retrying node");
            }

            // Only live sockets are checked in, and idle ones see no I/O.
            if let Some(socket) = state.idle.pop_front() {
                return Ok(SocketGuard::new(self.clone(), socket));
            }

            if state.total < self.inner.options.max_size {
                state.total += 1;
                let id = state.next_id;
                state.next_id += 1;
                drop(state);
                return self.open(id);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ClientError::PoolTimeout {
                    node: self.inner.node.to_string(),
                });
            }
            let (guard, _) = self
                .inner
                .available
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    /// Opens `min_size` sockets up front.
    pub fn warm_up(&self) -> ClientResult<()> {
        let mut opened = Vec::with_capacity(self.inner.options.min_size);
        while self.stats().total < self.inner.options.min_size {
            opened.push(self.checkout()?);
        }
        // Guards check themselves back in on drop.
        drop(opened);
        Ok(())
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            idle: state.idle.len(),
            total: state.total,
            node_dead: state
                .dead_until
                .is_some_and(|until| Instant::now() < until),
        }
    }

    fn open(&self, id: u64) -> ClientResult<SocketGuard> {
        match PooledSocket::connect(id, &self.inner.node, &self.inner.options.socket) {
            Ok(socket) => Ok(SocketGuard::new(self.clone(), socket)),
            Err(err) => {
                {
                    let mut state = self.lock();
                    state.total = state.total.saturating_sub(1);
                    state.dead_until = Some(Instant::now() + self.inner.options.dead_timeout);
                }
                warn!(node = %self.inner.node, error = %err, "connect failed, marking node dead");
                self.inner.available.notify_all();
                Err(err)
            }
        }
    }

    fn checkin(&self, socket: PooledSocket) {
        {
            let mut state = self.lock();
            if socket.is_alive() {
                state.idle.push_back(socket);
            } else {
                state.total = state.total.saturating_sub(1);
                debug!(socket = socket.id(), node = %self.inner.node, "discarding dead socket");
            }
        }
        self.inner.available.notify_one();
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// RAII wrapper returning a socket to its pool on drop.
///
/// The guard is the only path to the socket between checkout and checkin, so
/// a socket is never shared between callers.
pub struct SocketGuard {
    pool: SocketPool,
    socket: Option<PooledSocket>,
}

impl SocketGuard {
    fn new(pool: SocketPool, socket: PooledSocket) -> Self {
        SocketGuard {
            pool,
            socket: Some(socket),
        }
    }
}

impl Deref for SocketGuard {
    type Target = PooledSocket;

    fn deref(&self) -> &PooledSocket {
        self.socket.as_ref().expect("socket present until drop")
    }
}

impl DerefMut for SocketGuard {
    fn deref_mut(&mut self) -> &mut PooledSocket {
        self.socket.as_mut().expect("socket present until drop")
    }
}

impl Drop for SocketGuard {
    fn drop(&mut self) {
        if let Some(socket) = self.socket.take() {
            self.pool.checkin(socket);
        }
    }
}

/// Pools for every node the client routes to.
///
/// Pools are created on first use, so a locator rebuild only needs
/// `retain` to drop pools of removed nodes.
pub struct ServerPool {
    options: PoolOptions,
    pools: Mutex<HashMap<ServerNode, SocketPool>>,
}

impl ServerPool {
    pub fn new(options: PoolOptions) -> Self {
        ServerPool {
            options,
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the pool for `node`, creating it if needed.
    pub fn pool_for(&self, node: &ServerNode) -> SocketPool {
        let mut pools = self.lock();
        pools
            .entry(node.clone())
            .or_insert_with(|| self.create(node))
            .clone()
    }

    /// Returns the pool for `node` if `is_member` still accepts it.
    ///
    /// `is_member` runs under the map lock, so a node dropped by a concurrent
    /// `retain` is never given a new pool.
    pub fn member_pool(
        &self,
        node: &ServerNode,
        is_member: impl FnOnce(&ServerNode) -> bool,
    ) -> Option<SocketPool> {
        let mut pools = self.lock();
        if let Some(pool) = pools.get(node) {
            return Some(pool.clone());
        }
        if !is_member(node) {
            return None;
        }
        let pool = self.create(node);
        pools.insert(node.clone(), pool.clone());
        Some(pool)
    }

    fn create(&self, node: &ServerNode) -> SocketPool {
        info!(node = %node, max_size = self.options.max_size, "creating socket pool");
        SocketPool::new(node.clone(), self.options.clone())
    }

    /// Drops pools for nodes not in `nodes`. Idle sockets close with them.
    pub fn retain(&self, nodes: &[ServerNode]) {
        let mut pools = self.lock();
        pools.retain(|node, _| {
            let keep = nodes.contains(node);
            if !keep {
                info!(node = %node, "dropping socket pool");
            }
            keep
        });
    }

    /// Stats per node, sorted by endpoint.
    pub fn stats(&self) -> Vec<(ServerNode, PoolStats)> {
        let pools: Vec<SocketPool> = self.lock().values().cloned().collect();
        let mut stats: Vec<_> = pools
            .iter()
            .map(|pool| (pool.node().clone(), pool.stats()))
            .collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ServerNode, SocketPool>> {
        self.pools.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
