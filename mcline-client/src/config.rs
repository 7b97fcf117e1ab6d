//! # Client Configuration
//!
//! Plain configuration value consumed by `McClient::with_config`. Reading it
//! from a file or environment is left to the host application; the struct
//! only derives serde so any format can feed it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use mcline_common::{ClientError, ClientResult, ServerNode};

use crate::locator::DEFAULT_MUTATIONS;
use crate::pool::PoolOptions;
use crate::socket::SocketOptions;

/// Configuration for the client, its locator and its pools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server endpoints, e.g. "10.0.0.1:11211".
    pub servers: Vec<String>,
    /// Ring positions per server.
    pub node_locator_mutations: usize,
    /// Sockets opened per node when the client starts.
    pub min_pool_size: usize,
    /// Maximum sockets per node (idle + in use).
    pub max_pool_size: usize,
    #[serde(rename = "connection_timeout_ms", with = "duration_ms")]
    pub connection_timeout: Duration,
    #[serde(rename = "receive_timeout_ms", with = "duration_ms")]
    pub receive_timeout: Duration,
    #[serde(rename = "send_timeout_ms", with = "duration_ms")]
    pub send_timeout: Duration,
    /// How long an operation waits for a free socket.
    #[serde(rename = "queue_timeout_ms", with = "duration_ms")]
    pub queue_timeout: Duration,
    /// How long a node that refused a connection is skipped.
    #[serde(rename = "dead_timeout_ms", with = "duration_ms")]
    pub dead_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            servers: vec!["127.0.0.1:11211".to_string()],
            node_locator_mutations: DEFAULT_MUTATIONS,
            min_pool_size: 0,
            max_pool_size: 20,
            connection_timeout: Duration::from_secs(10),
            receive_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(10),
            queue_timeout: Duration::from_millis(100),
            dead_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    /// Configuration for the given servers with every other field defaulted.
    pub fn with_servers<I, S>(servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ClientConfig {
            servers: servers.into_iter().map(Into::into).collect(),
            ..ClientConfig::default()
        }
    }

    /// Checks the configuration for values the client cannot run with.
    pub fn validate(&self) -> ClientResult<()> {
        if self.servers.is_empty() {
            return Err(ClientError::Config("at least one server is required".into()));
        }
        if self.max_pool_size == 0 {
            return Err(ClientError::Config("max_pool_size must be > 0".into()));
        }
        if self.min_pool_size > self.max_pool_size {
            return Err(ClientError::Config(
                "min_pool_size must not exceed max_pool_size".into(),
            ));
        }
        self.nodes().map(|_| ())
    }

    /// Parses `servers` into nodes, preserving order.
    pub fn nodes(&self) -> ClientResult<Vec<ServerNode>> {
        self.servers.iter().map(|s| ServerNode::parse(s)).collect()
    }

    pub(crate) fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            min_size: self.min_pool_size,
            max_size: self.max_pool_size,
            queue_timeout: self.queue_timeout,
            dead_timeout: self.dead_timeout,
            socket: SocketOptions {
                connection_timeout: self.connection_timeout,
                receive_timeout: self.receive_timeout,
                send_timeout: self.send_timeout,
            },
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
