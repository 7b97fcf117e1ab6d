//! # Node and Status Types
//!
//! Identity of a cache server and the status vocabulary reported by
//! operation results.
//!
//! ## Design Principles
//!
//! 1. **Value Identity**: A node is its endpoint; two nodes with the same
//!    host and port are the same node.
//! 2. **Stable Ring Input**: `ServerNode::identity` is the exact string hashed
//!    onto the locator ring, so it must never change format.
//! 3. **Protocol-Neutral Status**: `StatusCode` reuses memcached's numeric
//!    status vocabulary so text replies map onto well-known codes.

use std::fmt;
use std::str::FromStr;

use crate::error::{ClientError, ClientResult};

/// Default memcached port used when an endpoint omits one.
pub const DEFAULT_PORT: u16 = 11211;

/// One cache server, identified by its network endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerNode {
    host: String,
    port: u16,
}

impl ServerNode {
    /// Creates a node from an explicit host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ServerNode {
            host: host.into(),
            port,
        }
    }

    /// Parses `host:port`, `host` (default port) or `[v6]:port`.
    ///
    /// # Errors
    /// Returns `ClientError::InvalidAddress` for an empty host or bad port.
    pub fn parse(endpoint: &str) -> ClientResult<Self> {
        let endpoint = endpoint.trim();
        let invalid = || ClientError::InvalidAddress(endpoint.to_string());

        let (host, port) = if let Some(rest) = endpoint.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
            match tail.strip_prefix(':') {
                Some(port) => (host, port.parse::<u16>().map_err(|_| invalid())?),
                None if tail.is_empty() => (host, DEFAULT_PORT),
                None => return Err(invalid()),
            }
        } else {
            match endpoint.rsplit_once(':') {
                Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
                None => (endpoint, DEFAULT_PORT),
            }
        };

        if host.is_empty() || port == 0 {
            return Err(invalid());
        }
        Ok(ServerNode::new(host, port))
    }

    /// Host name or address literal.
    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// String hashed onto the locator ring (`host:port`).
    pub fn identity(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ServerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for ServerNode {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServerNode::parse(s)
    }
}

/// Operation status code.
///
/// Values follow memcached's status numbering so callers can compare results
/// across protocol variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const SUCCESS: StatusCode = StatusCode(0x0000);
    pub const KEY_NOT_FOUND: StatusCode = StatusCode(0x0001);
    pub const KEY_EXISTS: StatusCode = StatusCode(0x0002);
    pub const VALUE_TOO_LARGE: StatusCode = StatusCode(0x0003);
    pub const INVALID_ARGUMENTS: StatusCode = StatusCode(0x0004);
    pub const ITEM_NOT_STORED: StatusCode = StatusCode(0x0005);
    pub const NON_NUMERIC_VALUE: StatusCode = StatusCode(0x0006);
    pub const UNKNOWN_COMMAND: StatusCode = StatusCode(0x0081);
    pub const OUT_OF_MEMORY: StatusCode = StatusCode(0x0082);
    pub const INTERNAL_ERROR: StatusCode = StatusCode(0x0084);

    /// Returns the raw code.
    #[inline]
    pub const fn get(&self) -> u16 {
        self.0
    }

    /// Returns true for `SUCCESS`.
    #[inline]
    pub const fn is_success(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            StatusCode::SUCCESS => "success",
            StatusCode::KEY_NOT_FOUND => "key not found",
            StatusCode::KEY_EXISTS => "key exists",
            StatusCode::VALUE_TOO_LARGE => "value too large",
            StatusCode::INVALID_ARGUMENTS => "invalid arguments",
            StatusCode::ITEM_NOT_STORED => "item not stored",
            StatusCode::NON_NUMERIC_VALUE => "non-numeric value",
            StatusCode::UNKNOWN_COMMAND => "unknown command",
            StatusCode::OUT_OF_MEMORY => "out of memory",
            StatusCode::INTERNAL_ERROR => "internal error",
            _ => return write!(f, "status 0x{:04x}", self.0),
        };
        f.write_str(name)
    }
}
