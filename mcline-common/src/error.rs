//! # Client Error Taxonomy
//!
//! Faults that abort an operation. Expected protocol replies such as
//! `CLIENT_ERROR` are not represented here; they travel inside the result
//! types with a status code and the server's message.

use std::io;

use thiserror::Error;

/// Result type used across the McLine crates.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection refused, reset or timed out.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// The server closed the connection in the middle of a reply.
    #[error("connection closed by server")]
    ConnectionClosed,

    /// A reply line grew past the sanity ceiling; the stream is considered corrupt.
    #[error("response line exceeded the sanity limit of {limit} bytes")]
    SanityLimitExceeded { limit: usize },

    /// The server answered with an empty line.
    #[error("empty response received")]
    EmptyResponse,

    /// The reply does not fit the command that was sent.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// The locator has no nodes configured.
    #[error("no available node")]
    NoAvailableNode,

    /// No pooled connection became available within the queue timeout.
    #[error("timed out waiting for a connection to {node}")]
    PoolTimeout { node: String },

    /// The node failed recently and is skipped until its dead timeout passes.
    #[error("node {node} is marked dead")]
    NodeDead { node: String },

    /// Key rejected before any I/O.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Endpoint could not be parsed or resolved.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Client configuration is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Returns true when the error leaves the connection unusable.
    ///
    /// Sockets that hit one of these are marked dead and never reused.
    pub fn is_fatal_to_socket(&self) -> bool {
        matches!(
            self,
            ClientError::Transport(_)
                | ClientError::ConnectionClosed
                | ClientError::SanityLimitExceeded { .. }
        )
    }
}
