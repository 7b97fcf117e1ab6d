//! # Pooled Socket
//!
//! Purpose: Own one TCP connection to one cache node and expose the byte-level
//! primitives the text codec is built on.
//!
//! ## Design Principles
//! 1. **Two-State Liveness**: A socket is `Usable` or `Dead`; `mark_dead` is the
//!    only transition and it is one-way.
//! 2. **Fail Closed**: Any I/O error, EOF or timeout retires the socket before
//!    the error reaches the caller.
//! 3. **Batched Writes**: All segments of a command go out in one vectored
//!    write with Nagle disabled.
//! 4. **Seam for Tests**: The codec talks to `SocketIo`, not to `TcpStream`.

use std::fmt;
use std::io::{self, BufReader, IoSlice, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, warn};

use mcline_common::{ClientError, ClientResult, ServerNode};

/// Liveness of a pooled socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// Framing is intact; the socket may be reused.
    Usable,
    /// The connection is closed and must never be checked out again.
    Dead,
}

/// Byte-level operations the text codec needs from a connection.
pub trait SocketIo {
    /// Blocking single-byte read.
    fn read_byte(&mut self) -> ClientResult<u8>;

    /// Fills `buf` completely.
    fn read_exact(&mut self, buf: &mut [u8]) -> ClientResult<()>;

    /// Writes all segments as one logical transmission.
    fn write(&mut self, segments: &[Bytes]) -> ClientResult<()>;

    /// Retires the socket. Calling it on a dead socket is a no-op.
    fn mark_dead(&mut self, reason: &str);

    /// Current liveness.
    fn state(&self) -> SocketState;

    /// One-line diagnostic description.
    fn status(&self) -> String;

    #[inline]
    fn is_alive(&self) -> bool {
        self.state() == SocketState::Usable
    }
}

/// Timeouts applied to every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketOptions {
    pub connection_timeout: Duration,
    pub receive_timeout: Duration,
    pub send_timeout: Duration,
}

impl Default for SocketOptions {
    fn default() -> Self {
        SocketOptions {
            connection_timeout: Duration::from_secs(10),
            receive_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(10),
        }
    }
}

/// One TCP connection to a cache node.
pub struct PooledSocket {
    id: u64,
    node: ServerNode,
    state: SocketState,
    // Buffered reader keeps `read_byte` from costing a syscall per byte.
    reader: BufReader<TcpStream>,
    created_at: Instant,
    bytes_read: u64,
    bytes_written: u64,
}

impl PooledSocket {
    /// Opens a connection to `node`, trying each resolved address in turn.
    pub fn connect(id: u64, node: &ServerNode, options: &SocketOptions) -> ClientResult<Self> {
        let addrs = (node.host(), node.port())
            .to_socket_addrs()
            .map_err(|_| ClientError::InvalidAddress(node.to_string()))?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, options.connection_timeout) {
                Ok(stream) => return Self::from_stream(id, node.clone(), stream, options),
                Err(err) => last_err = Some(err),
            }
        }

        Err(match last_err {
            Some(err) => ClientError::Transport(err),
            None => ClientError::InvalidAddress(node.to_string()),
        })
    }

    /// Wraps an already connected stream.
    pub fn from_stream(
        id: u64,
        node: ServerNode,
        stream: TcpStream,
        options: &SocketOptions,
    ) -> ClientResult<Self> {
        // Zero durations are rejected by the std setters; treat them as "no timeout".
        stream.set_read_timeout(non_zero(options.receive_timeout))?;
        stream.set_write_timeout(non_zero(options.send_timeout))?;
        // Disable Nagle so a command is never held back waiting for more bytes.
        stream.set_nodelay(true)?;

        debug!(socket = id, node = %node, "socket connected");
        Ok(PooledSocket {
            id,
            node,
            state: SocketState::Usable,
            reader: BufReader::new(stream),
            created_at: Instant::now(),
            bytes_read: 0,
            bytes_written: 0,
        })
    }

    /// Pool-local socket number.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Node this socket is connected to.
    #[inline]
    pub fn node(&self) -> &ServerNode {
        &self.node
    }

    fn ensure_alive(&self) -> ClientResult<()> {
        match self.state {
            SocketState::Usable => Ok(()),
            SocketState::Dead => Err(ClientError::Transport(io::Error::new(
                io::ErrorKind::NotConnected,
                "socket is dead",
            ))),
        }
    }

    fn fail(&mut self, err: io::Error) -> ClientError {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            self.mark_dead("connection closed by server");
            return ClientError::ConnectionClosed;
        }
        self.mark_dead(&err.to_string());
        ClientError::Transport(err)
    }
}

impl SocketIo for PooledSocket {
    fn read_byte(&mut self) -> ClientResult<u8> {
        self.ensure_alive()?;
        let mut byte = [0u8; 1];
        loop {
            match self.reader.read(&mut byte) {
                Ok(0) => return Err(self.fail(io::ErrorKind::UnexpectedEof.into())),
                Ok(_) => {
                    self.bytes_read += 1;
                    return Ok(byte[0]);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(self.fail(err)),
            }
        }
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> ClientResult<()> {
        self.ensure_alive()?;
        match self.reader.read_exact(buf) {
            Ok(()) => {
                self.bytes_read += buf.len() as u64;
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn write(&mut self, segments: &[Bytes]) -> ClientResult<()> {
        self.ensure_alive()?;
        let mut slices: Vec<IoSlice<'_>> = segments
            .iter()
            .filter(|segment| !segment.is_empty())
            .map(|segment| IoSlice::new(segment))
            .collect();
        let total: usize = slices.iter().map(|slice| slice.len()).sum();

        match write_all_vectored(self.reader.get_mut(), &mut slices) {
            Ok(()) => {
                self.bytes_written += total as u64;
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn mark_dead(&mut self, reason: &str) {
        if self.state == SocketState::Dead {
            return;
        }
        self.state = SocketState::Dead;
        warn!(socket = self.id, node = %self.node, reason, "marking socket dead");
        // The peer may already be gone; shutdown failures carry no information.
        let _ = self.reader.get_ref().shutdown(Shutdown::Both);
    }

    #[inline]
    fn state(&self) -> SocketState {
        self.state
    }

    fn status(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PooledSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "socket #{} to {}: state={:?}, age={:?}, read={}B, written={}B",
            self.id,
            self.node,
            self.state,
            self.created_at.elapsed(),
            self.bytes_read,
            self.bytes_written
        )
    }
}

impl fmt::Debug for PooledSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledSocket")
            .field("id", &self.id)
            .field("node", &self.node)
            .field("state", &self.state)
            .finish()
    }
}

fn non_zero(timeout: Duration) -> Option<Duration> {
    if timeout.is_zero() {
        None
    } else {
        Some(timeout)
    }
}

fn write_all_vectored(stream: &mut TcpStream, mut slices: &mut [IoSlice<'_>]) -> io::Result<()> {
    while !slices.is_empty() {
        match stream.write_vectored(slices) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(written) => IoSlice::advance_slices(&mut slices, written),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    stream.flush()
}

/// In-memory socket used by unit tests across the crate.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::io::Cursor;

    /// Replays a fixed byte script and records every write.
    pub(crate) struct ScriptedSocket {
        input: Cursor<Vec<u8>>,
        pub(crate) written: Vec<u8>,
        state: SocketState,
        pub(crate) dead_reasons: Vec<String>,
    }

    impl ScriptedSocket {
        pub(crate) fn new(input: impl Into<Vec<u8>>) -> Self {
            ScriptedSocket {
                input: Cursor::new(input.into()),
                written: Vec::new(),
                state: SocketState::Usable,
                dead_reasons: Vec::new(),
            }
        }

        pub(crate) fn written_str(&self) -> String {
            String::from_utf8_lossy(&self.written).into_owned()
        }

        pub(crate) fn remaining(&self) -> usize {
            self.input.get_ref().len() - self.input.position() as usize
        }
    }

    impl SocketIo for ScriptedSocket {
        fn read_byte(&mut self) -> ClientResult<u8> {
            let mut byte = [0u8; 1];
            match self.input.read(&mut byte) {
                Ok(1) => Ok(byte[0]),
                _ => {
                    self.mark_dead("script exhausted");
                    Err(ClientError::ConnectionClosed)
                }
            }
        }

        fn read_exact(&mut self, buf: &mut [u8]) -> ClientResult<()> {
            if self.input.read_exact(buf).is_err() {
                self.mark_dead("script exhausted");
                return Err(ClientError::ConnectionClosed);
            }
            Ok(())
        }

        fn write(&mut self, segments: &[Bytes]) -> ClientResult<()> {
            for segment in segments {
                self.written.extend_from_slice(segment);
            }
            Ok(())
        }

        fn mark_dead(&mut self, reason: &str) {
            if self.state == SocketState::Usable {
                self.state = SocketState::Dead;
                self.dead_reasons.push(reason.to_string());
            }
        }

        fn state(&self) -> SocketState {
            self.state
        }

        fn status(&self) -> String {
            format!("scripted socket at offset {}", self.input.position())
        }
    }
}
