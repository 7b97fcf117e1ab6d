//! # Text Protocol Operations
//!
//! Purpose: Run one command/reply exchange per operation on a checked-out
//! socket and turn the reply into a typed result.
//!
//! ## Design Principles
//! 1. **Not Pipelined**: Each command's reply is read in full before the next
//!    command is written on the same socket.
//! 2. **Expected vs. Faults**: Missing keys and error replies become failed
//!    results; only framing or transport faults return `Err`.
//! 3. **Single Attempt**: No retries, except the create-if-absent step that
//!    gives counters their initial value.
//! 4. **Keep Framing Honest**: A reply that leaves the stream position unknown
//!    retires the socket before the error is returned.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::debug;

use mcline_common::{
    ClientError, ClientResult, GetResult, MutateResult, StatusCode, StoreResult, TouchResult,
};

use crate::socket::SocketIo;
use crate::text::{
    append_command, encode_command, expiration_seconds, read_response, Response,
    COMMAND_TERMINATOR,
};

/// Longest key the text protocol accepts.
pub const MAX_KEY_LENGTH: usize = 250;

/// Largest value block accepted from a `VALUE` header (memcached's item cap).
pub const MAX_VALUE_LENGTH: usize = 1024 * 1024 * 1024;

const BLOCK_READ_CHUNK: usize = 64 * 1024;

/// Counter direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationMode {
    Increment,
    Decrement,
}

impl MutationMode {
    #[inline]
    pub fn verb(self) -> &'static str {
        match self {
            MutationMode::Increment => "incr",
            MutationMode::Decrement => "decr",
        }
    }
}

/// Storage command flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Store unconditionally.
    Set,
    /// Store only if the key is absent.
    Add,
    /// Store only if the key is present.
    Replace,
}

impl StoreMode {
    #[inline]
    pub fn verb(self) -> &'static str {
        match self {
            StoreMode::Set => "set",
            StoreMode::Add => "add",
            StoreMode::Replace => "replace",
        }
    }
}

/// Rejects keys the text protocol cannot carry.
///
/// Keys must be 1..=250 bytes without whitespace or control characters.
pub fn validate_key(key: &str) -> ClientResult<()> {
    if key.is_empty() {
        return Err(ClientError::InvalidKey("key is empty".into()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(ClientError::InvalidKey(format!(
            "key is {} bytes, limit is {}",
            key.len(),
            MAX_KEY_LENGTH
        )));
    }
    if key.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
        return Err(ClientError::InvalidKey(format!(
            "key {:?} contains whitespace or control characters",
            key
        )));
    }
    Ok(())
}

/// Maps an error classification onto a status code and message.
pub fn failure_status(response: &Response) -> (StatusCode, Option<String>) {
    match response {
        Response::GenericError => (StatusCode::UNKNOWN_COMMAND, None),
        Response::ClientError(message) => {
            let code = if message.contains("non-numeric") {
                StatusCode::NON_NUMERIC_VALUE
            } else {
                StatusCode::INVALID_ARGUMENTS
            };
            (code, Some(message.clone()))
        }
        Response::ServerError(message) => {
            let code = if message.contains("memory") {
                StatusCode::OUT_OF_MEMORY
            } else {
                StatusCode::INTERNAL_ERROR
            };
            (code, Some(message.clone()))
        }
        Response::Success(line) => (StatusCode::INTERNAL_ERROR, Some(line.clone())),
    }
}

enum MutateReply {
    Value(u64),
    NotFound,
    Failed(MutateResult),
}

/// Increments or decrements a counter, creating it with `initial` when absent.
///
/// The counter is created with `add`; if another client creates it first
/// (`NOT_STORED`), the mutation is sent once more.
pub fn mutate<S: SocketIo + ?Sized>(
    socket: &mut S,
    mode: MutationMode,
    key: &str,
    initial: u64,
    delta: u64,
    expiry: Duration,
) -> ClientResult<MutateResult> {
    match send_mutate(socket, mode, key, delta)? {
        MutateReply::Value(value) => return Ok(MutateResult::success(value)),
        MutateReply::Failed(result) => return Ok(result),
        MutateReply::NotFound => {}
    }

    let seed = initial.to_string();
    let created = store(socket, StoreMode::Add, key, 0, seed.as_bytes(), expiry)?;
    if created.is_success() {
        return Ok(MutateResult::success(initial));
    }
    if created.status_code() != Some(StatusCode::ITEM_NOT_STORED) {
        let code = created.status_code().unwrap_or(StatusCode::INTERNAL_ERROR);
        return Ok(MutateResult::failure(code, created.message().map(str::to_string)));
    }

    debug!(key, "counter created concurrently, repeating {}", mode.verb());
    match send_mutate(socket, mode, key, delta)? {
        MutateReply::Value(value) => Ok(MutateResult::success(value)),
        MutateReply::Failed(result) => Ok(result),
        MutateReply::NotFound => Ok(MutateResult::failure(StatusCode::KEY_NOT_FOUND, None)),
    }
}

fn send_mutate<S: SocketIo + ?Sized>(
    socket: &mut S,
    mode: MutationMode,
    key: &str,
    delta: u64,
) -> ClientResult<MutateReply> {
    let command = format!("{} {} {}{}", mode.verb(), key, delta, COMMAND_TERMINATOR);
    debug!(command = command.trim_end(), "sending command");
    socket.write(&encode_command(&command))?;

    match read_response(socket)? {
        Response::Success(line) if line == "NOT_FOUND" => Ok(MutateReply::NotFound),
        // Decrements may come back space padded.
        Response::Success(line) => match line.trim_end().parse::<u64>() {
            Ok(value) => Ok(MutateReply::Value(value)),
            Err(_) => Err(ClientError::UnexpectedResponse(line)),
        },
        other => {
            let (code, message) = failure_status(&other);
            Ok(MutateReply::Failed(MutateResult::failure(code, message)))
        }
    }
}

/// Refreshes the expiry of `key` without touching its value.
pub fn touch<S: SocketIo + ?Sized>(
    socket: &mut S,
    key: &str,
    expiry: Duration,
) -> ClientResult<TouchResult> {
    let command = format!(
        "touch {} {}{}",
        key,
        expiration_seconds(expiry),
        COMMAND_TERMINATOR
    );
    debug!(command = command.trim_end(), "sending command");
    socket.write(&encode_command(&command))?;

    match read_response(socket)? {
        Response::Success(line) if line == "TOUCHED" => Ok(TouchResult::success()),
        Response::Success(line) if line == "NOT_FOUND" => {
            Ok(TouchResult::failure(StatusCode::KEY_NOT_FOUND, None))
        }
        Response::Success(line) => Err(ClientError::UnexpectedResponse(line)),
        other => {
            let (code, message) = failure_status(&other);
            Ok(TouchResult::failure(code, message))
        }
    }
}

/// Stores `value` with the given client flags.
pub fn store<S: SocketIo + ?Sized>(
    socket: &mut S,
    mode: StoreMode,
    key: &str,
    flags: u32,
    value: &[u8],
    expiry: Duration,
) -> ClientResult<StoreResult> {
    let command = format!(
        "{} {} {} {} {}{}",
        mode.verb(),
        key,
        flags,
        expiration_seconds(expiry),
        value.len(),
        COMMAND_TERMINATOR
    );
    debug!(command = command.trim_end(), "sending command");

    let mut segments = Vec::with_capacity(3);
    append_command(&command, &mut segments);
    segments.push(Bytes::copy_from_slice(value));
    append_command(COMMAND_TERMINATOR, &mut segments);
    socket.write(&segments)?;

    match read_response(socket)? {
        Response::Success(line) => match line.as_str() {
            "STORED" => Ok(StoreResult::success()),
            "NOT_STORED" => Ok(StoreResult::failure(StatusCode::ITEM_NOT_STORED, None)),
            "EXISTS" => Ok(StoreResult::failure(StatusCode::KEY_EXISTS, None)),
            "NOT_FOUND" => Ok(StoreResult::failure(StatusCode::KEY_NOT_FOUND, None)),
            _ => Err(ClientError::UnexpectedResponse(line)),
        },
        other => {
            let (code, message) = failure_status(&other);
            // memcached reports oversized items as "SERVER_ERROR object too large for cache".
            let code = match message.as_deref() {
                Some(m) if m.contains("too large") => StatusCode::VALUE_TOO_LARGE,
                _ => code,
            };
            Ok(StoreResult::failure(code, message))
        }
    }
}

/// Removes `key`.
pub fn delete<S: SocketIo + ?Sized>(socket: &mut S, key: &str) -> ClientResult<StoreResult> {
    let command = format!("delete {}{}", key, COMMAND_TERMINATOR);
    debug!(command = command.trim_end(), "sending command");
    socket.write(&encode_command(&command))?;

    match read_response(socket)? {
        Response::Success(line) if line == "DELETED" => Ok(StoreResult::success()),
        Response::Success(line) if line == "NOT_FOUND" => {
            Ok(StoreResult::failure(StatusCode::KEY_NOT_FOUND, None))
        }
        Response::Success(line) => Err(ClientError::UnexpectedResponse(line)),
        other => {
            let (code, message) = failure_status(&other);
            Ok(StoreResult::failure(code, message))
        }
    }
}

/// Fetches `key` and its client flags.
pub fn get<S: SocketIo + ?Sized>(socket: &mut S, key: &str) -> ClientResult<GetResult> {
    let command = format!("get {}{}", key, COMMAND_TERMINATOR);
    debug!(command = command.trim_end(), "sending command");
    socket.write(&encode_command(&command))?;

    let mut found: Option<(Bytes, u32)> = None;
    loop {
        let line = match read_response(socket)? {
            Response::Success(line) => line,
            other => {
                let (code, message) = failure_status(&other);
                return Ok(GetResult::failure(code, message));
            }
        };

        if line == "END" {
            return Ok(match found {
                Some((value, flags)) => GetResult::hit(value, flags),
                None => GetResult::miss(),
            });
        }

        let Some(header) = parse_value_header(&line) else {
            return Err(desync(socket, line));
        };
        if header.key != key || found.is_some() {
            return Err(desync(socket, line));
        }
        if header.length > MAX_VALUE_LENGTH {
            socket.mark_dead("value block exceeded sanity limit");
            return Err(ClientError::SanityLimitExceeded {
                limit: MAX_VALUE_LENGTH,
            });
        }

        let mut block = read_block(socket, header.length + 2)?;
        if !block.ends_with(b"\r\n") {
            return Err(desync(socket, "value block missing terminator".to_string()));
        }
        block.truncate(header.length);
        found = Some((block.freeze(), header.flags));
    }
}

/// Reads `length` bytes, growing the buffer only as data arrives.
fn read_block<S: SocketIo + ?Sized>(socket: &mut S, length: usize) -> ClientResult<BytesMut> {
    let mut block = BytesMut::with_capacity(length.min(BLOCK_READ_CHUNK));
    while block.len() < length {
        let start = block.len();
        let step = (length - start).min(BLOCK_READ_CHUNK);
        block.resize(start + step, 0);
        socket.read_exact(&mut block[start..])?;
    }
    Ok(block)
}

struct ValueHeader<'a> {
    key: &'a str,
    flags: u32,
    length: usize,
}

/// Parses `VALUE <key> <flags> <bytes> [<cas>]`.
fn parse_value_header(line: &str) -> Option<ValueHeader<'_>> {
    let mut parts = line.split(' ');
    if parts.next()? != "VALUE" {
        return None;
    }
    let key = parts.next()?;
    let flags = parts.next()?.parse().ok()?;
    let length = parts.next()?.parse().ok()?;
    if let Some(cas) = parts.next() {
        cas.parse::<u64>().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(ValueHeader { key, flags, length })
}

fn desync<S: SocketIo + ?Sized>(socket: &mut S, line: String) -> ClientError {
    socket.mark_dead("reply framing lost");
    ClientError::UnexpectedResponse(line)
}
