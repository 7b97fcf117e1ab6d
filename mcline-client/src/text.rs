//! # Text Protocol Codec
//!
//! Purpose: Frame, classify and encode memcached text-protocol traffic on top
//! of any `SocketIo`.
//!
//! ## Design Principles
//! 1. **State-Free Functions**: Nothing is kept between calls; every function
//!    works on the socket and arguments it is given.
//! 2. **Byte-Exact Framing**: Only CR LF ends a line. A CR followed by anything
//!    else is data and is kept.
//! 3. **Sanity Ceiling**: Lines are capped at `MAX_LINE_LENGTH`; a runaway line
//!    retires the socket.
//! 4. **Replies Are Values**: `ERROR`, `CLIENT_ERROR` and `SERVER_ERROR` are
//!    ordinary `Response` variants. Only framing faults become `ClientError`.

use std::fmt::Write as _;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tracing::{debug, error};

use mcline_common::{ClientError, ClientResult};

use crate::socket::SocketIo;

/// Hard ceiling for a single reply line (10 MiB).
pub const MAX_LINE_LENGTH: usize = 10 * 1024 * 1024;

/// Terminator appended to every command line and data block.
pub const COMMAND_TERMINATOR: &str = "\r\n";

/// Relative expirations above this many seconds must be sent as Unix time.
pub const MAX_RELATIVE_EXPIRATION: u64 = 60 * 60 * 24 * 30;

const GENERIC_ERROR_RESPONSE: &[u8] = b"ERROR";
const CLIENT_ERROR_RESPONSE: &[u8] = b"CLIENT_ERROR ";
const SERVER_ERROR_RESPONSE: &[u8] = b"SERVER_ERROR ";
const ERROR_RESPONSE_LENGTH: usize = 13;

const CR: u8 = b'\r';
const LF: u8 = b'\n';

/// Classified reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Any line that is not an error; carries the full line.
    Success(String),
    /// Bare `ERROR`: unknown command or malformed request.
    GenericError,
    /// `CLIENT_ERROR <message>`: the request was invalid.
    ClientError(String),
    /// `SERVER_ERROR <message>`: the server failed, possibly transiently.
    ServerError(String),
}

/// Reads one reply line and classifies it.
pub fn read_response<S: SocketIo + ?Sized>(socket: &mut S) -> ClientResult<Response> {
    let line = read_line(socket)?;
    debug!(response = %line, "received response");
    classify(&line)
}

/// Classifies a reply line that has already been read.
///
/// # Errors
/// Returns `ClientError::EmptyResponse` for an empty line.
pub fn classify(line: &str) -> ClientResult<Response> {
    let bytes = line.as_bytes();
    if bytes.is_empty() {
        return Err(ClientError::EmptyResponse);
    }
    if bytes == GENERIC_ERROR_RESPONSE {
        return Ok(Response::GenericError);
    }
    if bytes.len() >= ERROR_RESPONSE_LENGTH {
        let (prefix, rest) = bytes.split_at(ERROR_RESPONSE_LENGTH);
        if prefix == CLIENT_ERROR_RESPONSE {
            return Ok(Response::ClientError(String::from_utf8_lossy(rest).into_owned()));
        }
        if prefix == SERVER_ERROR_RESPONSE {
            return Ok(Response::ServerError(String::from_utf8_lossy(rest).into_owned()));
        }
    }
    Ok(Response::Success(line.to_string()))
}

/// Reads a CR LF terminated line, without the terminator.
pub fn read_line<S: SocketIo + ?Sized>(socket: &mut S) -> ClientResult<String> {
    read_line_with_limit(socket, MAX_LINE_LENGTH)
}

/// Reads one line, allowing at most `limit` bytes of line content.
///
/// Only bytes that end up in the line count; the CR LF terminator does not.
pub(crate) fn read_line_with_limit<S: SocketIo + ?Sized>(
    socket: &mut S,
    limit: usize,
) -> ClientResult<String> {
    let mut line = Vec::with_capacity(50);
    let mut pending_cr = false;

    loop {
        let byte = socket.read_byte()?;

        if byte == CR {
            if pending_cr {
                // The first CR was not a terminator after all.
                push_checked(socket, &mut line, CR, limit)?;
            }
            pending_cr = true;
            continue;
        }

        if pending_cr {
            if byte == LF {
                break;
            }
            push_checked(socket, &mut line, CR, limit)?;
            pending_cr = false;
        }
        push_checked(socket, &mut line, byte, limit)?;
    }

    Ok(String::from_utf8_lossy(&line).into_owned())
}

fn push_checked<S: SocketIo + ?Sized>(
    socket: &mut S,
    line: &mut Vec<u8>,
    byte: u8,
    limit: usize,
) -> ClientResult<()> {
    line.push(byte);
    if line.len() > limit {
        log_sanity_failure(socket, line);
        socket.mark_dead("response line exceeded sanity limit");
        return Err(ClientError::SanityLimitExceeded { limit });
    }
    Ok(())
}

fn log_sanity_failure<S: SocketIo + ?Sized>(socket: &S, read: &[u8]) {
    error!(
        received = %run_length_hex(read),
        socket = %socket.status(),
        "response exceeded sanity limit"
    );
}

/// Hex dump that collapses runs of 10 or more identical bytes.
///
/// Shorter runs are printed verbatim as upper-case hex pairs; longer ones as
/// `(XX repeated N times)`.
pub fn run_length_hex(bytes: &[u8]) -> String {
    let mut out = String::new();
    let mut iter = bytes.iter();
    let Some(&first) = iter.next() else {
        return out;
    };

    let mut last = first;
    let mut count = 1usize;
    for &byte in iter {
        if byte == last {
            count += 1;
        } else {
            push_run(&mut out, last, count);
            last = byte;
            count = 1;
        }
    }
    push_run(&mut out, last, count);
    out
}

fn push_run(out: &mut String, byte: u8, count: usize) {
    if count < 10 {
        for _ in 0..count {
            let _ = write!(out, "{:02X}", byte);
        }
    } else {
        let _ = write!(out, "({:02X} repeated {} times)", byte, count);
    }
}

/// Encodes a command into a fresh segment list.
///
/// `command` must already carry its `\r\n` terminator.
pub fn encode_command(command: &str) -> Vec<Bytes> {
    let mut segments = Vec::with_capacity(1);
    append_command(command, &mut segments);
    segments
}

/// Appends a command to an existing segment list so that command line,
/// payload and terminator go out in a single write.
pub fn append_command(command: &str, segments: &mut Vec<Bytes>) {
    segments.push(Bytes::copy_from_slice(command.as_bytes()));
}

/// Converts an expiry into the protocol's exptime field.
pub fn expiration_seconds(expiry: Duration) -> u64 {
    expiration_seconds_at(expiry, SystemTime::now())
}

/// `expiration_seconds` against an explicit clock.
///
/// Zero means "never expires"; sub-second expiries round up to one second so
/// they do not turn into "never"; anything past 30 days becomes an absolute
/// Unix timestamp.
pub fn expiration_seconds_at(expiry: Duration, now: SystemTime) -> u64 {
    if expiry.is_zero() {
        return 0;
    }
    let mut seconds = expiry.as_secs();
    if expiry.subsec_nanos() > 0 {
        seconds = seconds.saturating_add(1);
    }
    if seconds <= MAX_RELATIVE_EXPIRATION {
        return seconds;
    }
    let unix_now = now
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs();
    unix_now.saturating_add(seconds)
}
