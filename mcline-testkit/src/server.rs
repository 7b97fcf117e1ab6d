//! TCP front end of the mock memcached server.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use anyhow::Context;
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::store::{MutateOutcome, Store, StoreOutcome};

/// Longest command line accepted before the connection is dropped.
const MAX_COMMAND_LINE: usize = 64 * 1024;

type SharedStore = Arc<Mutex<Store>>;

/// Memcached text-protocol server bound to an ephemeral loopback port.
///
/// The server stops and its open connections are closed when the value is
/// dropped.
pub struct MockServer {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl MockServer {
    pub fn start() -> anyhow::Result<Self> {
        let (ready_tx, ready_rx) = mpsc::channel::<anyhow::Result<SocketAddr>>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&connections);

        let thread = thread::Builder::new()
            .name("mcline-mock".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err.into()));
                        return;
                    }
                };
                runtime.block_on(serve(ready_tx, shutdown_rx, counter));
            })?;

        let addr = ready_rx
            .recv()
            .context("mock server thread exited before binding")??;
        debug!(%addr, "mock server listening");
        Ok(MockServer {
            addr,
            connections,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Endpoint string suitable for a client server list.
    pub fn endpoint(&self) -> String {
        self.addr.to_string()
    }

    /// Connections accepted since start.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

async fn serve(
    ready: mpsc::Sender<anyhow::Result<SocketAddr>>,
    mut shutdown: oneshot::Receiver<()>,
    connections: Arc<AtomicUsize>,
) {
    let listener = match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => listener,
        Err(err) => {
            let _ = ready.send(Err(err.into()));
            return;
        }
    };
    match listener.local_addr() {
        Ok(addr) => {
            let _ = ready.send(Ok(addr));
        }
        Err(err) => {
            let _ = ready.send(Err(err.into()));
            return;
        }
    }

    let store: SharedStore = Arc::new(Mutex::new(Store::default()));
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    connections.fetch_add(1, Ordering::SeqCst);
                    let store = Arc::clone(&store);
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(stream, store).await {
                            debug!(%peer, error = %err, "mock connection ended");
                        }
                    });
                }
                Err(err) => {
                    warn!(error = %err, "mock accept failed");
                    break;
                }
            }
        }
    }
}

async fn handle_connection(mut stream: TcpStream, store: SharedStore) -> std::io::Result<()> {
    let _ = stream.set_nodelay(true);
    let mut buffer = BytesMut::with_capacity(8 * 1024);

    loop {
        let bytes = stream.read_buf(&mut buffer).await?;
        if bytes == 0 {
            return Ok(());
        }

        while let Some(request) = next_request(&mut buffer) {
            let response = dispatch(&request, &store);
            stream.write_all(&response).await?;
        }

        if find_crlf(&buffer).is_none() && buffer.len() > MAX_COMMAND_LINE {
            stream
                .write_all(b"CLIENT_ERROR line too long\r\n")
                .await?;
            return Ok(());
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Request {
    args: Vec<String>,
    /// Data block of a storage command; `Err` when the block was malformed.
    data: Option<Result<Vec<u8>, ()>>,
}

fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|pair| pair == b"\r\n")
}

fn is_storage(verb: &str) -> bool {
    matches!(verb, "set" | "add" | "replace")
}

/// Removes one complete request from `buffer`, or returns `None` if more
/// bytes are needed.
fn next_request(buffer: &mut BytesMut) -> Option<Request> {
    let line_end = find_crlf(buffer)?;
    let line = String::from_utf8_lossy(&buffer[..line_end]).into_owned();
    let args: Vec<String> = line.split_whitespace().map(str::to_string).collect();

    let storage = args.first().is_some_and(|verb| is_storage(verb));
    let block_len = if storage {
        args.get(4).and_then(|len| len.parse::<usize>().ok())
    } else {
        None
    };

    let Some(block_len) = block_len else {
        buffer.advance(line_end + 2);
        let data = if storage { Some(Err(())) } else { None };
        return Some(Request { args, data });
    };

    let total = line_end + 2 + block_len + 2;
    if buffer.len() < total {
        return None;
    }
    let frame = buffer.split_to(total);
    let block = &frame[line_end + 2..];
    let data = if block.ends_with(b"\r\n") {
        Ok(block[..block_len].to_vec())
    } else {
        Err(())
    };
    Some(Request {
        args,
        data: Some(data),
    })
}

fn dispatch(request: &Request, store: &SharedStore) -> Vec<u8> {
    let Some(verb) = request.args.first() else {
        return resp_line("ERROR");
    };
    let mut store = match store.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    let args = &request.args[1..];

    match verb.as_str() {
        "get" | "gets" => handle_get(args, &mut store),
        "set" | "add" | "replace" => handle_store(verb, args, request.data.as_ref(), &mut store),
        "delete" => handle_delete(args, &mut store),
        "incr" | "decr" => handle_mutate(verb == "incr", args, &mut store),
        "touch" => handle_touch(args, &mut store),
        "flush_all" => {
            store.flush();
            resp_line("OK")
        }
        "version" => resp_line("VERSION mcline-mock"),
        _ => resp_line("ERROR"),
    }
}

fn handle_get(keys: &[String], store: &mut Store) -> Vec<u8> {
    if keys.is_empty() {
        return resp_line("ERROR");
    }
    let mut out = Vec::new();
    for key in keys {
        if let Some(item) = store.get(key) {
            out.extend_from_slice(
                format!("VALUE {} {} {}\r\n", key, item.flags, item.value.len()).as_bytes(),
            );
            out.extend_from_slice(&item.value);
            out.extend_from_slice(b"\r\n");
        }
    }
    out.extend_from_slice(b"END\r\n");
    out
}

fn handle_store(
    verb: &str,
    args: &[String],
    data: Option<&Result<Vec<u8>, ()>>,
    store: &mut Store,
) -> Vec<u8> {
    let value = match data {
        Some(Ok(value)) => value.clone(),
        _ => return resp_line("CLIENT_ERROR bad data chunk"),
    };
    let (Some(key), Some(flags), Some(exptime)) = (
        args.first(),
        args.get(1).and_then(|v| v.parse::<u32>().ok()),
        args.get(2).and_then(|v| v.parse::<u64>().ok()),
    ) else {
        return resp_line("CLIENT_ERROR bad command line format");
    };

    match store.store(verb, key, flags, exptime, value) {
        StoreOutcome::Stored => resp_line("STORED"),
        StoreOutcome::NotStored => resp_line("NOT_STORED"),
    }
}

fn handle_delete(args: &[String], store: &mut Store) -> Vec<u8> {
    let Some(key) = args.first() else {
        return resp_line("ERROR");
    };
    if store.delete(key) {
        resp_line("DELETED")
    } else {
        resp_line("NOT_FOUND")
    }
}

fn handle_mutate(increment: bool, args: &[String], store: &mut Store) -> Vec<u8> {
    let Some(key) = args.first() else {
        return resp_line("ERROR");
    };
    let Some(delta) = args.get(1).and_then(|v| v.parse::<u64>().ok()) else {
        return resp_line("CLIENT_ERROR invalid numeric delta argument");
    };
    match store.mutate(key, increment, delta) {
        MutateOutcome::Value(value) => resp_line(&value.to_string()),
        MutateOutcome::NotFound => resp_line("NOT_FOUND"),
        MutateOutcome::NonNumeric => {
            resp_line("CLIENT_ERROR cannot increment or decrement non-numeric value")
        }
    }
}

fn handle_touch(args: &[String], store: &mut Store) -> Vec<u8> {
    let (Some(key), Some(exptime)) = (
        args.first(),
        args.get(1).and_then(|v| v.parse::<u64>().ok()),
    ) else {
        return resp_line("ERROR");
    };
    if store.touch(key, exptime) {
        resp_line("TOUCHED")
    } else {
        resp_line("NOT_FOUND")
    }
}

fn resp_line(line: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(line.len() + 2);
    out.extend_from_slice(line.as_bytes());
    out.extend_from_slice(b"\r\n");
    out
}
