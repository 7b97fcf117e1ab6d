use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mcline_client::{ClientConfig, ClientError, McClient, ServerNode, StatusCode};
use mcline_testkit::{init_tracing, MockServer};

fn client_for(servers: &[&MockServer]) -> McClient {
    init_tracing();
    McClient::connect(servers.iter().map(|server| server.endpoint())).expect("client")
}

/// Scripted server: `handler(connection, line, stream)` runs for every command
/// line received and returns `false` to close that connection.
fn spawn_server(connections: usize, handler: fn(usize, &str, &mut TcpStream) -> bool) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    thread::spawn(move || {
        for conn in 0..connections {
            let (mut stream, _) = listener.accept().expect("accept");
            let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
                if !handler(conn, line.trim_end_matches("\r\n"), &mut stream) {
                    break;
                }
            }
        }
    });

    addr
}

fn reply(stream: &mut TcpStream, msg: &str) {
    let _ = stream.write_all(msg.as_bytes());
    let _ = stream.write_all(b"\r\n");
}

#[test]
fn increment_creates_then_adds() {
    let server = MockServer::start().expect("mock server");
    let client = client_for(&[&server]);

    let first = client.increment("hits", 100, 10).unwrap();
    assert!(first.is_success());
    assert_eq!(first.value(), 100);

    let second = client.increment("hits", 100, 10).unwrap();
    assert_eq!(second.value(), 110);
}

#[test]
fn decrement_creates_then_subtracts_and_clamps() {
    let server = MockServer::start().expect("mock server");
    let client = client_for(&[&server]);

    assert_eq!(client.decrement("stock", 100, 10).unwrap().value(), 100);
    assert_eq!(client.decrement("stock", 100, 10).unwrap().value(), 90);
    assert_eq!(client.decrement("stock", 100, 200).unwrap().value(), 0);
}

#[test]
fn mutating_a_non_numeric_value_fails() {
    let server = MockServer::start().expect("mock server");
    let client = client_for(&[&server]);

    assert!(client.set("name", b"alice", Duration::ZERO).unwrap().is_success());
    let result = client.increment("name", 0, 1).unwrap();
    assert!(!result.is_success());
    assert_eq!(result.status_code(), Some(StatusCode::NON_NUMERIC_VALUE));
    assert!(result.message().unwrap().contains("non-numeric"));
}

#[test]
fn touch_extends_expiry() {
    let server = MockServer::start().expect("mock server");
    let client = client_for(&[&server]);

    assert!(client.add("kept", b"1", Duration::from_secs(1)).unwrap().is_success());
    assert!(client.add("dropped", b"1", Duration::from_secs(1)).unwrap().is_success());
    assert!(client.touch("kept", Duration::from_secs(60)).unwrap().is_success());

    thread::sleep(Duration::from_millis(1100));

    assert_eq!(client.get_value("kept").unwrap().as_deref(), Some(&b"1"[..]));
    let gone = client.get("dropped").unwrap();
    assert_eq!(gone.status_code(), Some(StatusCode::KEY_NOT_FOUND));
}

#[test]
fn touch_missing_key_reports_not_found() {
    let server = MockServer::start().expect("mock server");
    let client = client_for(&[&server]);

    let result = client.touch("absent", Duration::from_secs(5)).unwrap();
    assert!(!result.is_success());
    assert_eq!(result.status_code(), Some(StatusCode::KEY_NOT_FOUND));
}

#[test]
fn store_get_delete_round_trip() {
    let server = MockServer::start().expect("mock server");
    let client = client_for(&[&server]);

    let payload = b"line one\r\nline\rtwo";
    assert!(client.set("blob", payload, Duration::ZERO).unwrap().is_success());
    let hit = client.get("blob").unwrap();
    assert!(hit.is_success());
    assert_eq!(hit.value().map(|v| v.as_ref()), Some(&payload[..]));

    let exists = client.add("blob", b"other", Duration::ZERO).unwrap();
    assert_eq!(exists.status_code(), Some(StatusCode::ITEM_NOT_STORED));

    let missing = client.replace("nothing", b"x", Duration::ZERO).unwrap();
    assert_eq!(missing.status_code(), Some(StatusCode::ITEM_NOT_STORED));

    assert!(client.delete("blob").unwrap().is_success());
    assert_eq!(
        client.delete("blob").unwrap().status_code(),
        Some(StatusCode::KEY_NOT_FOUND)
    );
    assert_eq!(client.get_value("blob").unwrap(), None);
}

#[test]
fn store_keeps_client_flags() {
    let server = MockServer::start().expect("mock server");
    let client = client_for(&[&server]);

    client
        .store(mcline_client::StoreMode::Set, "flagged", 42, b"v", Duration::ZERO)
        .unwrap();
    assert_eq!(client.get("flagged").unwrap().flags(), 42);
}

#[test]
fn sequential_operations_reuse_one_socket() {
    let server = MockServer::start().expect("mock server");
    let client = client_for(&[&server]);

    for _ in 0..50 {
        client.increment("reuse", 0, 1).unwrap();
    }
    assert_eq!(client.get_value("reuse").unwrap().as_deref(), Some(&b"49"[..]));
    assert_eq!(server.connections(), 1);

    let stats = client.pool_stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].1.total, 1);
    assert_eq!(stats[0].1.idle, 1);
}

#[test]
fn keys_are_routed_to_their_owner() {
    let first = MockServer::start().expect("mock server");
    let second = MockServer::start().expect("mock server");
    let client = client_for(&[&first, &second]);

    let mut owners = Vec::new();
    for i in 0..40 {
        let key = format!("user:{}", i);
        client.set(&key, key.as_bytes(), Duration::ZERO).unwrap();
        owners.push((key.clone(), client.locate(&key).unwrap()));
    }
    assert!(first.connections() >= 1);
    assert!(second.connections() >= 1);

    // A client that only knows one node sees exactly the keys it owns.
    let solo = client_for(&[&first]);
    let first_node = ServerNode::parse(&first.endpoint()).unwrap();
    for (key, owner) in owners {
        let found = solo.get_value(&key).unwrap().is_some();
        assert_eq!(found, owner == first_node, "key {}", key);
    }
}

#[test]
fn rebuild_to_empty_ring_fails_fast() {
    let server = MockServer::start().expect("mock server");
    let client = client_for(&[&server]);
    client.increment("k", 1, 1).unwrap();

    client.rebuild_nodes(Vec::new());
    assert!(matches!(
        client.increment("k", 1, 1),
        Err(ClientError::NoAvailableNode)
    ));
    assert!(client.pool_stats().is_empty());

    client.rebuild_nodes(vec![ServerNode::parse(&server.endpoint()).unwrap()]);
    assert_eq!(client.increment("k", 1, 1).unwrap().value(), 2);
}

#[test]
fn rebuild_moves_traffic_to_new_nodes() {
    let old = MockServer::start().expect("mock server");
    let new = MockServer::start().expect("mock server");
    let client = client_for(&[&old]);
    client.set("k", b"v", Duration::ZERO).unwrap();

    let new_node = ServerNode::parse(&new.endpoint()).unwrap();
    client.rebuild_nodes(vec![new_node.clone()]);
    assert_eq!(client.get_value("k").unwrap(), None);

    let stats = client.pool_stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].0, new_node);
}

#[test]
fn shared_client_across_threads() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 50;
    const MAX_POOL: usize = 3;

    init_tracing();
    let server = MockServer::start().expect("mock server");
    let config = ClientConfig {
        servers: vec![server.endpoint()],
        max_pool_size: MAX_POOL,
        queue_timeout: Duration::from_secs(10),
        ..ClientConfig::default()
    };
    let client = Arc::new(McClient::with_config(config).unwrap());

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let client = Arc::clone(&client);
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    assert!(client.increment("ctr", 0, 1).unwrap().is_success());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker panicked");
    }

    // The first call creates the counter at 0; every other call adds one.
    let expected = (THREADS * ROUNDS - 1).to_string();
    assert_eq!(
        client.get_value("ctr").unwrap().as_deref(),
        Some(expected.as_bytes())
    );
    let stats = client.pool_stats();
    assert!(stats[0].1.total <= MAX_POOL);
    assert!(server.connections() <= MAX_POOL);
}

#[test]
fn invalid_keys_never_reach_the_server() {
    let server = MockServer::start().expect("mock server");
    let client = client_for(&[&server]);

    let long = "k".repeat(251);
    for key in ["", "has space", "tab\tkey", long.as_str()] {
        assert!(matches!(
            client.increment(key, 0, 1),
            Err(ClientError::InvalidKey(_))
        ));
    }
    assert_eq!(server.connections(), 0);
}

#[test]
fn unreachable_node_is_parked() {
    init_tracing();
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };
    let config = ClientConfig {
        servers: vec![format!("127.0.0.1:{}", port)],
        connection_timeout: Duration::from_millis(500),
        dead_timeout: Duration::from_secs(30),
        ..ClientConfig::default()
    };
    let client = McClient::with_config(config).unwrap();

    assert!(matches!(
        client.increment("k", 0, 1),
        Err(ClientError::Transport(_))
    ));
    assert!(matches!(
        client.increment("k", 0, 1),
        Err(ClientError::NodeDead { .. })
    ));
}

#[test]
fn error_replies_become_failed_results() {
    init_tracing();
    let addr = spawn_server(1, |_, line, stream| {
        match line {
            "incr a 1" => reply(stream, "CLIENT_ERROR invalid numeric delta argument"),
            "incr b 1" => reply(stream, "SERVER_ERROR out of memory storing object"),
            "touch c 0" => reply(stream, "ERROR"),
            _ => reply(stream, "12"),
        }
        true
    });
    let client = McClient::connect([addr]).unwrap();

    let client_err = client.increment("a", 0, 1).unwrap();
    assert_eq!(client_err.status_code(), Some(StatusCode::INVALID_ARGUMENTS));
    assert_eq!(client_err.message(), Some("invalid numeric delta argument"));

    let server_err = client.increment("b", 0, 1).unwrap();
    assert_eq!(server_err.status_code(), Some(StatusCode::OUT_OF_MEMORY));
    assert_eq!(server_err.message(), Some("out of memory storing object"));

    let generic = client.touch("c", Duration::ZERO).unwrap();
    assert_eq!(generic.status_code(), Some(StatusCode::UNKNOWN_COMMAND));

    // Error lines leave the socket usable; the server only accepts once.
    assert_eq!(client.increment("d", 0, 1).unwrap().value(), 12);
}

#[test]
fn server_closing_mid_reply_retires_the_socket() {
    init_tracing();
    let addr = spawn_server(2, |conn, _, stream| {
        if conn == 0 {
            let _ = stream.write_all(b"4");
            return false;
        }
        reply(stream, "5");
        true
    });
    let client = McClient::connect([addr]).unwrap();

    assert!(matches!(
        client.increment("k", 0, 1),
        Err(ClientError::ConnectionClosed)
    ));
    assert_eq!(client.pool_stats()[0].1.total, 0);
    assert_eq!(client.increment("k", 0, 1).unwrap().value(), 5);
}

#[test]
fn empty_reply_line_is_an_error() {
    init_tracing();
    let addr = spawn_server(1, |_, line, stream| {
        if line.starts_with("incr") {
            reply(stream, "");
        } else {
            reply(stream, "TOUCHED");
        }
        true
    });
    let client = McClient::connect([addr]).unwrap();

    assert!(matches!(
        client.increment("k", 0, 1),
        Err(ClientError::EmptyResponse)
    ));
    assert!(client.touch("k", Duration::ZERO).unwrap().is_success());
}

#[test]
fn oversized_reply_hits_sanity_limit() {
    init_tracing();
    let addr = spawn_server(1, |_, _, stream| {
        let chunk = vec![b'A'; 1024 * 1024];
        for _ in 0..11 {
            if stream.write_all(&chunk).is_err() {
                break;
            }
        }
        false
    });
    let client = McClient::connect([addr]).unwrap();

    assert!(matches!(
        client.increment("k", 0, 1),
        Err(ClientError::SanityLimitExceeded { .. })
    ));
    assert_eq!(client.pool_stats()[0].1.total, 0);
}
