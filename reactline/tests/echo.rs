//! Integration tests: echo server using real TCP connections.
//!
//! Each test starts a reactline server on its own thread, connects via std
//! TCP, sends data, and verifies the echoed response and the connection
//! lifecycle callbacks.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use reactline::{Action, Config, Connection, ConnectionHandler, Error, Server};

// ── Echo handler ────────────────────────────────────────────────────

#[derive(Default)]
struct Counters {
    opens: AtomicUsize,
    closes: AtomicUsize,
}

struct Echo {
    counters: Arc<Counters>,
}

impl ConnectionHandler for Echo {
    fn on_open(&self, _conn: &Arc<Connection>) {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
    }

    fn on_message(&self, conn: &Arc<Connection>, data: &[u8]) {
        let _ = conn.send(data, Action::None);
    }

    fn on_close(&self, _conn: &Arc<Connection>) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Find an available port by binding to :0.
fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn start_server(
    addr: &str,
    handler: Arc<dyn ConnectionHandler>,
) -> (Arc<Server>, thread::JoinHandle<Result<(), Error>>) {
    let server = Server::builder(Config {
        addr: addr.to_string(),
        num_loops: 2,
        ..Config::default()
    })
    .handler(handler)
    .build();

    let server2 = server.clone();
    let handle = thread::spawn(move || server2.start());
    (server, handle)
}

fn wait_for_server(addr: &str) {
    for _ in 0..200 {
        if TcpStream::connect(addr).is_ok() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("server did not start on {addr}");
}

fn echo_round_trip(addr: &str, msg: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream.write_all(msg).unwrap();
    stream.flush().unwrap();

    let mut buf = vec![0u8; msg.len()];
    let mut total = 0;
    while total < msg.len() {
        match stream.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => panic!("read error: {e}"),
        }
    }
    buf.truncate(total);
    buf
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

// ── Tests ───────────────────────────────────────────────────────────

#[test]
fn echo_small_message() {
    let addr = format!("127.0.0.1:{}", free_port());
    let counters = Arc::new(Counters::default());
    let (server, handle) = start_server(
        &addr,
        Arc::new(Echo {
            counters: counters.clone(),
        }),
    );
    wait_for_server(&addr);

    let msg = b"hello";
    let response = echo_round_trip(&addr, msg);
    assert_eq!(response, msg);

    // All connections (probe included) close once clients drop.
    assert!(wait_until(|| {
        counters.closes.load(Ordering::SeqCst) == counters.opens.load(Ordering::SeqCst)
            && counters.opens.load(Ordering::SeqCst) > 0
    }));

    server.shutdown().unwrap();
    handle.join().unwrap().unwrap();
}

#[test]
fn echo_large_message() {
    let addr = format!("127.0.0.1:{}", free_port());
    let counters = Arc::new(Counters::default());
    let (server, handle) = start_server(
        &addr,
        Arc::new(Echo {
            counters: counters.clone(),
        }),
    );
    wait_for_server(&addr);

    // 256KB — larger than the 64KB scratch buffer and any single read.
    let msg: Vec<u8> = (0..262_144).map(|i| (i % 251) as u8).collect();
    let response = echo_round_trip(&addr, &msg);
    assert_eq!(response, msg);

    server.shutdown().unwrap();
    handle.join().unwrap().unwrap();
}

#[test]
fn echo_multiple_connections() {
    let addr = format!("127.0.0.1:{}", free_port());
    let counters = Arc::new(Counters::default());
    let (server, handle) = start_server(
        &addr,
        Arc::new(Echo {
            counters: counters.clone(),
        }),
    );
    wait_for_server(&addr);

    let mut join_handles = Vec::new();
    for i in 0..8 {
        let addr = addr.clone();
        join_handles.push(thread::spawn(move || {
            let msg = format!("connection {i}");
            let response = echo_round_trip(&addr, msg.as_bytes());
            assert_eq!(response, msg.as_bytes());
        }));
    }
    for h in join_handles {
        h.join().unwrap();
    }

    server.shutdown().unwrap();
    handle.join().unwrap().unwrap();
}

#[test]
fn echo_sequential_sends() {
    let addr = format!("127.0.0.1:{}", free_port());
    let counters = Arc::new(Counters::default());
    let (server, handle) = start_server(
        &addr,
        Arc::new(Echo {
            counters: counters.clone(),
        }),
    );
    wait_for_server(&addr);

    let mut stream = TcpStream::connect(&addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    for i in 0..10 {
        let msg = format!("msg-{i}\n");
        stream.write_all(msg.as_bytes()).unwrap();
        stream.flush().unwrap();

        let mut buf = vec![0u8; msg.len()];
        let mut total = 0;
        while total < msg.len() {
            match stream.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => panic!("read error: {e}"),
            }
        }
        assert_eq!(&buf[..total], msg.as_bytes(), "mismatch on send {i}");
    }

    server.shutdown().unwrap();
    handle.join().unwrap().unwrap();
}

// ── Send-then-close ordering ────────────────────────────────────────

/// Handler that answers the first message with three sends and a close.
struct BurstThenClose;

impl ConnectionHandler for BurstThenClose {
    fn on_message(&self, conn: &Arc<Connection>, _data: &[u8]) {
        let _ = conn.send(b"one,", Action::None);
        let _ = conn.send(b"two,", Action::None);
        let _ = conn.send(b"three", Action::Close);
    }
}

#[test]
fn sends_flush_before_close() {
    let addr = format!("127.0.0.1:{}", free_port());
    let (server, handle) = start_server(&addr, Arc::new(BurstThenClose));
    wait_for_server(&addr);

    let mut stream = TcpStream::connect(&addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream.write_all(b"go").unwrap();

    // Read to EOF: the peer must observe every send, in order, then FIN.
    let mut response = Vec::new();
    stream.read_to_end(&mut response).unwrap();
    assert_eq!(response, b"one,two,three");

    server.shutdown().unwrap();
    handle.join().unwrap().unwrap();
}

// ── Close idempotence ───────────────────────────────────────────────

/// Handler that parks every opened connection for the test body.
struct Capture {
    conns: Arc<Mutex<Vec<Arc<Connection>>>>,
}

impl ConnectionHandler for Capture {
    fn on_open(&self, conn: &Arc<Connection>) {
        self.conns.lock().unwrap().push(conn.clone());
    }
}

#[test]
fn close_is_idempotent() {
    let addr = format!("127.0.0.1:{}", free_port());
    let conns = Arc::new(Mutex::new(Vec::new()));
    let (server, handle) = start_server(
        &addr,
        Arc::new(Capture {
            conns: conns.clone(),
        }),
    );
    wait_for_server(&addr);

    let stream = TcpStream::connect(&addr).unwrap();
    assert!(wait_until(|| !conns.lock().unwrap().is_empty()));

    let conn = conns.lock().unwrap().pop().unwrap();
    conn.close().unwrap();

    // The first close is deferred onto the worker; once it lands, every
    // further close (and send) observes the terminal state.
    assert!(wait_until(|| conn.close().is_err()));
    assert!(matches!(conn.close(), Err(Error::ConnectionClosed)));
    assert!(matches!(
        conn.send(b"late", Action::None),
        Err(Error::ConnectionClosed)
    ));

    drop(stream);
    server.shutdown().unwrap();
    handle.join().unwrap().unwrap();
}

// ── Client disconnect ───────────────────────────────────────────────

#[test]
fn connection_close_on_client_disconnect() {
    let addr = format!("127.0.0.1:{}", free_port());
    let counters = Arc::new(Counters::default());
    let (server, handle) = start_server(
        &addr,
        Arc::new(Echo {
            counters: counters.clone(),
        }),
    );
    wait_for_server(&addr);

    for _ in 0..10 {
        let stream = TcpStream::connect(&addr).unwrap();
        drop(stream);
    }

    assert!(wait_until(|| {
        counters.closes.load(Ordering::SeqCst) == counters.opens.load(Ordering::SeqCst)
    }));

    // Server still alive afterwards.
    let msg = b"still alive";
    let response = echo_round_trip(&addr, msg);
    assert_eq!(response, msg);

    server.shutdown().unwrap();
    handle.join().unwrap().unwrap();
}

// ── Graceful shutdown ───────────────────────────────────────────────

#[test]
fn graceful_shutdown_closes_every_connection_once() {
    let addr = format!("127.0.0.1:{}", free_port());
    let counters = Arc::new(Counters::default());
    let (server, handle) = start_server(
        &addr,
        Arc::new(Echo {
            counters: counters.clone(),
        }),
    );
    wait_for_server(&addr);

    let mut streams = Vec::new();
    for _ in 0..100 {
        streams.push(TcpStream::connect(&addr).unwrap());
    }
    assert!(wait_until(|| counters.opens.load(Ordering::SeqCst) >= 100));

    server.shutdown().unwrap();
    handle.join().unwrap().unwrap();

    // Worker loops have exited; every open connection closed exactly once.
    assert_eq!(
        counters.closes.load(Ordering::SeqCst),
        counters.opens.load(Ordering::SeqCst)
    );

    // Second shutdown and any later start are rejected.
    assert!(matches!(server.shutdown(), Err(Error::ServerClosed)));
    assert!(matches!(server.start(), Err(Error::ServerClosed)));
}
