//! WebSocket server protocol layered on the reactline reactor.
//!
//! [`Websocket`] adapts the core [`ConnectionHandler`] surface: the first
//! message on each connection is treated as the HTTP/1.1 upgrade request,
//! and every later read streams through an incremental RFC 6455 frame
//! parser. Applications implement [`WsHandler`] and compose the adapter
//! with [`WsProtocol`]:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use reactline::{Config, Server};
//! use reactline_websocket::{OpCode, Websocket, WsConn, WsHandler, WsProtocol};
//!
//! struct EchoWs;
//!
//! impl WsHandler for EchoWs {
//!     fn on_message(&self, conn: &Arc<WsConn>, opcode: OpCode, data: &[u8]) {
//!         let _ = conn.send_message(opcode, data);
//!     }
//! }
//!
//! fn main() -> Result<(), reactline::Error> {
//!     let server = Server::builder(Config {
//!         addr: "127.0.0.1:5100".into(),
//!         ..Config::default()
//!     })
//!     .protocol(Arc::new(WsProtocol))
//!     .handler(Arc::new(Websocket::new(Arc::new(EchoWs))))
//!     .build();
//!     server.start()
//! }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use protocol_websocket::Parsed;
use protocol_websocket::handshake::{accept_response, parse_upgrade, rejection_response};
use reactline::{Action, Connection, ConnectionHandler};

mod conn;
mod protocol;

pub use conn::WsConn;
pub use protocol::WsProtocol;
/// Frame codec, opcode, and close-code surface, re-exported for
/// applications.
pub use protocol_websocket::{
    CLOSE_GOING_AWAY, CLOSE_INTERNAL_SERVER_ERR, CLOSE_NO_STATUS_RECEIVED, CLOSE_NORMAL_CLOSURE,
    CLOSE_PROTOCOL_ERROR, DEFAULT_MAX_PAYLOAD, OpCode, WsError,
};

/// Errors surfaced by the WebSocket write surface.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Frame encoding or protocol rule violation.
    #[error(transparent)]
    Ws(#[from] WsError),
    /// The underlying transport rejected the operation.
    #[error(transparent)]
    Transport(#[from] reactline::Error),
}

/// Context marker set once the HTTP upgrade response has been queued.
pub(crate) struct Upgraded;

/// Application callbacks for WebSocket connections.
///
/// All callbacks for one connection run sequentially on its worker loop.
pub trait WsHandler: Send + Sync {
    /// The upgrade handshake completed.
    fn on_open(&self, _conn: &Arc<WsConn>) {}
    /// A complete text or binary message arrived (reassembled across
    /// fragments).
    fn on_message(&self, _conn: &Arc<WsConn>, _opcode: OpCode, _data: &[u8]) {}
    /// A close frame arrived; `code` is 1005 when the frame had no status.
    fn on_close(&self, _conn: &Arc<WsConn>, _code: u16, _reason: &str) {}
    fn on_ping(&self, _conn: &Arc<WsConn>, _data: &[u8]) {}
    fn on_pong(&self, _conn: &Arc<WsConn>, _data: &[u8]) {}
    /// A protocol violation was detected; decoding stops for this read.
    /// Closing the connection is left to the application.
    fn on_error(&self, _conn: &Arc<WsConn>, _err: &WsError) {}
}

/// Adapter implementing the core handler surface for WebSocket traffic.
///
/// Pair it with [`WsProtocol`] on the same server.
pub struct Websocket {
    handler: Arc<dyn WsHandler>,
    max_frame_payload_size: usize,
    /// Deadline for clients to complete the upgrade. The framework carries
    /// the knob but does not enforce it; applications that want the
    /// timeout close lingering connections themselves.
    handshake_timeout: Option<Duration>,
    connections: Mutex<HashMap<u64, Arc<WsConn>>>,
}

impl Websocket {
    pub fn new(handler: Arc<dyn WsHandler>) -> Websocket {
        Websocket {
            handler,
            max_frame_payload_size: DEFAULT_MAX_PAYLOAD,
            handshake_timeout: None,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Per-frame payload ceiling for outgoing messages; larger messages
    /// are fragmented.
    pub fn max_frame_payload_size(mut self, n: usize) -> Self {
        self.max_frame_payload_size = n;
        self
    }

    /// Record a handshake deadline for the application to enforce.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    pub fn handshake_deadline(&self) -> Option<Duration> {
        self.handshake_timeout
    }

    fn lookup(&self, id: u64) -> Option<Arc<WsConn>> {
        self.connections.lock().ok()?.get(&id).cloned()
    }

    /// Handshake phase: `data` is one full HTTP request (the codec only
    /// yields complete header blocks).
    fn handle_upgrade(&self, conn: &Arc<Connection>, ws_conn: &Arc<WsConn>, data: &[u8]) {
        match parse_upgrade(data) {
            Ok(request) => {
                if conn.send(&accept_response(&request), Action::None).is_err() {
                    return;
                }
                conn.set_context(Arc::new(Upgraded));
                self.handler.on_open(ws_conn);
            }
            Err(err) => {
                debug!("handshake rejected: {err}");
                // Close only after the error response has flushed.
                let _ = conn.send(&rejection_response(&err), Action::Close);
            }
        }
    }

    /// Framed phase: run the parser over `data` and dispatch each frame.
    fn handle_frames(&self, ws_conn: &Arc<WsConn>, data: &[u8]) {
        if let Ok(mut parser) = ws_conn.parser.lock() {
            parser.feed(data);
        }

        loop {
            let parsed = match ws_conn.parser.lock() {
                Ok(mut parser) => parser.next(),
                Err(_) => return,
            };
            match parsed {
                Ok(Parsed::Waiting) => return,
                Ok(Parsed::Fragment) => continue,
                Ok(Parsed::Frame { opcode, payload }) => {
                    self.dispatch_frame(ws_conn, opcode, &payload);
                }
                Err(err) => {
                    self.handler.on_error(ws_conn, &err);
                    return;
                }
            }
        }
    }

    fn dispatch_frame(&self, ws_conn: &Arc<WsConn>, opcode: OpCode, payload: &[u8]) {
        match opcode {
            OpCode::Text | OpCode::Binary => self.handler.on_message(ws_conn, opcode, payload),
            OpCode::Ping => self.handler.on_ping(ws_conn, payload),
            OpCode::Pong => self.handler.on_pong(ws_conn, payload),
            OpCode::Close => self.dispatch_close(ws_conn, payload),
            OpCode::Continuation => {}
        }
    }

    fn dispatch_close(&self, ws_conn: &Arc<WsConn>, payload: &[u8]) {
        let (code, reason_bytes) = if payload.len() >= 2 {
            (u16::from_be_bytes([payload[0], payload[1]]), &payload[2..])
        } else {
            (CLOSE_NO_STATUS_RECEIVED, &[][..])
        };

        match std::str::from_utf8(reason_bytes) {
            Ok(reason) => self.handler.on_close(ws_conn, code, reason),
            Err(_) => {
                self.handler.on_error(
                    ws_conn,
                    &WsError::Protocol("invalid utf8 payload in close frame".into()),
                );
                let reason = String::from_utf8_lossy(reason_bytes);
                self.handler.on_close(ws_conn, code, &reason);
            }
        }
    }
}

impl ConnectionHandler for Websocket {
    fn on_open(&self, conn: &Arc<Connection>) {
        let ws_conn = WsConn::new(conn.clone(), self.max_frame_payload_size);
        if let Ok(mut connections) = self.connections.lock() {
            connections.insert(conn.unique_id(), ws_conn);
        }
    }

    fn on_message(&self, conn: &Arc<Connection>, data: &[u8]) {
        let Some(ws_conn) = self.lookup(conn.unique_id()) else {
            let _ = conn.close();
            return;
        };

        if !protocol::is_upgraded(conn) {
            self.handle_upgrade(conn, &ws_conn, data);
            return;
        }

        self.handle_frames(&ws_conn, data);
    }

    fn on_close(&self, conn: &Arc<Connection>) {
        if let Ok(mut connections) = self.connections.lock() {
            connections.remove(&conn.unique_id());
        }
    }
}
