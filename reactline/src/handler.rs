use std::sync::Arc;

use crate::connection::Connection;

/// Application callbacks for connection lifecycle and inbound messages.
///
/// All callbacks for a given connection run sequentially on the worker
/// loop that owns it and must not block; defer slow work off the loop.
/// `on_close` fires exactly once, never before `on_open`.
pub trait ConnectionHandler: Send + Sync {
    fn on_open(&self, _conn: &Arc<Connection>) {}
    fn on_message(&self, _conn: &Arc<Connection>, _data: &[u8]) {}
    fn on_close(&self, _conn: &Arc<Connection>) {}
}

/// Handler used when a server is built without one.
pub struct NoopHandler;

impl ConnectionHandler for NoopHandler {}
