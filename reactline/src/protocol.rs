use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::connection::Connection;

/// Application-layer codec plugged into a [`Connection`].
///
/// `decode` is called in a loop after every read: it either consumes a
/// complete frame's worth of bytes from the front of `buf` and returns the
/// frame, or returns `None` without consuming anything when more bytes are
/// needed. `encode` turns an application message into wire-ready output;
/// it runs on the connection's owning loop inside the send trigger.
pub trait Protocol: Send + Sync {
    fn decode(&self, conn: &Arc<Connection>, buf: &mut BytesMut) -> Option<Bytes>;
    fn encode(&self, conn: &Arc<Connection>, data: &[u8]) -> Bytes;
}

/// Default codec: every read is one message, writes go out verbatim.
/// Composing a server with this codec yields a raw TCP echo framework.
pub struct Passthrough;

impl Protocol for Passthrough {
    fn decode(&self, _conn: &Arc<Connection>, buf: &mut BytesMut) -> Option<Bytes> {
        if buf.is_empty() {
            None
        } else {
            Some(buf.split().freeze())
        }
    }

    fn encode(&self, _conn: &Arc<Connection>, data: &[u8]) -> Bytes {
        Bytes::copy_from_slice(data)
    }
}
