use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use reactline::{Connection, Protocol};

use crate::Upgraded;

/// Whether this connection has completed the HTTP upgrade.
pub(crate) fn is_upgraded(conn: &Connection) -> bool {
    conn.context()
        .is_some_and(|ctx| ctx.downcast_ref::<Upgraded>().is_some())
}

/// Codec for the two phases of a WebSocket connection.
///
/// Before the upgrade each decoded message is exactly one HTTP request,
/// bytes up to and including the first `\r\n\r\n`. After the upgrade the
/// codec is a passthrough; frame parsing happens in the per-connection
/// [`FrameParser`](protocol_websocket::FrameParser), which tolerates
/// arbitrary chunk boundaries.
pub struct WsProtocol;

impl Protocol for WsProtocol {
    fn decode(&self, conn: &Arc<Connection>, buf: &mut BytesMut) -> Option<Bytes> {
        if !is_upgraded(conn) {
            let end = find_terminator(buf)?;
            return Some(buf.split_to(end + 4).freeze());
        }

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

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
