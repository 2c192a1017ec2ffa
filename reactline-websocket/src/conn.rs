use std::sync::{Arc, Mutex};

use protocol_websocket::{FrameParser, OpCode, encode_close, encode_control, encode_message};
use reactline::{Action, Addr, Connection};

use crate::Error;

/// A WebSocket connection: the underlying transport plus per-connection
/// frame-parse state.
///
/// Write methods are callable from any thread; frames are queued on the
/// owning worker loop in call order.
pub struct WsConn {
    conn: Arc<Connection>,
    max_payload_size: usize,
    pub(crate) parser: Mutex<FrameParser>,
}

impl WsConn {
    pub(crate) fn new(conn: Arc<Connection>, max_payload_size: usize) -> Arc<WsConn> {
        Arc::new(WsConn {
            conn,
            max_payload_size,
            parser: Mutex::new(FrameParser::new()),
        })
    }

    pub fn unique_id(&self) -> u64 {
        self.conn.unique_id()
    }

    pub fn local_addr(&self) -> &Addr {
        self.conn.local_addr()
    }

    pub fn remote_addr(&self) -> &Addr {
        self.conn.remote_addr()
    }

    /// Send a data message, splitting it into continuation frames when it
    /// exceeds this connection's payload ceiling.
    pub fn send_message(&self, opcode: OpCode, data: &[u8]) -> Result<(), Error> {
        for frame in encode_message(opcode, data, self.max_payload_size)? {
            self.conn.send(&frame, Action::None)?;
        }
        Ok(())
    }

    /// Send a ping control frame (payload at most 125 bytes).
    pub fn send_ping(&self, data: &[u8]) -> Result<(), Error> {
        let frame = encode_control(OpCode::Ping, data)?;
        self.conn.send(&frame, Action::None)?;
        Ok(())
    }

    /// Send a pong control frame (payload at most 125 bytes).
    pub fn send_pong(&self, data: &[u8]) -> Result<(), Error> {
        let frame = encode_control(OpCode::Pong, data)?;
        self.conn.send(&frame, Action::None)?;
        Ok(())
    }

    /// Send a close frame with the given status code and reason text.
    /// The reserved no-status code (1005) sends nothing.
    pub fn send_close(&self, code: u16, reason: &str) -> Result<(), Error> {
        if let Some(frame) = encode_close(code, reason)? {
            self.conn.send(&frame, Action::None)?;
        }
        Ok(())
    }

    /// Close the underlying transport.
    pub fn close(&self) -> Result<(), Error> {
        self.conn.close()?;
        Ok(())
    }
}
