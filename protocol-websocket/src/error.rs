use thiserror::Error;

/// Errors surfaced by the WebSocket codec and handshake.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WsError {
    /// Structural violation of RFC 6455 framing.
    #[error("websocket protocol error: {0}")]
    Protocol(String),
    /// Declared payload length exceeds what this side will read
    /// (including lengths that would be negative as a signed value).
    #[error("websocket read limit exceeded")]
    ReadLimit,
    /// Message write attempted with a non-data opcode.
    #[error("bad write message type")]
    BadWriteOpCode,
    /// Control frame write with a payload over 125 bytes or a non-control
    /// opcode.
    #[error("invalid control frame")]
    InvalidControlFrame,
    /// Upgrade validation failure, carrying the HTTP status to answer with.
    #[error("handshake failed ({status}): {reason}")]
    Handshake { status: u16, reason: String },
}

impl WsError {
    pub(crate) fn protocol(message: impl Into<String>) -> WsError {
        WsError::Protocol(message.into())
    }

    pub(crate) fn handshake(status: u16, reason: impl Into<String>) -> WsError {
        WsError::Handshake {
            status,
            reason: reason.into(),
        }
    }
}
