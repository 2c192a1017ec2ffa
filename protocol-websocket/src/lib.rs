//! Server-side WebSocket protocol support (RFC 6455, no extensions or
//! subprotocols).
//!
//! This crate is pure parsing and encoding; it never touches a socket, so
//! it can back any transport:
//!
//! - [`handshake`]: HTTP/1.1 upgrade validation, `Sec-WebSocket-Accept`
//!   computation, and response rendering.
//! - [`FrameParser`]: incremental frame decoder tolerant of arbitrary
//!   chunking, with fragmented-message reassembly and control-frame rules.
//! - [`encode_message`] / [`encode_control`] / [`encode_close`]: unmasked
//!   server-to-client frame writers.
//!
//! # Example
//!
//! ```
//! use protocol_websocket::{FrameParser, OpCode, Parsed, encode_message};
//!
//! // Server-side frame for "hi", then a parse of a masked client frame.
//! let frames = encode_message(OpCode::Text, b"hi", 0).unwrap();
//! assert_eq!(frames[0], vec![0x81, 0x02, b'h', b'i']);
//!
//! let mut parser = FrameParser::new();
//! parser.feed(&[0x81, 0x82, 0, 0, 0, 0, b'h', b'i']);
//! let Parsed::Frame { opcode, payload } = parser.next().unwrap() else {
//!     panic!("incomplete");
//! };
//! assert_eq!((opcode, payload.as_slice()), (OpCode::Text, &b"hi"[..]));
//! ```

mod error;
mod frame;
pub mod handshake;
mod mask;
mod opcode;

pub use error::WsError;
pub use frame::{
    DEFAULT_MAX_PAYLOAD, FrameParser, MAX_CONTROL_PAYLOAD, Parsed, encode_close, encode_control,
    encode_frame, encode_message,
};
pub use mask::apply_mask;
pub use opcode::{
    CLOSE_ABNORMAL_CLOSURE, CLOSE_GOING_AWAY, CLOSE_INTERNAL_SERVER_ERR,
    CLOSE_INVALID_FRAME_PAYLOAD_DATA, CLOSE_MANDATORY_EXTENSION, CLOSE_MESSAGE_TOO_BIG,
    CLOSE_NORMAL_CLOSURE, CLOSE_NO_STATUS_RECEIVED, CLOSE_POLICY_VIOLATION, CLOSE_PROTOCOL_ERROR,
    CLOSE_SERVICE_RESTART, CLOSE_TRY_AGAIN_LATER, CLOSE_UNSUPPORTED_DATA, OpCode,
};
