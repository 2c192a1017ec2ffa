//! Incremental RFC 6455 frame parsing and frame/message encoding.

use crate::error::WsError;
use crate::mask::apply_mask;
use crate::opcode::{CLOSE_NO_STATUS_RECEIVED, OpCode};

const FINAL_BIT: u8 = 1 << 7;
const RSV_BITS: u8 = 0b0111_0000;
const MASK_BIT: u8 = 1 << 7;

/// Largest control-frame payload RFC 6455 permits.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Default per-message payload ceiling for the fragmenting writer.
pub const DEFAULT_MAX_PAYLOAD: usize = 4096;

/// Outcome of one [`FrameParser::next`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    /// Not enough buffered bytes for a complete frame; nothing consumed.
    Waiting,
    /// A non-final fragment was absorbed into the assembly buffer.
    Fragment,
    /// A complete message or control frame.
    Frame { opcode: OpCode, payload: Vec<u8> },
}

/// Fully parsed frame header, staged before any state is committed so an
/// incomplete header leaves the parser untouched.
struct Header {
    size: usize,
    final_frame: bool,
    opcode: OpCode,
    payload_len: u64,
    masking_key: [u8; 4],
}

/// Incremental decoder for client-to-server frames.
///
/// Feed arbitrary chunks with [`feed`](Self::feed), then call
/// [`next`](Self::next) until it reports [`Parsed::Waiting`]. Fragmented
/// messages are reassembled internally; control frames pass through
/// unassembled. Byte-at-a-time feeding yields the same deliveries as one
/// feed of the whole frame.
pub struct FrameParser {
    segment: Vec<u8>,
    assembly: Vec<u8>,
    header: Option<Header>,
    /// FIN state of the last data or continuation frame; true between
    /// messages.
    last_final: bool,
    /// Opcode of the fragmented message under assembly.
    multi_frame_opcode: Option<OpCode>,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    pub fn new() -> FrameParser {
        FrameParser {
            segment: Vec::new(),
            assembly: Vec::new(),
            header: None,
            last_final: true,
            multi_frame_opcode: None,
        }
    }

    /// Append wire bytes to the parse buffer.
    pub fn feed(&mut self, data: &[u8]) {
        self.segment.extend_from_slice(data);
    }

    /// Parse the next frame out of the buffer.
    pub fn next(&mut self) -> Result<Parsed, WsError> {
        if self.header.is_none() {
            self.header = self.parse_header()?;
        }
        let Some(header) = &self.header else {
            return Ok(Parsed::Waiting);
        };

        let frame_len = header.size + header.payload_len as usize;
        if self.segment.len() < frame_len {
            return Ok(Parsed::Waiting);
        }

        let mut payload = self.segment[header.size..frame_len].to_vec();
        apply_mask(&mut payload, header.masking_key);
        self.segment.drain(..frame_len);

        let final_frame = header.final_frame;
        let opcode = header.opcode;
        self.header = None;

        if !final_frame || opcode == OpCode::Continuation {
            self.assembly.extend_from_slice(&payload);
        }

        if !final_frame {
            return Ok(Parsed::Fragment);
        }

        if opcode == OpCode::Continuation {
            let Some(first_opcode) = self.multi_frame_opcode.take() else {
                return Err(WsError::protocol("continuation without message start"));
            };
            return Ok(Parsed::Frame {
                opcode: first_opcode,
                payload: std::mem::take(&mut self.assembly),
            });
        }

        Ok(Parsed::Frame { opcode, payload })
    }

    /// Parse and validate a header, committing fragmentation state only
    /// once every header byte is available.
    fn parse_header(&mut self) -> Result<Option<Header>, WsError> {
        if self.segment.len() < 2 {
            return Ok(None);
        }
        let b0 = self.segment[0];
        let b1 = self.segment[1];

        let final_frame = b0 & FINAL_BIT != 0;
        let opcode = OpCode::from_u8(b0 & 0x0F)?;
        let len7 = (b1 & 0x7F) as u64;

        if opcode.is_control() {
            if len7 > MAX_CONTROL_PAYLOAD as u64 {
                return Err(WsError::protocol("control frame length > 125"));
            }
            if !final_frame {
                return Err(WsError::protocol("control frame not final"));
            }
        } else if opcode.is_data() {
            if !self.last_final {
                return Err(WsError::protocol(
                    "message start before final message frame",
                ));
            }
        } else if self.last_final {
            // Continuation with no assembly in progress.
            return Err(WsError::protocol("continuation after final message frame"));
        }

        if b0 & RSV_BITS != 0 {
            return Err(WsError::protocol(format!(
                "unexpected reserved bits {:#x}",
                b0 & RSV_BITS
            )));
        }
        if b1 & MASK_BIT == 0 {
            return Err(WsError::protocol("incorrect mask flag"));
        }

        let (payload_len, length_size) = match len7 {
            126 => {
                let Some(bytes) = self.segment.get(2..4) else {
                    return Ok(None);
                };
                (u64::from(u16::from_be_bytes([bytes[0], bytes[1]])), 2)
            }
            127 => {
                let Some(bytes) = self.segment.get(2..10) else {
                    return Ok(None);
                };
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                let len = u64::from_be_bytes(raw);
                // A length with the sign bit set reads as negative in the
                // wire format's signed interpretation.
                if len > i64::MAX as u64 {
                    return Err(WsError::ReadLimit);
                }
                (len, 8)
            }
            n => (n, 0),
        };

        let size = 2 + length_size + 4;
        let Some(key) = self.segment.get(2 + length_size..size) else {
            return Ok(None);
        };
        let mut masking_key = [0u8; 4];
        masking_key.copy_from_slice(key);

        // Header complete: commit fragmentation tracking.
        if opcode.is_data() || opcode == OpCode::Continuation {
            self.last_final = final_frame;
        }
        if opcode.is_data() && !final_frame {
            self.multi_frame_opcode = Some(opcode);
        }

        Ok(Some(Header {
            size,
            final_frame,
            opcode,
            payload_len,
            masking_key,
        }))
    }
}

// ── Encoding ────────────────────────────────────────────────────────────

/// Serialize one server-to-client frame (unmasked, per RFC 6455 §5.1)
/// using the smallest length encoding that fits.
pub fn encode_frame(final_frame: bool, opcode: OpCode, payload: &[u8]) -> Vec<u8> {
    let mut b0 = opcode as u8;
    if final_frame {
        b0 |= FINAL_BIT;
    }

    let len = payload.len();
    let mut frame = Vec::with_capacity(10 + len);
    frame.push(b0);
    if len > 65535 {
        frame.push(127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    } else if len > MAX_CONTROL_PAYLOAD {
        frame.push(126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(len as u8);
    }
    frame.extend_from_slice(payload);
    frame
}

/// Serialize a data message as one or more frames.
///
/// Payloads up to `max_payload` go out as a single final frame; larger
/// ones split into `max_payload`-sized chunks where the first carries
/// `opcode`, the rest are continuations, and only the last has FIN set.
pub fn encode_message(
    opcode: OpCode,
    data: &[u8],
    max_payload: usize,
) -> Result<Vec<Vec<u8>>, WsError> {
    if !opcode.is_data() {
        return Err(WsError::BadWriteOpCode);
    }
    let max_payload = if max_payload == 0 {
        DEFAULT_MAX_PAYLOAD
    } else {
        max_payload
    };

    if data.len() <= max_payload {
        return Ok(vec![encode_frame(true, opcode, data)]);
    }

    let mut frames = Vec::with_capacity(data.len().div_ceil(max_payload));
    let mut chunks = data.chunks(max_payload).peekable();
    let mut opcode = opcode;
    while let Some(chunk) = chunks.next() {
        let final_frame = chunks.peek().is_none();
        frames.push(encode_frame(final_frame, opcode, chunk));
        opcode = OpCode::Continuation;
    }
    Ok(frames)
}

/// Serialize a control frame with the given opcode.
pub fn encode_control(opcode: OpCode, payload: &[u8]) -> Result<Vec<u8>, WsError> {
    if !opcode.is_control() {
        return Err(WsError::BadWriteOpCode);
    }
    if payload.len() > MAX_CONTROL_PAYLOAD {
        return Err(WsError::InvalidControlFrame);
    }
    Ok(encode_frame(true, opcode, payload))
}

/// Serialize a close frame: big-endian code followed by the UTF-8 reason.
/// The reserved no-status code produces no frame.
pub fn encode_close(code: u16, reason: &str) -> Result<Option<Vec<u8>>, WsError> {
    if code == CLOSE_NO_STATUS_RECEIVED {
        return Ok(None);
    }
    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&code.to_be_bytes());
    payload.extend_from_slice(reason.as_bytes());
    encode_control(OpCode::Close, &payload).map(Some)
}
